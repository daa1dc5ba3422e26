//! 集成测试共享夹具：脚本化引擎、内存套接字、最小反应器与证书工具。
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use spark_secure_socket::{
    CertificatePaths, ChannelMode, EngineCode, EngineSession, Fingerprint, JobOutcome,
    MultiplexerJob, Reactor, Readiness, SecureSocketConfig, SocketDescriptor, StreamSocket,
    TlsEngine, Transport,
};

/// 一次脚本化引擎调用的返回。
#[derive(Clone, Copy, Debug)]
pub struct Step {
    pub ret: isize,
    pub code: EngineCode,
}

impl Step {
    pub const fn want_read() -> Self {
        Self {
            ret: -1,
            code: EngineCode::WantRead,
        }
    }

    pub const fn want_write() -> Self {
        Self {
            ret: -1,
            code: EngineCode::WantWrite,
        }
    }

    pub const fn done(ret: isize) -> Self {
        Self {
            ret,
            code: EngineCode::None,
        }
    }

    pub const fn fail(code: EngineCode) -> Self {
        Self { ret: -1, code }
    }
}

#[derive(Default)]
pub struct ScriptState {
    pub handshake: VecDeque<Step>,
    pub io: VecDeque<Step>,
    pub engine_calls: usize,
    pub sessions_created: usize,
    pub shutdowns: usize,
    pub errors: Vec<String>,
    pub peer_certificate: Option<Vec<u8>>,
    pub refuse_session: bool,
}

/// 测试与引擎共享的脚本。
#[derive(Clone, Default)]
pub struct Script(Arc<Mutex<ScriptState>>);

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handshake(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.0.lock().handshake.extend(steps);
        self
    }

    pub fn io(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.0.lock().io.extend(steps);
        self
    }

    pub fn peer_certificate(self, der: Vec<u8>) -> Self {
        self.0.lock().peer_certificate = Some(der);
        self
    }

    pub fn engine_error(self, message: &str) -> Self {
        self.0.lock().errors.push(message.to_owned());
        self
    }

    pub fn refuse_session(self) -> Self {
        self.0.lock().refuse_session = true;
        self
    }

    pub fn engine_calls(&self) -> usize {
        self.0.lock().engine_calls
    }

    pub fn sessions_created(&self) -> usize {
        self.0.lock().sessions_created
    }

    pub fn shutdowns(&self) -> usize {
        self.0.lock().shutdowns
    }
}

pub struct ScriptedEngine {
    mode: ChannelMode,
    script: Script,
}

impl ScriptedEngine {
    pub fn new(mode: ChannelMode, script: Script) -> Self {
        Self { mode, script }
    }
}

impl TlsEngine for ScriptedEngine {
    type Session = ScriptedSession;

    fn mode(&self) -> ChannelMode {
        self.mode
    }

    fn new_session(&self) -> Result<ScriptedSession, String> {
        let mut state = self.script.0.lock();
        if state.refuse_session {
            return Err("out of memory".to_owned());
        }
        state.sessions_created += 1;
        Ok(ScriptedSession {
            script: self.script.clone(),
            last: EngineCode::None,
            bound: None,
        })
    }
}

pub struct ScriptedSession {
    script: Script,
    last: EngineCode,
    bound: Option<SocketDescriptor>,
}

impl ScriptedSession {
    fn next_handshake(&mut self) -> isize {
        let mut state = self.script.0.lock();
        state.engine_calls += 1;
        let step = state.handshake.pop_front().unwrap_or(Step::want_read());
        self.last = step.code;
        step.ret
    }

    fn next_io(&mut self) -> isize {
        let mut state = self.script.0.lock();
        state.engine_calls += 1;
        let step = state.io.pop_front().unwrap_or(Step::want_read());
        self.last = step.code;
        step.ret
    }
}

impl EngineSession for ScriptedSession {
    fn bind(&mut self, descriptor: SocketDescriptor) {
        self.bound = Some(descriptor);
    }

    fn connect(&mut self, _io: &mut dyn Transport) -> isize {
        self.next_handshake()
    }

    fn accept(&mut self, _io: &mut dyn Transport) -> isize {
        self.next_handshake()
    }

    fn read(&mut self, _io: &mut dyn Transport, buf: &mut [u8]) -> isize {
        let ret = self.next_io();
        if ret > 0 {
            let size = (ret as usize).min(buf.len());
            buf[..size].fill(b'x');
            return size as isize;
        }
        ret
    }

    fn write(&mut self, _io: &mut dyn Transport, buf: &[u8]) -> isize {
        let ret = self.next_io();
        if ret > 0 {
            return (ret as usize).min(buf.len()) as isize;
        }
        ret
    }

    fn flush(&mut self, _io: &mut dyn Transport) -> isize {
        1
    }

    fn shutdown(&mut self, _io: &mut dyn Transport) -> isize {
        self.script.0.lock().shutdowns += 1;
        1
    }

    fn error_code(&self, ret: isize) -> EngineCode {
        if ret > 0 { EngineCode::None } else { self.last }
    }

    fn has_pending_errors(&self) -> bool {
        !self.script.0.lock().errors.is_empty()
    }

    fn drain_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.script.0.lock().errors)
    }

    fn take_transport_error(&mut self) -> Option<io::Error> {
        None
    }

    fn peer_certificate(&self) -> Option<Vec<u8>> {
        self.script.0.lock().peer_certificate.clone()
    }

    fn cipher_description(&self) -> Option<String> {
        Some("TLS13 SCRIPTED_SUITE".to_owned())
    }
}

/// 只记录关闭动作的内存套接字。
#[derive(Clone, Default)]
pub struct MemorySocket {
    closed: Arc<AtomicBool>,
}

impl MemorySocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl io::Read for MemorySocket {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::WouldBlock.into())
    }
}

impl io::Write for MemorySocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StreamSocket for MemorySocket {
    fn descriptor(&self) -> SocketDescriptor {
        SocketDescriptor::new(42)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        Ok(None)
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// 单线程测试反应器：每次 `turn` 依次服务全部作业。
#[derive(Default)]
pub struct TestReactor {
    jobs: Mutex<Vec<Box<dyn MultiplexerJob>>>,
}

impl TestReactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn descriptors(&self) -> Vec<SocketDescriptor> {
        self.jobs.lock().iter().map(|job| job.descriptor()).collect()
    }

    /// 服务全部作业一次，按结果保留、替换或移除。
    pub fn turn(&self) {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        let mut kept = Vec::with_capacity(jobs.len());
        for mut job in jobs {
            let interest = job.interest();
            let readiness = Readiness {
                readable: interest.readable,
                writable: interest.writable,
                error: false,
            };
            match job.service(readiness) {
                JobOutcome::Continue => kept.push(job),
                JobOutcome::Advance(next) => kept.push(next),
                JobOutcome::Terminate => {}
            }
        }
        self.jobs.lock().extend(kept);
    }
}

impl Reactor for TestReactor {
    fn register_job(&self, job: Box<dyn MultiplexerJob>) {
        self.jobs.lock().push(job);
    }
}

/// 握手后的下一阶段作业，只记录自己被服务的次数。
pub struct MarkerJob {
    pub descriptor: SocketDescriptor,
}

impl MultiplexerJob for MarkerJob {
    fn descriptor(&self) -> SocketDescriptor {
        self.descriptor
    }

    fn interest(&self) -> spark_secure_socket::Interest {
        spark_secure_socket::Interest::READABLE
    }

    fn service(&mut self, _readiness: Readiness) -> JobOutcome {
        JobOutcome::Continue
    }
}

/// 自签名证书及其 PEM 文件。
pub struct TestIdentity {
    pub der: Vec<u8>,
    pub pem_path: PathBuf,
}

impl TestIdentity {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_certificate(&self.der)
    }

    pub fn paths(&self) -> CertificatePaths {
        CertificatePaths::combined(self.pem_path.clone())
    }
}

/// 在 `profile/SSL/Synergy.pem` 生成证书与私钥合并的 PEM 文件。
pub fn write_identity(profile: &Path) -> TestIdentity {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
        .expect("生成自签名证书失败");
    let ssl_dir = profile.join("SSL");
    fs::create_dir_all(&ssl_dir).expect("创建 SSL 目录失败");
    let pem_path = ssl_dir.join("Synergy.pem");
    let pem = format!(
        "{}{}",
        certified.cert.pem(),
        certified.key_pair.serialize_pem()
    );
    fs::write(&pem_path, pem).expect("写入证书文件失败");
    TestIdentity {
        der: certified.cert.der().to_vec(),
        pem_path,
    }
}

/// 把指纹逐行写入 profile 下的信任库。
pub fn trust(profile: &Path, fingerprints: &[&str]) {
    let dir = profile.join("SSL").join("Fingerprints");
    fs::create_dir_all(&dir).expect("创建指纹目录失败");
    let mut body = fingerprints.join("\n");
    body.push('\n');
    fs::write(dir.join("TrustedServers.txt"), body).expect("写入信任库失败");
}

/// 无停顿的测试配置。
pub fn quiet_config(profile: &Path) -> SecureSocketConfig {
    SecureSocketConfig::default()
        .with_profile_dir(profile)
        .with_pauses(Duration::ZERO, Duration::ZERO)
}
