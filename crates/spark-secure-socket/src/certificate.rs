use std::{
    fs, io,
    path::{Path, PathBuf},
};

use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};
use serde::Deserialize;

use crate::error::CertificateError;

/// 服务端证书与私钥的 PEM 文件路径。
///
/// 两个字段可以指向同一个文件：PEM 中同时包含证书与私钥时按各自类型提取。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CertificatePaths {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

impl CertificatePaths {
    pub fn new(certificate: impl Into<PathBuf>, private_key: impl Into<PathBuf>) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
        }
    }

    /// 证书与私钥位于同一 PEM 文件。
    pub fn combined(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            certificate: path.clone(),
            private_key: path,
        }
    }
}

/// 已解析的服务端身份：证书链 + 私钥。
#[derive(Debug)]
pub struct ServerIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// 装载服务端身份。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 证书装载失败是“启动期致命”的配置错误，运维需要一眼看出失败发生在哪一步，
///   因此每个失败点都对应一个独立的 [`CertificateError`] 变体；
/// - PEM 语法与密钥格式的解析交给 `rustls-pki-types`，这里只负责把失败归类。
///
/// ## 逻辑（How）
/// 1. 路径为空 → `NotSpecified`；
/// 2. 文件不存在 → `Missing`，其它读取失败 → `Unreadable`；
/// 3. PEM 中无证书或证书段落损坏 → `CertificateRejected`；
/// 4. PEM 中无私钥或私钥段落损坏 → `KeyRejected`；
/// 5. 证书与私钥是否匹配由引擎在构造上下文时判定（见 `RustlsEngine::server`）。
pub fn load_server_identity(paths: &CertificatePaths) -> Result<ServerIdentity, CertificateError> {
    let cert_pem = read_pem(&paths.certificate)?;
    let chain = CertificateDer::pem_slice_iter(&cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| CertificateError::CertificateRejected {
            path: paths.certificate.clone(),
            reason: err.to_string(),
        })?;
    if chain.is_empty() {
        return Err(CertificateError::CertificateRejected {
            path: paths.certificate.clone(),
            reason: "no certificate found in PEM".to_owned(),
        });
    }

    let key_pem = if paths.private_key == paths.certificate {
        cert_pem
    } else {
        read_pem(&paths.private_key)?
    };
    let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(|err| {
        CertificateError::KeyRejected {
            path: paths.private_key.clone(),
            reason: err.to_string(),
        }
    })?;

    Ok(ServerIdentity { chain, key })
}

fn read_pem(path: &Path) -> Result<Vec<u8>, CertificateError> {
    if path.as_os_str().is_empty() {
        return Err(CertificateError::NotSpecified);
    }
    fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => CertificateError::Missing {
            path: path.to_path_buf(),
        },
        _ => CertificateError::Unreadable {
            path: path.to_path_buf(),
            source,
        },
    })
}
