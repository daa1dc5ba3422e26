use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::fingerprint::Fingerprint;

/// 信任库目录（相对 profile 目录）。
pub const FINGERPRINT_DIR: &str = "SSL/Fingerprints";
/// 受信服务端指纹文件名。
pub const TRUSTED_SERVERS_FILE: &str = "TrustedServers.txt";

/// 受信服务端指纹库。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 客户端在密码学握手之外再做一次“应用层信任”判定：只有被用户固定过的证书指纹才放行；
/// - 信任库不在内存中缓存，每次校验都重新读取文件，用户在外部追加指纹后无需重启即可生效。
///
/// ## 契约（What）
/// - 文件为纯文本，每行一个规范指纹，无表头；
/// - 行以 `\n` 切分，不做任何修剪（`\r` 也视为行内容），空行跳过；
/// - 比对为大小写敏感的整行相等；
/// - 文件不存在视为“零条匹配”，而不是错误，首次运行的空信任库因此会拒绝一切服务端。
///
/// ## 并发（Concurrency）
/// - 只读、无共享缓存：多个通道可并发调用 [`TrustStore::contains`] 而无需协调。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustStore {
    path: PathBuf,
}

impl TrustStore {
    /// 直接指定信任库文件路径。
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 按约定布局 `<profile>/SSL/Fingerprints/TrustedServers.txt` 定位信任库。
    pub fn for_profile(profile_dir: impl AsRef<Path>) -> Self {
        Self::new(
            profile_dir
                .as_ref()
                .join(FINGERPRINT_DIR)
                .join(TRUSTED_SERVERS_FILE),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部非空行，保持文件顺序。
    ///
    /// 文件不存在时返回空列表；其它 IO 错误原样返回。
    pub fn load(&self) -> io::Result<Vec<String>> {
        self.lines()?
            .map(|line| line.map(|line| String::from_utf8_lossy(&line).into_owned()))
            .collect()
    }

    /// 判断指纹是否被信任。
    ///
    /// 读取失败一律按“未信任”处理并记录告警，信任判定永远不会因为 IO 问题而放行。
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        match self.scan(fingerprint.as_str().as_bytes()) {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read trusted fingerprints, treating as untrusted"
                );
                false
            }
        }
    }

    fn scan(&self, wanted: &[u8]) -> io::Result<bool> {
        for line in self.lines()? {
            if line? == wanted {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 逐行读取信任库：以 `\n` 切分、不修剪、跳过空行；文件不存在时为空序列。
    fn lines(&self) -> io::Result<impl Iterator<Item = io::Result<Vec<u8>>>> {
        let file = match File::open(&self.path) {
            Ok(file) => Some(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "trusted fingerprint file does not exist");
                None
            }
            Err(err) => return Err(err),
        };
        Ok(file
            .into_iter()
            .flat_map(|file| BufReader::new(file).split(b'\n'))
            .filter(|line| !matches!(line, Ok(line) if line.is_empty())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fingerprint() -> Fingerprint {
        Fingerprint::from_digest(&[0xAA; 20])
    }

    fn store_with(contents: &str) -> (tempfile::TempDir, TrustStore) {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let store = TrustStore::for_profile(dir.path());
        fs::create_dir_all(store.path().parent().expect("信任库路径缺少父目录"))
            .expect("创建信任库目录失败");
        fs::write(store.path(), contents).expect("写入信任库失败");
        (dir, store)
    }

    #[test]
    fn profile_layout_matches_convention() {
        let store = TrustStore::for_profile("/home/user/.synergy");
        assert_eq!(
            store.path(),
            Path::new("/home/user/.synergy/SSL/Fingerprints/TrustedServers.txt")
        );
    }

    #[test]
    fn exact_line_matches() {
        let line = fingerprint().to_string();
        assert_eq!(line.len(), 59);
        let (_dir, store) = store_with(&format!("11:22\n\n{line}\n"));
        assert!(store.contains(&fingerprint()));
    }

    #[test]
    fn last_line_without_newline_matches() {
        let (_dir, store) = store_with(&fingerprint().to_string());
        assert!(store.contains(&fingerprint()));
    }

    #[test]
    fn comparison_is_case_sensitive_and_untrimmed() {
        let lower = fingerprint().to_string().to_lowercase();
        let padded = format!(" {}", fingerprint());
        let crlf = format!("{}\r\n", fingerprint());
        for contents in [lower, padded, crlf] {
            let (_dir, store) = store_with(&contents);
            assert!(!store.contains(&fingerprint()), "不应匹配: {contents:?}");
        }
    }

    #[test]
    fn empty_file_rejects_everything() {
        let (_dir, store) = store_with("");
        assert!(!store.contains(&fingerprint()));
        assert!(store.load().expect("读取空信任库").is_empty());
    }

    #[test]
    fn missing_file_rejects_without_error() {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let store = TrustStore::for_profile(dir.path());
        assert!(!store.contains(&fingerprint()));
        assert_eq!(store.load().expect("缺失文件应视为空"), Vec::<String>::new());
    }

    #[test]
    fn updates_are_visible_without_reload() {
        let (_dir, store) = store_with("");
        assert!(!store.contains(&fingerprint()));
        fs::write(store.path(), format!("{}\n", fingerprint())).expect("追加指纹失败");
        assert!(store.contains(&fingerprint()));
    }

    #[test]
    fn listed_entries_are_exactly_the_trusted_ones() {
        let line = fingerprint().to_string();
        let other = Fingerprint::from_digest(&[0xBB; 20]);
        let (_dir, store) = store_with(&format!("\n{line}\r\n\n{other}\n"));
        let entries = store.load().expect("读取信任库");
        assert_eq!(entries, vec![format!("{line}\r"), other.to_string()]);
        assert!(!store.contains(&fingerprint()));
        assert!(store.contains(&other));
        assert!(store.scan(entries[0].as_bytes()).expect("扫描信任库"));
    }

    #[test]
    fn load_skips_blank_lines_and_keeps_order() {
        let (_dir, store) = store_with("B\n\nA\n");
        assert_eq!(store.load().expect("读取信任库"), vec!["B", "A"]);
    }
}
