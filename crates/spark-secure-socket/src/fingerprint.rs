use std::fmt;

use sha1::{Digest, Sha1};

/// SHA-1 摘要长度（字节）。
pub const DIGEST_LEN: usize = 20;

/// 规范化后的指纹长度：20 组十六进制字符对 + 19 个冒号。
pub const CANONICAL_LEN: usize = DIGEST_LEN * 3 - 1;

/// 证书指纹的规范文本形式。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 信任库以“每行一个指纹”的纯文本保存，比对必须基于唯一的规范形式，
///   否则大小写或分隔符差异都会让已固定的证书被误拒；
/// - 同一字符串既用于比对也用于日志，用户可以直接把日志中的指纹粘贴进信任库。
///
/// ## 契约（What）
/// - 规范形式：大写十六进制，每个字节之间以 `:` 分隔，例如 `AB:01:FF`；
/// - 格式化是确定且全函数的：任意输入字节都有唯一输出，20 字节输入恒得到 59 个字符。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    canonical: String,
}

impl Fingerprint {
    /// 由原始摘要字节构造指纹。
    pub fn from_digest(digest: &[u8]) -> Self {
        Self {
            canonical: format_fingerprint(digest),
        }
    }

    /// 计算 DER 编码证书的 SHA-1 指纹。
    pub fn of_certificate(der: &[u8]) -> Self {
        let digest = Sha1::digest(der);
        Self::from_digest(digest.as_slice())
    }

    /// 规范文本。
    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.canonical
    }
}

/// 把摘要字节渲染为大写、逐字节冒号分隔的十六进制串。
pub fn format_fingerprint(digest: &[u8]) -> String {
    let hex = hex::encode_upper(digest);
    let mut canonical = String::with_capacity(hex.len() + hex.len() / 2);
    for (index, ch) in hex.chars().enumerate() {
        if index > 0 && index % 2 == 0 {
            canonical.push(':');
        }
        canonical.push(ch);
    }
    canonical
}
