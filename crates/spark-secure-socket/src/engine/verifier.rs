use std::sync::Arc;

use rustls::{
    DigitallySignedStruct, Error as RustlsError, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::trace;

/// 把服务端身份判定推迟到指纹固定的证书校验器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务端普遍使用自签名证书，链校验无从谈起；真正的信任判定由握手完成后的
///   指纹比对（`TrustStore`）承担；
/// - 但握手签名仍必须校验：否则中间人可以出示任意证书却不持有对应私钥，
///   指纹比对也就失去意义。
///
/// ## 契约（What）
/// - `verify_server_cert`：无条件接受证书链，只记录 trace 日志；
/// - `verify_tls12_signature` / `verify_tls13_signature`：使用加密提供者的算法集合校验签名；
/// - 该校验器只能与指纹固定配合使用，单独使用等同于不校验服务端身份。
#[derive(Debug)]
pub struct PinningServerVerifier {
    provider: Arc<CryptoProvider>,
}

impl PinningServerVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for PinningServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        trace!(
            certificate_len = end_entity.len(),
            intermediates = intermediates.len(),
            "deferring server certificate trust to fingerprint pinning"
        );
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
