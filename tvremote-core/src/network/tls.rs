//! TLS setup for the `wss://` control channel.
//!
//! TVs present self-signed certificates, so chain validation against public
//! roots would always fail. Trust is delegated to a caller-supplied
//! [`CertificateValidator`]; without one every certificate is accepted.
//! Handshake signatures are still verified with the crypto provider.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tracing::{debug, warn};

use crate::error::RemoteError;

/// Decides whether a device's certificate is trusted.
///
/// Held by `Arc`: the engine keeps no other reference to the caller's
/// state, and the validator must not hold one to the engine.
pub trait CertificateValidator: Send + Sync {
    /// `certificate` is the DER-encoded leaf presented by `host`.
    fn validate(&self, host: &str, certificate: &[u8]) -> bool;
}

/// Trusts exactly one certificate, compared byte for byte.
#[derive(Debug, Clone)]
pub struct PinnedCertificate {
    der: Vec<u8>,
}

impl PinnedCertificate {
    pub fn new(der: impl Into<Vec<u8>>) -> Self {
        Self { der: der.into() }
    }
}

impl CertificateValidator for PinnedCertificate {
    fn validate(&self, _host: &str, certificate: &[u8]) -> bool {
        self.der == certificate
    }
}

impl<F> CertificateValidator for F
where
    F: Fn(&str, &[u8]) -> bool + Send + Sync,
{
    fn validate(&self, host: &str, certificate: &[u8]) -> bool {
        self(host, certificate)
    }
}

// ── Verifier ─────────────────────────────────────────────────────

struct HookVerifier {
    host: String,
    validator: Option<Arc<dyn CertificateValidator>>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for HookVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookVerifier")
            .field("host", &self.host)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl ServerCertVerifier for HookVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match &self.validator {
            None => {
                debug!(host = %self.host, "accepting device certificate without validator");
                Ok(ServerCertVerified::assertion())
            }
            Some(validator) if validator.validate(&self.host, end_entity.as_ref()) => {
                Ok(ServerCertVerified::assertion())
            }
            Some(_) => {
                warn!(host = %self.host, "device certificate rejected by validator");
                Err(rustls::Error::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a client config whose certificate check is `validator`.
pub(crate) fn client_config(
    host: &str,
    validator: Option<Arc<dyn CertificateValidator>>,
) -> Result<Arc<ClientConfig>, RemoteError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = HookVerifier {
        host: host.to_string(),
        validator,
        provider: provider.clone(),
    };
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RemoteError::TransportFailure(format!("tls setup: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_certificate_matches_exact_bytes() {
        let pin = PinnedCertificate::new(vec![1u8, 2, 3]);
        assert!(pin.validate("10.0.0.5", &[1, 2, 3]));
        assert!(!pin.validate("10.0.0.5", &[1, 2, 4]));
    }

    #[test]
    fn closures_are_validators() {
        let only_lan = |host: &str, _: &[u8]| host.starts_with("192.168.");
        let v: Arc<dyn CertificateValidator> = Arc::new(only_lan);
        assert!(v.validate("192.168.1.2", &[]));
        assert!(!v.validate("10.0.0.1", &[]));
    }

    #[test]
    fn verifier_delegates_to_validator() {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let cert = CertificateDer::from(vec![0xAAu8; 8]);
        let name = ServerName::try_from("10.0.0.5").unwrap();

        let rejecting = HookVerifier {
            host: "10.0.0.5".into(),
            validator: Some(Arc::new(PinnedCertificate::new(vec![0xBBu8; 8]))),
            provider: provider.clone(),
        };
        assert!(
            rejecting
                .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
                .is_err()
        );

        let open = HookVerifier {
            host: "10.0.0.5".into(),
            validator: None,
            provider,
        };
        assert!(
            open.verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
                .is_ok()
        );
    }

    #[test]
    fn client_config_builds() {
        assert!(client_config("10.0.0.5", None).is_ok());
    }
}
