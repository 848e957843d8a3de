use rustls::{
	ClientConfig,
	client::{ClientSessionMemoryCache, Resumption},
	crypto::CryptoProvider,
};

/// Session cache entries shared by all carriers of one handler
pub(crate) const SESSION_CACHE_SIZE: usize = 32;

/// Client configuration for carrier TLS: platform trust anchors unless
/// verification is skipped, and a bounded session cache so reconnecting
/// flows resume instead of re-handshaking.
pub(crate) fn tls_config(skip_cert_verify: bool) -> Result<ClientConfig, rustls::Error> {
	use rustls_platform_verifier::BuilderVerifierExt;

	let provider = CryptoProvider::get_default()
		.ok_or_else(|| rustls::Error::General(String::from("no process-level crypto provider")))?
		.clone();
	let builder = ClientConfig::builder_with_provider(provider.clone())
		.with_protocol_versions(rustls::DEFAULT_VERSIONS)?;

	let mut config = if skip_cert_verify {
		builder
			.dangerous()
			.with_custom_certificate_verifier(danger::NoServerVerification::new(provider))
			.with_no_client_auth()
	} else {
		builder
			.with_platform_verifier()
			.map_err(|err| rustls::Error::General(err.to_string()))?
			.with_no_client_auth()
	};
	config.resumption = Resumption::store(std::sync::Arc::new(ClientSessionMemoryCache::new(SESSION_CACHE_SIZE)));
	Ok(config)
}

mod danger {
	use std::sync::Arc;

	use rustls::{
		DigitallySignedStruct, SignatureScheme,
		client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
		crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
		pki_types::{CertificateDer, ServerName, UnixTime},
	};

	/// Certificate verifier that accepts any server certificate.
	///
	/// NOTE: vulnerable to MITM. Intended for self-signed deployments and
	/// tests only.
	#[derive(Debug)]
	pub(crate) struct NoServerVerification(Arc<CryptoProvider>);

	impl NoServerVerification {
		pub(crate) fn new(provider: Arc<CryptoProvider>) -> Arc<Self> {
			Arc::new(Self(provider))
		}
	}

	impl ServerCertVerifier for NoServerVerification {
		fn verify_server_cert(
			&self,
			_end_entity: &CertificateDer<'_>,
			_intermediates: &[CertificateDer<'_>],
			_server_name: &ServerName<'_>,
			_ocsp_response: &[u8],
			_now: UnixTime,
		) -> Result<ServerCertVerified, rustls::Error> {
			Ok(ServerCertVerified::assertion())
		}

		fn verify_tls12_signature(
			&self,
			message: &[u8],
			cert: &CertificateDer<'_>,
			dss: &DigitallySignedStruct,
		) -> Result<HandshakeSignatureValid, rustls::Error> {
			verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
		}

		fn verify_tls13_signature(
			&self,
			message: &[u8],
			cert: &CertificateDer<'_>,
			dss: &DigitallySignedStruct,
		) -> Result<HandshakeSignatureValid, rustls::Error> {
			verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
		}

		fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
			self.0.signature_verification_algorithms.supported_schemes()
		}
	}
}
