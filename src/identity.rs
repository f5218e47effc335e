use anyhow::{Context, Result};
use directories::ProjectDirs;
use rcgen::generate_simple_self_signed;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, PrivateKey, RootCertStore};
use std::{fs, path::{Path, PathBuf}, sync::Arc};

/// Returns the app-specific state directory, creating it if needed.
pub fn state_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("edu", "DUFTP", "duftp")
        .ok_or_else(|| anyhow::anyhow!("could not determine state directory"))?;
    let dir = proj.data_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create {dir:?}"))?;
    Ok(dir)
}

/// Load the persisted QUIC certificate and key from `dir`, or generate and
/// persist new ones there.
pub fn load_or_generate_cert(dir: &Path) -> Result<(Certificate, PrivateKey)> {
    let cert_path = dir.join("server_cert.der");
    let key_path = dir.join("server_key.der");

    if cert_path.exists() && key_path.exists() {
        let cert_der = fs::read(&cert_path).with_context(|| format!("read {:?}", cert_path))?;
        let key_der = fs::read(&key_path).with_context(|| format!("read {:?}", key_path))?;
        return Ok((Certificate(cert_der), PrivateKey(key_der)));
    }

    let cert = generate_simple_self_signed(["localhost".into()])?;
    let cert_der = cert.serialize_der()?;
    let key_der = cert.serialize_private_key_der();

    fs::write(&cert_path, &cert_der).with_context(|| format!("write {:?}", cert_path))?;
    fs::write(&key_path, &key_der).with_context(|| format!("write {:?}", key_path))?;
    log::info!("generated QUIC certificate in {}", dir.display());

    Ok((Certificate(cert_der), PrivateKey(key_der)))
}

/// QUIC server config with the certificate kept in `dir`; one bidirectional
/// stream per connection is all a session uses.
pub fn make_server_config(dir: &Path) -> Result<quinn::ServerConfig> {
    let (cert, key) = load_or_generate_cert(dir)?;
    let mut server_config = quinn::ServerConfig::with_single_cert(vec![cert], key)?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_concurrent_bidi_streams(1u32.into());
    server_config.transport = Arc::new(transport);
    Ok(server_config)
}

/// QUIC client config that accepts whatever certificate the server shows.
/// QUIC is used as a reliable pipe here, peers are not authenticated.
pub fn make_client_config() -> quinn::ClientConfig {
    let mut crypto = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth();
    crypto.dangerous().set_certificate_verifier(Arc::new(AnyServerCert));
    quinn::ClientConfig::new(Arc::new(crypto))
}

struct AnyServerCert;

impl ServerCertVerifier for AnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
