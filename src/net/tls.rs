use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use wtransport::Identity;

// Dev certificate location, generated on first start when missing
const DEV_CERT_DIR: &str = "certs";
const DEV_CERT_FILE: &str = "certs/cert.pem";
const DEV_KEY_FILE: &str = "certs/key.pem";

/// Browsers reject pinned WebTransport certificates valid for longer than this
const DEV_CERT_VALIDITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// TLS configuration for WebTransport server
pub struct TlsConfig {
    pub identity: Identity,
    /// Base64-encoded SHA-256 hash of the certificate (for serverCertificateHashes)
    pub cert_hash: String,
}

impl TlsConfig {
    /// Load TLS configuration
    ///
    /// Production: explicit PEM paths (TLS_CERT_PATH / TLS_KEY_PATH)
    /// Development: certs/ is used, and generated if absent
    pub async fn load(cert_path: Option<&str>, key_path: Option<&str>) -> Result<Self> {
        if let (Some(cert_path), Some(key_path)) = (cert_path, key_path) {
            info!("Loading TLS certificate from {}", cert_path);
            return Self::load_from_paths(cert_path, key_path).await;
        }

        if !(Path::new(DEV_CERT_FILE).exists() && Path::new(DEV_KEY_FILE).exists()) {
            warn!("No TLS certificate configured, generating a self-signed dev certificate");
            generate_dev_certificate(Path::new(DEV_CERT_DIR)).await?;
        }
        info!("Loading dev certificate from {}/", DEV_CERT_DIR);
        Self::load_from_paths(DEV_CERT_FILE, DEV_KEY_FILE).await
    }

    async fn load_from_paths(cert_path: &str, key_path: &str) -> Result<Self> {
        let identity = Identity::load_pemfiles(cert_path, key_path)
            .await
            .context("Failed to load certificate from PEM files")?;

        let cert_hash = Self::compute_cert_hash(&identity);
        info!("Certificate hash: {}", cert_hash);

        Ok(Self {
            identity,
            cert_hash,
        })
    }

    fn compute_cert_hash(identity: &Identity) -> String {
        identity
            .certificate_chain()
            .as_slice()
            .first()
            .map(|cert| STANDARD.encode(digest(&SHA256, cert.der()).as_ref()))
            .unwrap_or_default()
    }
}

/// Self-signed localhost certificate and key as PEM strings
pub fn self_signed_pem() -> Result<(String, String)> {
    let mut params = CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
        .context("Invalid certificate subject names")?;

    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "Arena Combat Dev");
    params
        .distinguished_name
        .push(DnType::OrganizationName, "Development");

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + DEV_CERT_VALIDITY).into();

    let key_pair = KeyPair::generate().context("Failed to generate key pair")?;
    let cert = params
        .self_signed(&key_pair)
        .context("Failed to self-sign certificate")?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

async fn generate_dev_certificate(dir: &Path) -> Result<()> {
    let (cert_pem, key_pem) = self_signed_pem()?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    tokio::fs::write(dir.join("cert.pem"), cert_pem).await?;
    tokio::fs::write(dir.join("key.pem"), key_pem).await?;
    info!("Dev certificate written to {}/", dir.display());
    Ok(())
}
