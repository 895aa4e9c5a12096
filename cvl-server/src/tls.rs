//! TLS bootstrap
//!
//! The server speaks HTTPS by default. Credentials are a PEM certificate and
//! private key on disk; when they are missing the binary refuses to start
//! and prints the command that mints a self-signed pair, rather than coming
//! up silently unencrypted.

use axum_server::tls_rustls::RustlsConfig;
use cvl_core::{Error, Result};
use std::path::Path;

/// Load a PEM certificate/key pair into a rustls server config.
pub async fn load(cert: &Path, key: &Path) -> Result<RustlsConfig> {
    RustlsConfig::from_pem_file(cert, key).await.map_err(|e| {
        Error::Tls(format!(
            "failed to load {} / {}: {}",
            cert.display(),
            key.display(),
            e
        ))
    })
}

/// Whether both credential files exist.
pub fn credentials_present(cert: &Path, key: &Path) -> bool {
    cert.is_file() && key.is_file()
}

/// Operator-facing instructions for minting a self-signed pair.
pub fn missing_credentials_hint(cert: &Path, key: &Path) -> String {
    format!(
        "SSL is enabled by default, but no certificate or key has been configured. \
         Use --no-ssl to disable SSL.\n\
         To generate a self-signed certificate for localhost, execute the following command:\n\n  \
         openssl req -x509 -nodes -days 730 -newkey rsa:2048 -keyout {} -out {} -subj '/CN=localhost'\n\n\
         You will also need to configure your web browser to trust the self-signed certificate\n\
         (the /trust endpoint exists for exactly that dance).",
        key.display(),
        cert.display()
    )
}
