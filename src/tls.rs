//! TLS provisioning (ACME or file-based). Cert+key and plain-HTTP are
//! implemented in full; ACME is modeled and validated at the config
//! layer but certificate issuance itself is not implemented.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

use crate::config::TlsMode;
use crate::error::{BrokerError, Result};

/// Build a `rustls::ServerConfig` for the `CertFile` TLS mode. Uses
/// `rustls-pemfile`, paired with `tokio-rustls`/`rustls` the same way the
/// pack's `jitlabs-sg-mihomo-rust` example builds its listener.
pub fn server_config_from_files(cert_file: &Path, key_file: &Path) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(BrokerError::Tls)?;
    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(BrokerError::Io)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| BrokerError::BadRequest(format!("no private key found in {}", path.display())))
}

/// Resolve a `TlsMode` into a listener-ready `rustls::ServerConfig`, or
/// `None` for `Plain`. `Acme` is validated (non-empty hostname list) but
/// returns `BrokerError::NotBuilt`: run this broker behind a cert+key
/// TLS terminator, or supply `--cert`/`--key` directly.
pub fn resolve(mode: &TlsMode) -> Result<Option<Arc<ServerConfig>>> {
    match mode {
        TlsMode::Plain => Ok(None),
        TlsMode::CertFile { cert_file, key_file } => {
            Ok(Some(server_config_from_files(cert_file, key_file)?))
        }
        TlsMode::Acme { hostnames, .. } => {
            if hostnames.is_empty() {
                return Err(BrokerError::BadRequest(
                    "ACME mode requires at least one --acme-hostname".into(),
                ));
            }
            Err(BrokerError::NotBuilt(
                "ACME certificate provisioning is an external collaborator; \
                 run this broker behind a cert+key-file TLS terminator or \
                 supply --cert/--key instead",
            ))
        }
    }
}
