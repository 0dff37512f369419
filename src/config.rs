//! CLI / operator surface. Parsed once at startup; the broker never
//! rereads it and persists no state across restarts.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::error::{BrokerError, Result};

/// How the HTTP listener terminates TLS, if at all. The three modes are
/// mutually exclusive.
#[derive(Debug, Clone)]
pub enum TlsMode {
    Plain,
    CertFile {
        cert_file: PathBuf,
        key_file: PathBuf,
    },
    Acme {
        hostnames: Vec<String>,
        email: Option<String>,
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Parser)]
#[command(name = "snowflake-broker", about = "Snowflake rendezvous broker")]
pub struct Cli {
    /// Address to listen on, e.g. 0.0.0.0:443
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub addr: String,

    /// TLS certificate chain (PEM). Requires --key.
    #[arg(long, requires = "key")]
    pub cert: Option<PathBuf>,

    /// TLS private key (PEM). Requires --cert.
    #[arg(long, requires = "cert")]
    pub key: Option<PathBuf>,

    /// Hostnames to request ACME certificates for. Repeatable.
    #[arg(long = "acme-hostname", conflicts_with_all = ["cert", "key"])]
    pub acme_hostnames: Vec<String>,

    /// Contact email for ACME registration.
    #[arg(long = "acme-email", requires = "acme_hostnames")]
    pub acme_email: Option<String>,

    /// Directory to cache ACME account/certificate state in.
    #[arg(long = "acme-cert-cache", requires = "acme_hostnames")]
    pub acme_cert_cache: Option<PathBuf>,

    /// MaxMind GeoIP2 IPv4 database path.
    #[arg(long)]
    pub geoip: Option<PathBuf>,

    /// MaxMind GeoIP2 IPv6 database path.
    #[arg(long)]
    pub geoip6: Option<PathBuf>,

    /// Path to write periodic metrics snapshots to; `/metrics` serves its
    /// contents. If unset, `/metrics` returns 404.
    #[arg(long)]
    pub metrics_log: Option<PathBuf>,

    /// Log full client IPs and SDP contents instead of redacting them.
    #[arg(long)]
    pub unsafe_logging: bool,

    /// Proxy poll timeout, in seconds.
    #[arg(long, default_value_t = 10)]
    pub proxy_timeout_secs: u64,

    /// Client offer-to-answer timeout, in seconds.
    #[arg(long, default_value_t = 10)]
    pub client_timeout_secs: u64,
}

impl Cli {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.addr
            .parse()
            .map_err(|e| BrokerError::BadRequest(format!("invalid --addr {}: {e}", self.addr)))
    }

    pub fn tls_mode(&self) -> TlsMode {
        if !self.acme_hostnames.is_empty() {
            TlsMode::Acme {
                hostnames: self.acme_hostnames.clone(),
                email: self.acme_email.clone(),
                cache_dir: self.acme_cert_cache.clone(),
            }
        } else if let (Some(cert_file), Some(key_file)) = (&self.cert, &self.key) {
            TlsMode::CertFile {
                cert_file: cert_file.clone(),
                key_file: key_file.clone(),
            }
        } else {
            TlsMode::Plain
        }
    }
}
