//! GeoIP country tagging — informational only, never affects matching.
//! Uses `maxminddb`, the crate `jitlabs-sg-mihomo-rust` reaches for the
//! same job.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use log::{info, warn};
use maxminddb::geoip2;

/// Holds the currently-loaded IPv4/IPv6 GeoIP databases behind an
/// `ArcSwapOption`, so a `SIGHUP` reload can swap in fresh readers without
/// any in-flight lookup ever observing a half-reloaded one
/// (`webrtc-rs/webrtc`'s own `api` module uses the same `arc-swap` crate
/// for its hot-swappable settings engine).
#[derive(Default)]
pub struct GeoIp {
    v4: ArcSwapOption<maxminddb::Reader<Vec<u8>>>,
    v6: ArcSwapOption<maxminddb::Reader<Vec<u8>>>,
    v4_path: Option<PathBuf>,
    v6_path: Option<PathBuf>,
}

impl GeoIp {
    /// Construct from configured database paths, loading each eagerly if
    /// given. A missing/unreadable path is logged and left unloaded rather
    /// than treated as a startup failure: GeoIP tagging is informational.
    pub fn load(v4_path: Option<PathBuf>, v6_path: Option<PathBuf>) -> GeoIp {
        let geoip = GeoIp {
            v4: ArcSwapOption::empty(),
            v6: ArcSwapOption::empty(),
            v4_path,
            v6_path,
        };
        geoip.reload();
        geoip
    }

    /// Re-open both configured database files. Called once at startup and
    /// again on every `SIGHUP`.
    pub fn reload(&self) {
        if let Some(path) = &self.v4_path {
            match open(path) {
                Ok(reader) => self.v4.store(Some(Arc::new(reader))),
                Err(e) => warn!("failed to (re)load GeoIP4 database {}: {e}", path.display()),
            }
        }
        if let Some(path) = &self.v6_path {
            match open(path) {
                Ok(reader) => self.v6.store(Some(Arc::new(reader))),
                Err(e) => warn!("failed to (re)load GeoIP6 database {}: {e}", path.display()),
            }
        }
        info!("GeoIP databases (re)loaded");
    }

    /// Best-effort ISO country code for an IP, or `None` if unconfigured,
    /// unloaded, or the address isn't present in the database.
    pub fn country(&self, addr: IpAddr) -> Option<String> {
        let reader = match addr {
            IpAddr::V4(_) => self.v4.load_full(),
            IpAddr::V6(_) => self.v6.load_full(),
        }?;
        let country: geoip2::Country = reader.lookup(addr).ok()?;
        let iso_code = country.country?.iso_code?;
        Some(iso_code.to_ascii_lowercase())
    }
}

fn open(path: &Path) -> maxminddb::errors::Result<maxminddb::Reader<Vec<u8>>> {
    maxminddb::Reader::open_readfile(path)
}
