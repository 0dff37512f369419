//! The `snowflake-broker` binary: wires [`snowflake_broker::context::BrokerContext`]
//! to a CLI, logging, TLS, GeoIP reload signal, and the HTTP listener.
//! Everything in here is ambient wiring; the rendezvous semantics live in
//! the library crate.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal::unix::{signal, SignalKind};

use snowflake_broker::config::{Cli, TlsMode};
use snowflake_broker::context::BrokerContext;
use snowflake_broker::geoip::GeoIp;
use snowflake_broker::{http, tls};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.unsafe_logging);

    if let Err(e) = run(cli).await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

fn init_logging(unsafe_logging: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if unsafe_logging {
        info!("unsafe logging enabled: client IPs and SDP contents will not be redacted");
    }
    builder.init();
}

async fn run(cli: Cli) -> snowflake_broker::Result<()> {
    let addr = cli.listen_addr()?;
    let tls_mode = cli.tls_mode();

    // A misconfigured TLS mode or an unbindable listener is a fatal
    // startup condition, surfaced here and nowhere else.
    let tls_config = tls::resolve(&tls_mode)?;

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| snowflake_broker::BrokerError::Io(std::io::Error::other(e.to_string())))?;

    let geoip = GeoIp::load(cli.geoip.clone(), cli.geoip6.clone());
    let proxy_timeout = Duration::from_secs(cli.proxy_timeout_secs);
    let client_timeout = Duration::from_secs(cli.client_timeout_secs);
    let ctx = Arc::new(BrokerContext::new(
        prometheus_handle,
        geoip,
        proxy_timeout,
        client_timeout,
        cli.metrics_log.clone(),
    ));

    spawn_geoip_reload_handler(Arc::clone(&ctx));

    match tls_config {
        Some(tls_config) => http::serve_tls(ctx, addr, tls_config).await,
        None => http::serve(ctx, addr).await,
    }
}

/// `SIGHUP` triggers a GeoIP reload.
fn spawn_geoip_reload_handler(ctx: Arc<BrokerContext>) {
    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGHUP handler: {e}");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("SIGHUP received: reloading GeoIP databases");
            ctx.geoip.reload();
        }
    });
}
