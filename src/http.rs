//! HTTP surface. Built on `hyper` 0.14's `service_fn`/`make_service_fn`
//! pattern, the same one `webrtc-rs/webrtc`'s own `examples/signal` crate
//! uses for its SDP exchange listener. Every handler here only calls into
//! the core (`registry`, `engine`, `client`, `answer`, `codec`) and maps
//! the result to a status code; none of the core crate talks HTTP
//! directly.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Buf;
use hyper::header::HeaderValue;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{debug, error, info, warn};

use crate::answer::dispatch_answer;
use crate::client::match_client_offer;
use crate::codec;
use crate::context::BrokerContext;
use crate::engine::{PollOutcome, ProxyPollRequest};
use crate::error::BrokerError;
use crate::slot::{ClientOffer, NatType};

/// Inbound HTTP bodies are capped at 100,000 bytes; excess is an immediate
/// `BadRequest`.
pub const MAX_BODY_BYTES: u64 = 100_000;

pub async fn serve(ctx: Arc<BrokerContext>, addr: SocketAddr) -> crate::error::Result<()> {
    let listener = std::net::TcpListener::bind(addr)?;
    serve_on(ctx, listener).await
}

/// Like [`serve`], but over an already-bound listener — lets callers (the
/// binary, or `tests/broker.rs`) bind to an ephemeral port and learn the
/// real address before the server starts accepting.
pub async fn serve_on(
    ctx: Arc<BrokerContext>,
    listener: std::net::TcpListener,
) -> crate::error::Result<()> {
    let addr = listener.local_addr()?;
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let ctx = Arc::clone(&ctx);
        let remote_addr = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle(Arc::clone(&ctx), remote_addr, req)
            }))
        }
    });
    info!("snowflake broker listening on {addr}");
    let server = Server::from_tcp(listener)
        .map_err(|e| BrokerError::Io(std::io::Error::other(e.to_string())))?
        .serve(make_svc);
    if let Err(e) = server.await {
        error!("http server error: {e}");
        return Err(BrokerError::Io(std::io::Error::other(e.to_string())));
    }
    Ok(())
}

/// TLS variant of [`serve`]: accepts raw TCP connections, completes the
/// rustls handshake on each, then drives the same hyper service over the
/// resulting stream. One task per connection, matching hyper's own
/// per-connection model for the plain listener above.
pub async fn serve_tls(
    ctx: Arc<BrokerContext>,
    addr: SocketAddr,
    tls_config: Arc<rustls::ServerConfig>,
) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let acceptor = tokio_rustls::TlsAcceptor::from(tls_config);
    info!("snowflake broker listening on {addr} (tls)");
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("tls accept error: {e}");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("tls handshake failed from {remote_addr}: {e}");
                    return;
                }
            };
            let service = service_fn(move |req| handle(Arc::clone(&ctx), remote_addr, req));
            if let Err(e) = hyper::server::conn::Http::new()
                .serve_connection(tls_stream, service)
                .await
            {
                warn!("connection error from {remote_addr}: {e}");
            }
        });
    }
}

async fn handle(
    ctx: Arc<BrokerContext>,
    remote_addr: SocketAddr,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() == Method::OPTIONS {
        return Ok(with_cors(Response::new(Body::empty())));
    }
    if let Some(country) = ctx.geoip.country(remote_addr.ip()) {
        debug!("{} {} from country={country}", req.method(), req.uri().path());
    }
    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/proxy") => handle_proxy(&ctx, req).await,
        (&Method::POST, "/client") => handle_client(&ctx, req).await,
        (&Method::POST, "/answer") => handle_answer(&ctx, req).await,
        (&Method::GET, "/debug") => Ok(handle_debug(&ctx)),
        (&Method::GET, "/robots.txt") => Ok(handle_robots()),
        (&Method::GET, "/metrics") => Ok(handle_metrics_log(&ctx)),
        (&Method::GET, "/prometheus") => Ok(handle_prometheus(&ctx)),
        _ => Ok(status_only(StatusCode::NOT_FOUND)),
    };
    Ok(with_cors(response.unwrap_or_else(error_response)))
}

fn with_cors(mut resp: Response<Body>) -> Response<Body> {
    resp.headers_mut().insert(
        "Access-Control-Allow-Origin",
        HeaderValue::from_static("*"),
    );
    resp
}

fn status_only(status: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = status;
    resp
}

fn error_response(err: BrokerError) -> Response<Body> {
    let status = match &err {
        BrokerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        BrokerError::NoProxyAvailable => StatusCode::SERVICE_UNAVAILABLE,
        BrokerError::MatchTimeout => StatusCode::GATEWAY_TIMEOUT,
        BrokerError::InternalEncodeFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        BrokerError::NotBuilt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        BrokerError::Io(_) | BrokerError::Tls(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = match &err {
        BrokerError::MatchTimeout => "timed out waiting for answer!".to_string(),
        other => other.to_string(),
    };
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp
}

/// Reads the request body, rejecting anything over [`MAX_BODY_BYTES`]
/// either by `Content-Length` or by actual streamed size.
async fn read_capped_body(req: Request<Body>) -> Result<Vec<u8>, BrokerError> {
    if let Some(len) = req.headers().get(hyper::header::CONTENT_LENGTH) {
        if let Ok(len) = len.to_str().unwrap_or_default().parse::<u64>() {
            if len > MAX_BODY_BYTES {
                return Err(BrokerError::BadRequest("body too large".into()));
            }
        }
    }
    let mut body = req.into_body();
    let mut buf = Vec::new();
    while let Some(chunk) = hyper::body::HttpBody::data(&mut body).await {
        let chunk = chunk.map_err(|e| BrokerError::BadRequest(format!("body read error: {e}")))?;
        if buf.len() as u64 + chunk.remaining() as u64 > MAX_BODY_BYTES {
            return Err(BrokerError::BadRequest("body too large".into()));
        }
        buf.extend_from_slice(chunk.chunk());
    }
    Ok(buf)
}

async fn handle_proxy(ctx: &Arc<BrokerContext>, req: Request<Body>) -> Result<Response<Body>, BrokerError> {
    let body = read_capped_body(req).await?;
    let (sid, proxy_type, nat_type) = codec::decode_poll_request(&body)?;

    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    ctx.engine
        .submit(ProxyPollRequest {
            id: sid,
            proxy_type,
            nat_type,
            reply_tx,
        })
        .await
        .map_err(|_| BrokerError::Io(std::io::Error::other("engine channel closed")))?;

    let outcome = reply_rx
        .await
        .map_err(|_| BrokerError::Io(std::io::Error::other("engine dropped the poll reply")))?;

    let (sdp, matched, offer_nat) = match outcome {
        PollOutcome::Offer(offer) => (offer.sdp, true, offer.nat_type),
        PollOutcome::Idle => (Vec::new(), false, NatType::Unknown),
    };
    let body = codec::encode_poll_response(&sdp, matched, offer_nat)?;
    Ok(json_response(StatusCode::OK, body))
}

async fn handle_client(ctx: &Arc<BrokerContext>, req: Request<Body>) -> Result<Response<Body>, BrokerError> {
    let nat_type: NatType = req
        .headers()
        .get("Snowflake-NAT-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .parse()
        .unwrap_or(NatType::Unknown);

    let sdp = read_capped_body(req).await?;
    if sdp.is_empty() {
        return Err(BrokerError::BadRequest("empty client offer".into()));
    }
    let offer = ClientOffer { sdp, nat_type };

    let result = match_client_offer(&ctx.registry, &ctx.metrics, offer, ctx.client_timeout).await?;
    Ok(Response::new(Body::from(result.answer_sdp)))
}

async fn handle_answer(ctx: &Arc<BrokerContext>, req: Request<Body>) -> Result<Response<Body>, BrokerError> {
    let body = read_capped_body(req).await?;
    let (answer_sdp, id) = codec::decode_answer_request(&body)?;
    let success = dispatch_answer(&ctx.registry, &id, answer_sdp);
    let body = codec::encode_answer_response(success)?;
    Ok(json_response(StatusCode::OK, body))
}

fn handle_debug(ctx: &Arc<BrokerContext>) -> Response<Body> {
    let snapshot = ctx.registry.snapshot();
    let mut text = format!("current snowflakes: {}\n", snapshot.total);
    for (proxy_type, count) in &snapshot.by_proxy_type {
        text.push_str(&format!("  {proxy_type}: {count}\n"));
    }
    for (nat_type, count) in &snapshot.by_nat_type {
        text.push_str(&format!("  nat {nat_type}: {count}\n"));
    }
    Response::new(Body::from(text))
}

fn handle_robots() -> Response<Body> {
    Response::new(Body::from("User-agent: *\nDisallow: /\n"))
}

fn handle_metrics_log(ctx: &Arc<BrokerContext>) -> Response<Body> {
    match &ctx.metrics_log_path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(contents) => Response::new(Body::from(contents)),
            Err(e) => {
                warn!("failed to read metrics log {}: {e}", path.display());
                status_only(StatusCode::NOT_FOUND)
            }
        },
        None => status_only(StatusCode::NOT_FOUND),
    }
}

fn handle_prometheus(ctx: &Arc<BrokerContext>) -> Response<Body> {
    Response::new(Body::from(ctx.prometheus_handle.render()))
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<Body> {
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}
