//! End-to-end scenarios against the HTTP surface. Each test binds the
//! broker to an ephemeral port, drives it with raw `hyper` requests, and
//! asserts on the wire-level contract.

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;

use hyper::{Body, Client, Method, Request, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;
use snowflake_broker::context::BrokerContext;
use snowflake_broker::geoip::GeoIp;
use snowflake_broker::http;

async fn spawn_broker(proxy_timeout: Duration, client_timeout: Duration) -> String {
    let (_recorder, handle) = PrometheusBuilder::new().build_recorder();
    let ctx = Arc::new(BrokerContext::new(
        handle,
        GeoIp::load(None, None),
        proxy_timeout,
        client_timeout,
        None,
    ));
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(http::serve_on(ctx, listener));
    // Give the listener a moment to start accepting.
    tokio::time::sleep(Duration::from_millis(20)).await;
    format!("http://{addr}")
}

fn poll_body(sid: &str, proxy_type: &str, nat_type: &str) -> Body {
    Body::from(format!(
        r#"{{"sid":"{sid}","proxyType":"{proxy_type}","natType":"{nat_type}"}}"#
    ))
}

async fn post(client: &Client<hyper::client::HttpConnector>, url: &str, body: Body) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(url)
        .body(body)
        .unwrap();
    let resp = client.request(req).await.unwrap();
    let status = resp.status();
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

async fn post_with_header(
    client: &Client<hyper::client::HttpConnector>,
    url: &str,
    header: (&str, &str),
    body: Body,
) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(url)
        .header(header.0, header.1)
        .body(body)
        .unwrap();
    let resp = client.request(req).await.unwrap();
    let status = resp.status();
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

/// Scenario 1: happy path match.
#[tokio::test(flavor = "multi_thread")]
async fn happy_path_match() {
    let base = spawn_broker(Duration::from_secs(10), Duration::from_secs(10)).await;
    let client = Client::new();

    let proxy_poll = {
        let base = base.clone();
        let client = client.clone();
        tokio::spawn(async move {
            post(
                &client,
                &format!("{base}/proxy"),
                poll_body("p1", "standalone", "unrestricted"),
            )
            .await
        })
    };
    // Let the proxy's poll register before the client offers.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let (client_status, client_body) = post_with_header(
        &client,
        &format!("{base}/client"),
        ("Snowflake-NAT-Type", "restricted"),
        Body::from("OFFER-SDP"),
    )
    .await;
    assert_eq!(client_status, StatusCode::OK);

    let (poll_status, poll_body) = proxy_poll.await.unwrap();
    assert_eq!(poll_status, StatusCode::OK);
    let poll_json: serde_json::Value = serde_json::from_slice(&poll_body).unwrap();
    assert_eq!(poll_json["sdp"], "OFFER-SDP");
    assert_eq!(poll_json["natType"], "restricted");
    assert_eq!(poll_json["matched"], true);

    let (answer_status, answer_body) = post(
        &client,
        &format!("{base}/answer"),
        Body::from(r#"{"id":"p1","answerSdp":"ANSWER-SDP"}"#),
    )
    .await;
    assert_eq!(answer_status, StatusCode::OK);
    let answer_json: serde_json::Value = serde_json::from_slice(&answer_body).unwrap();
    assert_eq!(answer_json["success"], true);

    assert_eq!(client_body, b"ANSWER-SDP");
}

/// Scenario 2: no proxy available.
#[tokio::test(flavor = "multi_thread")]
async fn no_proxy_available_denies_the_client() {
    let base = spawn_broker(Duration::from_secs(10), Duration::from_secs(10)).await;
    let client = Client::new();

    let (status, body) = post_with_header(
        &client,
        &format!("{base}/client"),
        ("Snowflake-NAT-Type", ""),
        Body::from("OFFER-SDP"),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!body.is_empty());
}

/// Scenario 3: proxy poll times out with no client.
#[tokio::test(flavor = "multi_thread")]
async fn proxy_poll_times_out_when_idle() {
    let base = spawn_broker(Duration::from_millis(80), Duration::from_secs(10)).await;
    let client = Client::new();

    let (status, body) = post(
        &client,
        &format!("{base}/proxy"),
        poll_body("p1", "standalone", "unrestricted"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["matched"], false);

    // The slot should be gone: a subsequent answer for it fails.
    let (answer_status, answer_body) = post(
        &client,
        &format!("{base}/answer"),
        Body::from(r#"{"id":"p1","answerSdp":"ANSWER-SDP"}"#),
    )
    .await;
    assert_eq!(answer_status, StatusCode::OK);
    let answer_json: serde_json::Value = serde_json::from_slice(&answer_body).unwrap();
    assert_eq!(answer_json["success"], false);
}

/// Scenario 4: client times out waiting for an answer.
#[tokio::test(flavor = "multi_thread")]
async fn client_times_out_waiting_for_answer() {
    let base = spawn_broker(Duration::from_secs(10), Duration::from_millis(80)).await;
    let client = Client::new();

    let proxy_poll = {
        let base = base.clone();
        let client = client.clone();
        tokio::spawn(async move {
            post(
                &client,
                &format!("{base}/proxy"),
                poll_body("p1", "standalone", "unrestricted"),
            )
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let (status, body) = post_with_header(
        &client,
        &format!("{base}/client"),
        ("Snowflake-NAT-Type", "restricted"),
        Body::from("OFFER-SDP"),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body, b"timed out waiting for answer!");

    let (poll_status, poll_body) = proxy_poll.await.unwrap();
    assert_eq!(poll_status, StatusCode::OK);
    let poll_json: serde_json::Value = serde_json::from_slice(&poll_body).unwrap();
    assert_eq!(poll_json["matched"], true);

    let (answer_status, answer_body) = post(
        &client,
        &format!("{base}/answer"),
        Body::from(r#"{"id":"p1","answerSdp":"TOO-LATE"}"#),
    )
    .await;
    assert_eq!(answer_status, StatusCode::OK);
    let answer_json: serde_json::Value = serde_json::from_slice(&answer_body).unwrap();
    assert_eq!(answer_json["success"], false);
}

/// Scenario 5: NAT compatibility never crosses restricted-restricted.
#[tokio::test(flavor = "multi_thread")]
async fn nat_compatibility_is_respected() {
    let base = spawn_broker(Duration::from_secs(10), Duration::from_secs(10)).await;
    let client = Client::new();

    let poll_pr = {
        let base = base.clone();
        let client = client.clone();
        tokio::spawn(async move {
            post(&client, &format!("{base}/proxy"), poll_body("P-R", "standalone", "restricted")).await
        })
    };
    let poll_pu = {
        let base = base.clone();
        let client = client.clone();
        tokio::spawn(async move {
            post(&client, &format!("{base}/proxy"), poll_body("P-U", "standalone", "unrestricted")).await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    // C-U (unrestricted) must draw from the restricted heap -> P-R.
    let (status, _) = post_with_header(
        &client,
        &format!("{base}/client"),
        ("Snowflake-NAT-Type", "unrestricted"),
        Body::from("OFFER-CU"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, pr_poll_body) = poll_pr.await.unwrap();
    let pr_json: serde_json::Value = serde_json::from_slice(&pr_poll_body).unwrap();
    assert_eq!(pr_json["sdp"], "OFFER-CU");

    // C-R (restricted) must draw from the unrestricted heap -> P-U.
    let (status, _) = post_with_header(
        &client,
        &format!("{base}/client"),
        ("Snowflake-NAT-Type", "restricted"),
        Body::from("OFFER-CR"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, pu_poll_body) = poll_pu.await.unwrap();
    let pu_json: serde_json::Value = serde_json::from_slice(&pu_poll_body).unwrap();
    assert_eq!(pu_json["sdp"], "OFFER-CR");
}

/// Scenario 6: fairness under ties — five equally-fresh proxies are
/// matched in strict insertion order.
#[tokio::test(flavor = "multi_thread")]
async fn fairness_under_ties_preserves_insertion_order() {
    let base = spawn_broker(Duration::from_secs(10), Duration::from_secs(10)).await;
    let client = Client::new();

    let mut polls = Vec::new();
    for id in ["P1", "P2", "P3", "P4", "P5"] {
        let base = base.clone();
        let client = client.clone();
        let id = id.to_string();
        polls.push(tokio::spawn(async move {
            post(&client, &format!("{base}/proxy"), poll_body(&id, "standalone", "unrestricted")).await
        }));
        // Stagger insertion so `sequence` ordering is unambiguous.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut matched_order = Vec::new();
    for i in 0..5 {
        let offer = format!("OFFER-{i}");
        let (status, _) = post_with_header(
            &client,
            &format!("{base}/client"),
            ("Snowflake-NAT-Type", "restricted"),
            Body::from(offer.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        matched_order.push(offer);
    }

    let mut poll_offers = Vec::new();
    for poll in polls {
        let (_, body) = poll.await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        poll_offers.push(json["sdp"].as_str().unwrap().to_string());
    }
    assert_eq!(poll_offers, matched_order);
}

#[tokio::test(flavor = "multi_thread")]
async fn robots_txt_and_cors_headers() {
    let base = spawn_broker(Duration::from_secs(10), Duration::from_secs(10)).await;
    let client = Client::new();
    let req = Request::builder()
        .method(Method::GET)
        .uri(format!("{base}/robots.txt"))
        .body(Body::empty())
        .unwrap();
    let resp = client.request(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("Access-Control-Allow-Origin").unwrap(),
        "*"
    );
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    assert_eq!(body, "User-agent: *\nDisallow: /\n".as_bytes());
}
