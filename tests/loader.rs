//! Evaluation fetch against mock endpoints.

use std::sync::Arc;
use std::time::{Duration, Instant};

use prefab_cloud::api::Loader;
use prefab_cloud::{ClientOptions, Context, LoadError};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EVAL_PATH: &str = "^/configs/eval-with-context/[A-Za-z0-9_=-]+$";

fn payload(value: bool) -> Value {
    json!({
        "evaluations": {
            "my-flag": { "value": { "bool": value } }
        },
        "apikeyMetadata": { "keyId": "1" }
    })
}

fn context() -> Context {
    Context::new()
        .with_value("user", "id", "123")
        .with_value("device", "mobile", true)
}

fn loader(endpoints: &[&MockServer], options: ClientOptions) -> Loader {
    let options = options.with_endpoints(endpoints.iter().map(|s| s.uri()));
    Loader::new(reqwest::Client::new(), &options, context())
}

fn options() -> ClientOptions {
    ClientOptions::new("apiKey").with_client_version("prefab-cloud-rust-test")
}

#[tokio::test]
async fn test_sends_auth_and_version_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(EVAL_PATH))
        .and(query_param("collectContextMode", "PERIODIC_EXAMPLE"))
        .and(header("authorization", "Basic dTphcGlLZXk="))
        .and(header("X-PrefabCloud-Client-Version", "prefab-cloud-rust-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload(true)))
        .expect(1)
        .mount(&server)
        .await;

    let loaded = loader(&[&server], options()).load().await.unwrap();
    assert_eq!(loaded["evaluations"]["my-flag"]["value"]["bool"], true);
}

#[tokio::test]
async fn test_slow_first_endpoint_fails_over_within_early_timeout() {
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(payload(false))
                .set_delay(Duration::from_secs(5)),
        )
        .expect(1)
        .mount(&slow)
        .await;

    let fast = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(EVAL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload(true)))
        .expect(1)
        .mount(&fast)
        .await;

    let options = options()
        .with_timeout(Duration::from_secs(5))
        .with_early_timeout_ceiling(Duration::from_millis(200));
    let loader = loader(&[&slow, &fast], options);

    let started = Instant::now();
    let loaded = loader.load().await.unwrap();

    assert_eq!(loaded["evaluations"]["my-flag"]["value"]["bool"], true);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_all_endpoints_failing_returns_last_error() {
    let first = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&first)
        .await;

    let second = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&second)
        .await;

    let err = loader(&[&first, &second], options()).load().await.unwrap_err();
    match err {
        LoadError::Status { endpoint, status } => {
            assert_eq!(status, 503);
            assert_eq!(endpoint, second.uri());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_endpoints_are_tried_once_each_in_order() {
    let server = MockServer::start().await;
    for (prefix, status) in [("first", 500), ("second", 502), ("third", 503)] {
        Mock::given(method("GET"))
            .and(path_regex(format!("^/{}/configs/eval-with-context/", prefix)))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;
    }

    let options = options().with_endpoints(
        ["first", "second", "third"].map(|prefix| format!("{}/{}", server.uri(), prefix)),
    );
    let loader = Loader::new(reqwest::Client::new(), &options, context());

    let err = loader.load().await.unwrap_err();
    assert!(matches!(err, LoadError::Status { status: 503, .. }), "got {err:?}");

    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().split('/').nth(1).unwrap_or_default().to_string())
        .collect();
    assert_eq!(paths, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_success_without_envelope_fails_over() {
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "configs": {} })))
        .expect(1)
        .mount(&broken)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload(true)))
        .expect(1)
        .mount(&healthy)
        .await;

    let loaded = loader(&[&broken, &healthy], options()).load().await.unwrap();
    assert_eq!(loaded["evaluations"]["my-flag"]["value"]["bool"], true);
}

#[tokio::test]
async fn test_last_endpoint_timeout_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(payload(true))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let options = options().with_timeout(Duration::from_millis(200));
    let err = loader(&[&server], options).load().await.unwrap_err();
    assert!(matches!(err, LoadError::Timeout { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_newer_load_supersedes_in_flight_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(payload(true))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let loader = Arc::new(loader(&[&server], options()));

    let first = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move { loader.load().await })
    };
    // Let the first request reach the server.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = loader.load().await;
    let first = first.await.unwrap();

    assert!(matches!(first, Err(LoadError::Superseded)));
    assert!(second.is_ok());
}
