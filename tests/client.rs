//! `Prefab` end to end against mock evaluation and telemetry endpoints.

use std::sync::Arc;
use std::time::Duration;

use prefab_cloud::{Bootstrap, ClientOptions, ConfigValue, Context, Prefab};
use serde_json::{json, Value};
use tokio::sync::mpsc::unbounded_channel;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn evaluations() -> Value {
    json!({
        "evaluations": {
            "my-flag": {
                "value": { "bool": true },
                "configEvaluationMetadata": {
                    "configRowIndex": "0",
                    "conditionalValueIndex": "1",
                    "type": "FEATURE_FLAG",
                    "id": "17",
                    "valueType": "BOOL"
                }
            },
            "greeting": { "value": { "string": "hello" } },
            "retry": { "value": { "duration": { "definition": "PT1.5S", "millis": 1500 } } }
        },
        "apikeyMetadata": { "keyId": "1" }
    })
}

fn user(id: &str) -> Context {
    Context::new().with_value("user", "id", id)
}

fn options(server: &MockServer) -> ClientOptions {
    ClientOptions::new("apiKey")
        .with_endpoints([server.uri()])
        .with_telemetry_endpoint(server.uri())
        // Flush only when asked.
        .with_evaluation_summary_interval(Some(Duration::from_secs(3600)))
}

async fn mount_evaluations(server: &MockServer, expected: u64) {
    Mock::given(method("GET"))
        .and(path_regex("^/configs/eval-with-context/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(evaluations()))
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_init_loads_and_reads() {
    let server = MockServer::start().await;
    mount_evaluations(&server, 1).await;

    let prefab = Prefab::new();
    prefab.init(options(&server), user("1")).await.unwrap();

    assert!(prefab.is_enabled("my-flag"));
    assert_eq!(prefab.get("greeting"), Some(ConfigValue::String("hello".into())));
    assert_eq!(
        prefab.get_duration("retry").and_then(|d| d.as_std()),
        Some(Duration::from_millis(1500))
    );
    assert_eq!(prefab.get("missing"), None);
}

#[tokio::test]
async fn test_matching_bootstrap_skips_network() {
    let server = MockServer::start().await;
    mount_evaluations(&server, 0).await;

    let options = options(&server).with_bootstrap(Bootstrap::new(user("1"), evaluations()));
    let prefab = Prefab::new();
    prefab.init(options, user("1")).await.unwrap();

    assert!(prefab.is_enabled("my-flag"));
}

#[tokio::test]
async fn test_update_context_reloads() {
    let server = MockServer::start().await;
    mount_evaluations(&server, 2).await;

    let prefab = Prefab::new();
    prefab.init(options(&server), user("1")).await.unwrap();
    prefab.update_context(user("2"), false).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].url.path(), requests[1].url.path());
}

#[tokio::test]
async fn test_failed_init_leaves_client_unloaded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let prefab = Prefab::new();
    assert!(prefab.init(options(&server), user("1")).await.is_err());
    assert!(!prefab.is_loaded());
    assert!(!prefab.is_enabled("my-flag"));
}

#[tokio::test]
async fn test_evaluation_summaries_are_uploaded() {
    let server = MockServer::start().await;
    mount_evaluations(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/telemetry"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let prefab = Prefab::new();
    prefab.init(options(&server), user("1")).await.unwrap();

    let (tx, mut rx) = unbounded_channel();
    prefab.set_after_evaluation_callback(Arc::new(move |key, _, _| {
        let _ = tx.send(key.to_string());
    }));

    prefab.get("my-flag");
    prefab.get("my-flag");
    prefab.get("greeting");
    // The summary is recorded before the callback runs.
    for _ in 0..3 {
        rx.recv().await.unwrap();
    }

    prefab.flush_telemetry().await;

    let requests = server.received_requests().await.unwrap();
    let upload = requests
        .iter()
        .find(|r| r.url.path() == "/telemetry")
        .unwrap();
    let body: Value = serde_json::from_slice(&upload.body).unwrap();

    assert_eq!(body["instanceHash"], prefab.instance_hash());
    let summaries = &body["events"][0]["summaries"]["summaries"];
    // `greeting` has no evaluation metadata and is not summarized.
    assert_eq!(summaries.as_array().unwrap().len(), 1);
    assert_eq!(summaries[0]["key"], "my-flag");
    assert_eq!(summaries[0]["type"], "FEATURE_FLAG");
    assert_eq!(
        summaries[0]["counters"][0],
        json!({
            "configId": "17",
            "configRowIndex": 0,
            "conditionalValueIndex": 1,
            "selectedValue": { "bool": true },
            "count": 2
        })
    );

    // The window was emptied; a second flush sends nothing.
    prefab.flush_telemetry().await;
}

#[tokio::test]
async fn test_rejected_telemetry_does_not_affect_reads() {
    let server = MockServer::start().await;
    mount_evaluations(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/telemetry"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let prefab = Prefab::new();
    prefab.init(options(&server), user("1")).await.unwrap();

    let (tx, mut rx) = unbounded_channel();
    prefab.set_after_evaluation_callback(Arc::new(move |key, _, _| {
        let _ = tx.send(key.to_string());
    }));

    assert!(prefab.is_enabled("my-flag"));
    rx.recv().await.unwrap();

    prefab.flush_telemetry().await;

    // Reads and evaluation telemetry keep working after the failed upload.
    assert!(prefab.is_enabled("my-flag"));
    assert_eq!(prefab.get("greeting"), Some(ConfigValue::String("hello".into())));
    assert_eq!(rx.recv().await.unwrap(), "my-flag");
}
