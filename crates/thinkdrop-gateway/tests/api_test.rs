use std::net::SocketAddr;
use std::sync::Arc;

use thinkdrop_config::AppConfig;
use thinkdrop_embed::FallbackBackend;
use thinkdrop_gateway::{Application, GatewayServer};

const API_KEY: &str = "test-key";

async fn start_test_server() -> (SocketAddr, Application, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");

    let mut config = AppConfig::default();
    config.server.api_keys = vec![API_KEY.to_string()];
    config.database.path = dir.path().join("memory.db");
    config.monitor.enabled = false;
    config.retention.enabled = false;

    let app = Application::build(config, Arc::new(FallbackBackend), None)
        .await
        .expect("application builds");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind random port");
    let addr = listener.local_addr().expect("local addr");

    let server = GatewayServer::new(app.state());
    let shutdown = app.shutdown_receiver();
    tokio::spawn(async move {
        let _ = server.serve_on(listener, shutdown).await;
    });

    (addr, app, dir)
}

fn envelope(action: &str, request_id: &str, payload: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "version": "mcp.v1",
        "service": "user-memory",
        "action": action,
        "requestId": request_id,
        "context": { "userId": "u1" },
        "payload": payload,
    })
}

async fn call(
    addr: SocketAddr,
    action: &str,
    body: serde_json::Value,
) -> (reqwest::StatusCode, serde_json::Value) {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/{action}"))
        .header("Authorization", format!("Bearer {API_KEY}"))
        .json(&body)
        .send()
        .await
        .expect("request succeeds");
    let status = response.status();
    let json = response.json().await.expect("json body");
    (status, json)
}

#[tokio::test]
async fn health_and_capabilities_are_unauthenticated() {
    let (addr, _app, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("http://{addr}/service.health"))
        .send()
        .await
        .expect("health request")
        .json()
        .await
        .expect("health json");
    assert_eq!(health["status"], "ok");

    let caps: serde_json::Value = client
        .get(format!("http://{addr}/service.capabilities"))
        .send()
        .await
        .expect("capabilities request")
        .json()
        .await
        .expect("capabilities json");
    assert!(
        caps["actions"]
            .as_array()
            .expect("actions array")
            .iter()
            .any(|a| a == "memory.store")
    );
}

#[tokio::test]
async fn missing_bearer_is_rejected_with_401_envelope() {
    let (addr, _app, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/memory.store"))
        .json(&envelope("memory.store", "r1", serde_json::json!({"text": "x"})))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 401);

    let body: serde_json::Value = response.json().await.expect("json");
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn malformed_envelope_is_invalid_request() {
    let (addr, _app, _dir) = start_test_server().await;

    let (status, body) = call(
        addr,
        "memory.store",
        serde_json::json!({ "version": "mcp.v0", "bogus": true }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn unknown_action_is_invalid_request() {
    let (addr, _app, _dir) = start_test_server().await;

    let (status, body) = call(
        addr,
        "memory.explode",
        envelope("memory.explode", "r1", serde_json::json!({})),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn store_retrieve_round_trip() {
    let (addr, _app, _dir) = start_test_server().await;

    let (status, stored) = call(
        addr,
        "memory.store",
        envelope(
            "memory.store",
            "r1",
            serde_json::json!({
                "text": "Meeting with Dr. Smith tomorrow at 3pm",
                "entities": [{ "type": "person", "value": "Dr. Smith" }],
            }),
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(stored["status"], "ok");
    assert_eq!(stored["requestId"], "r1");
    assert_eq!(stored["data"]["stored"], true);
    assert_eq!(stored["data"]["entities"], 1);
    assert_eq!(stored["data"]["embeddingDimensions"], 384);

    let memory_id = stored["data"]["memoryId"].as_str().expect("memory id");
    let (status, retrieved) = call(
        addr,
        "memory.retrieve",
        envelope(
            "memory.retrieve",
            "r2",
            serde_json::json!({ "memoryId": memory_id }),
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        retrieved["data"]["sourceText"],
        "Meeting with Dr. Smith tomorrow at 3pm"
    );
    let entities = retrieved["data"]["entities"].as_array().expect("entities");
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0]["entity"], "Dr. Smith");
}

#[tokio::test]
async fn search_returns_the_stored_memory() {
    let (addr, _app, _dir) = start_test_server().await;

    let (_, stored) = call(
        addr,
        "memory.store",
        envelope(
            "memory.store",
            "r1",
            serde_json::json!({ "text": "I have an appointment with Dr. Johnson next Tuesday" }),
        ),
    )
    .await;
    let memory_id = stored["data"]["memoryId"].as_str().expect("memory id");

    let (status, results) = call(
        addr,
        "memory.search",
        envelope(
            "memory.search",
            "r2",
            serde_json::json!({
                "query": "appointment with Dr. Johnson",
                "minSimilarity": 0.3,
            }),
        ),
    )
    .await;
    assert_eq!(status, 200);
    let hits = results["data"]["results"].as_array().expect("results");
    assert!(!hits.is_empty(), "expected at least one hit");
    assert!(hits.iter().any(|h| h["id"] == memory_id));
    assert!(hits.iter().all(|h| h["similarity"].as_f64().expect("sim") >= 0.3));
}

#[tokio::test]
async fn delete_is_idempotent_and_retrieve_404s_after() {
    let (addr, _app, _dir) = start_test_server().await;

    let (_, stored) = call(
        addr,
        "memory.store",
        envelope(
            "memory.store",
            "r1",
            serde_json::json!({ "text": "to be deleted shortly" }),
        ),
    )
    .await;
    let memory_id = stored["data"]["memoryId"].as_str().expect("memory id");

    let (status, first) = call(
        addr,
        "memory.delete",
        envelope("memory.delete", "r2", serde_json::json!({ "memoryId": memory_id })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(first["data"]["deleted"], true);

    let (status, second) = call(
        addr,
        "memory.delete",
        envelope("memory.delete", "r3", serde_json::json!({ "memoryId": memory_id })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(second["data"]["deleted"], false);

    let (status, retrieved) = call(
        addr,
        "memory.retrieve",
        envelope("memory.retrieve", "r4", serde_json::json!({ "memoryId": memory_id })),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(retrieved["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn classifier_actions_follow_context() {
    let (addr, _app, _dir) = start_test_server().await;

    let mut with_context = envelope(
        "memory.classify-conversational-query",
        "r1",
        serde_json::json!({ "query": "what did I say first?" }),
    );
    with_context["context"] = serde_json::json!({ "sessionId": "s1", "messageCount": 5 });

    let (status, body) = call(addr, "memory.classify-conversational-query", with_context).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["classification"], "POSITIONAL");
    assert_eq!(body["data"]["isConversational"], true);
    assert!(body["data"]["confidence"].as_f64().expect("confidence") >= 0.90);

    let without_context = envelope(
        "memory.classify-conversational-query",
        "r2",
        serde_json::json!({ "query": "what did I say first?" }),
    );
    let (_, body) = call(addr, "memory.classify-conversational-query", without_context).await;
    assert_eq!(body["data"]["classification"], "GENERAL");

    let mut overview = envelope(
        "memory.classify-conversational-query",
        "r3",
        serde_json::json!({ "query": "summarize our conversation" }),
    );
    overview["context"] = serde_json::json!({ "sessionId": "s1", "messageCount": 5 });
    let (_, body) = call(addr, "memory.classify-conversational-query", overview).await;
    assert_eq!(body["data"]["classification"], "OVERVIEW");
}

#[tokio::test]
async fn update_reembeds_and_search_prefers_new_wording() {
    let (addr, _app, _dir) = start_test_server().await;

    let (_, stored) = call(
        addr,
        "memory.store",
        envelope("memory.store", "r1", serde_json::json!({ "text": "Meeting on Tuesday" })),
    )
    .await;
    let memory_id = stored["data"]["memoryId"].as_str().expect("memory id");

    call(
        addr,
        "memory.store",
        envelope("memory.store", "r2", serde_json::json!({ "text": "Coffee on Friday" })),
    )
    .await;

    let (status, updated) = call(
        addr,
        "memory.update",
        envelope(
            "memory.update",
            "r3",
            serde_json::json!({ "memoryId": memory_id, "text": "Meeting on Wednesday" }),
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(updated["data"]["sourceText"], "Meeting on Wednesday");

    let (_, results) = call(
        addr,
        "memory.search",
        envelope(
            "memory.search",
            "r4",
            serde_json::json!({ "query": "Wednesday meeting", "minSimilarity": 0.0 }),
        ),
    )
    .await;
    let hits = results["data"]["results"].as_array().expect("results");
    let updated_rank = hits
        .iter()
        .position(|h| h["id"] == memory_id)
        .expect("updated record in results");
    let control_rank = hits
        .iter()
        .position(|h| h["sourceText"] == "Coffee on Friday");
    if let Some(control_rank) = control_rank {
        assert!(updated_rank < control_rank, "updated record should rank above control");
    }
}

#[tokio::test]
async fn skill_registry_round_trip_with_sandbox_enforcement() {
    let (addr, _app, _dir) = start_test_server().await;

    let (status, installed) = call(
        addr,
        "skills.install",
        envelope(
            "skills.install",
            "r1",
            serde_json::json!({
                "name": "mail.compose",
                "description": "Draft emails",
                "execPath": "mail/run.js",
                "execType": "node",
            }),
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(installed["data"]["name"], "mail.compose");

    let (status, escape) = call(
        addr,
        "skills.install",
        envelope(
            "skills.install",
            "r2",
            serde_json::json!({
                "name": "esc.try",
                "execPath": "../../etc/passwd",
                "execType": "shell",
            }),
        ),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(escape["error"]["code"], "INVALID_REQUEST");

    let (_, listed) = call(
        addr,
        "skills.list",
        envelope("skills.list", "r3", serde_json::json!({})),
    )
    .await;
    assert_eq!(listed["data"]["total"], 1);
}

#[tokio::test]
async fn context_rules_round_trip() {
    let (addr, _app, _dir) = start_test_server().await;

    let (status, _) = call(
        addr,
        "context-rules.set",
        envelope(
            "context-rules.set",
            "r1",
            serde_json::json!({
                "contextType": "site",
                "contextKey": "GitHub.com",
                "ruleText": "prefer concise answers",
            }),
        ),
    )
    .await;
    assert_eq!(status, 200);

    let (_, found) = call(
        addr,
        "context-rules.get",
        envelope(
            "context-rules.get",
            "r2",
            serde_json::json!({ "contextType": "site", "contextKey": "github.com" }),
        ),
    )
    .await;
    assert_eq!(found["data"]["total"], 1);
    assert_eq!(found["data"]["rules"][0]["ruleText"], "prefer concise answers");
}
