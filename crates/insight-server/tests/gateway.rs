use std::sync::Arc;
use std::time::Duration;

use insight_config::InvocationLog;
use insight_contracts::{
    ActivitySnapshot, AlertSnapshot, ContactSnapshot, ContactSummaryRequest, DealSnapshot,
    DigestRequest, DigestStats, InvocationStatus, JobType, NextStepRequest, TaskSnapshot,
    Timeframe,
};
use insight_server::{
    GatewaySettings, HttpCompletionClient, InsightCache, InsightGateway, InvocationLogger,
    MemoryLog,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "gpt-4o-mini";

fn settings(ttl: Duration) -> GatewaySettings {
    GatewaySettings {
        model: MODEL.to_string(),
        max_tokens: 700,
        digest_ttl: ttl,
        max_items: 5,
    }
}

fn gateway_with(
    server: &MockServer,
    key: Option<&str>,
    ttl: Duration,
) -> (InsightGateway, MemoryLog) {
    let client = HttpCompletionClient::new(
        &server.uri(),
        key.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap();
    let (logger, log) = InvocationLogger::memory();
    let gateway = InsightGateway::new(
        Arc::new(client),
        Arc::new(InsightCache::new()),
        logger,
        settings(ttl),
    );
    (gateway, log)
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": MODEL,
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 300, "completion_tokens": 80, "total_tokens": 380}
    }))
}

async fn statuses(gateway: &InsightGateway, log: &MemoryLog) -> Vec<InvocationStatus> {
    gateway.logger().flush().await;
    log.records().into_iter().map(|r| r.status).collect()
}

fn deal(id: &str, title: &str) -> DealSnapshot {
    DealSnapshot {
        id: id.to_string(),
        title: title.to_string(),
        stage: "negotiation".to_string(),
        priority: Some("high".to_string()),
        amount: Some(12000.0),
        currency: Some("EUR".to_string()),
        ..Default::default()
    }
}

fn digest_request(fallback: &str) -> DigestRequest {
    DigestRequest {
        timeframe: Timeframe::Today,
        stats: DigestStats {
            hot_deals: 2,
            risk_deals: 1,
            overdue_tasks: 3,
        },
        top_deals: vec![deal("d1", "ACME renovación"), deal("d2", "Globex piloto")],
        alerts: vec![AlertSnapshot {
            id: "a1".to_string(),
            deal_id: Some("d2".to_string()),
            kind: "stalled".to_string(),
            severity: "warning".to_string(),
            message: "Sin actividad en 14 días".to_string(),
            ..Default::default()
        }],
        fallback_text: fallback.to_string(),
        metadata: Default::default(),
    }
}

fn next_step_request() -> NextStepRequest {
    NextStepRequest {
        deal: deal("d1", "ACME renovación"),
        recent_activities: vec![ActivitySnapshot {
            kind: "call".to_string(),
            occurred_at: "2026-10-14".to_string(),
            summary: "Pidieron descuento por volumen".to_string(),
        }],
        open_tasks: vec![TaskSnapshot {
            title: "Enviar propuesta revisada".to_string(),
            due_date: Some("2026-10-18".to_string()),
            status: Some("open".to_string()),
        }],
        fallback_text: "Llamar al cliente".to_string(),
        metadata: Default::default(),
    }
}

fn contact_request(fallback: &str) -> ContactSummaryRequest {
    ContactSummaryRequest {
        contact: ContactSnapshot {
            id: "c1".to_string(),
            name: "Lucía Pérez".to_string(),
            company: Some("ACME".to_string()),
            role: Some("CFO".to_string()),
            ..Default::default()
        },
        deals: vec![deal("d1", "ACME renovación")],
        recent_activities: vec![],
        fallback_text: fallback.to_string(),
        metadata: Default::default(),
    }
}

#[tokio::test]
async fn missing_credential_falls_back_without_calling_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("{}"))
        .expect(0)
        .mount(&server)
        .await;
    let (gateway, log) = gateway_with(&server, None, Duration::from_secs(300));

    let result = gateway
        .generate_digest(&digest_request("Resumen estándar"))
        .await;

    let body = serde_json::to_value(&result).unwrap();
    assert_eq!(body["provider"], "fallback");
    assert_eq!(body["usedFallback"], true);
    assert_eq!(body["content"], "Resumen estándar");
    assert_eq!(body["headline"], Value::Null);
    assert_eq!(body["summary"], Value::Null);
    assert_eq!(body["actions"], Value::Null);
    assert!(result.error.unwrap().contains("missing credential"));
    assert_eq!(statuses(&gateway, &log).await, vec![InvocationStatus::Fallback]);
}

#[tokio::test]
async fn success_is_cached_and_second_call_is_a_hit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion(
            r#"{"headline": "Dos cierres a la vista", "summary": ["ACME y Globex avanzan."], "actions": ["Llamar a ACME", "Reactivar Globex"]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    let (gateway, log) = gateway_with(&server, Some("sk-test"), Duration::from_secs(300));

    let first = gateway.generate_digest(&digest_request("R")).await;
    let second = gateway.generate_digest(&digest_request("R")).await;

    assert_eq!(first, second);
    assert!(!first.used_fallback);
    assert_eq!(first.provider, MODEL);
    assert_eq!(
        first.content.as_deref(),
        Some("Dos cierres a la vista\nACME y Globex avanzan.\nLlamar a ACME\nReactivar Globex")
    );
    assert_eq!(
        statuses(&gateway, &log).await,
        vec![InvocationStatus::Success, InvocationStatus::CacheHit]
    );
}

#[tokio::test]
async fn cache_key_ignores_request_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(r#"{"headline": "Hola"}"#))
        .expect(1)
        .mount(&server)
        .await;
    let (gateway, _log) = gateway_with(&server, Some("sk-test"), Duration::from_secs(300));

    let mut tagged = digest_request("R");
    tagged
        .metadata
        .insert("requestId".to_string(), json!("req-42"));
    gateway.generate_digest(&digest_request("R")).await;
    let hit = gateway.generate_digest(&tagged).await;
    assert_eq!(hit.headline.as_deref(), Some("Hola"));
}

#[tokio::test]
async fn zero_ttl_disables_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(r#"{"headline": "Hola"}"#))
        .expect(2)
        .mount(&server)
        .await;
    let (gateway, log) = gateway_with(&server, Some("sk-test"), Duration::ZERO);

    gateway.generate_digest(&digest_request("R")).await;
    gateway.generate_digest(&digest_request("R")).await;
    assert_eq!(
        statuses(&gateway, &log).await,
        vec![InvocationStatus::Success, InvocationStatus::Success]
    );
}

#[tokio::test]
async fn upstream_failure_uses_fallback_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;
    let (gateway, log) = gateway_with(&server, Some("sk-test"), Duration::from_secs(300));

    let result = gateway.generate_digest(&digest_request("Resumen")).await;
    assert_eq!(result.provider, "fallback-error");
    assert!(result.used_fallback);
    assert_eq!(result.content.as_deref(), Some("Resumen"));
    assert_eq!(result.error.as_deref(), Some("upstream returned HTTP 500"));

    gateway.logger().flush().await;
    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, InvocationStatus::Error);
    assert_eq!(records[0].error_message.as_deref(), Some("upstream returned HTTP 500"));
}

#[tokio::test]
async fn all_null_fields_fall_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(
            r#"{"headline": null, "summary": null, "actions": null}"#,
        ))
        .mount(&server)
        .await;
    let (gateway, log) = gateway_with(&server, Some("sk-test"), Duration::from_secs(300));

    let result = gateway.generate_digest(&digest_request("Resumen")).await;
    assert_eq!(result.provider, "fallback");
    assert!(result.used_fallback);
    assert_eq!(result.content.as_deref(), Some("Resumen"));

    gateway.logger().flush().await;
    let records = log.records();
    assert_eq!(records[0].status, InvocationStatus::Fallback);
    assert_eq!(records[0].total_tokens, Some(380));
}

#[tokio::test]
async fn spanish_keys_in_a_fenced_reply_are_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(
            "```json\n{\"resumen\": \"x\", \"acciones\": [{\"accion\": \"Enviar propuesta\", \"prioridad\": \"alta\"}]}\n```",
        ))
        .mount(&server)
        .await;
    let (gateway, _log) = gateway_with(&server, Some("sk-test"), Duration::from_secs(300));

    let result = gateway.generate_digest(&digest_request("R")).await;
    assert_eq!(result.summary, Some(vec!["x".to_string()]));
    assert_eq!(
        result.actions,
        Some(vec!["Enviar propuesta (Prioridad alta)".to_string()])
    );
}

#[tokio::test]
async fn concurrent_misses_each_return_a_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(r#"{"headline": "Hola"}"#))
        .mount(&server)
        .await;
    let (gateway, log) = gateway_with(&server, Some("sk-test"), Duration::from_secs(300));
    let gateway = Arc::new(gateway);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let gw = gateway.clone();
        handles.push(tokio::spawn(async move {
            gw.generate_digest(&digest_request("R")).await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.headline.as_deref(), Some("Hola"));
    }

    gateway.logger().flush().await;
    assert_eq!(log.records().len(), 4);
}

#[tokio::test]
async fn next_step_success_synthesizes_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(
            r#"{"recomendacion": "Agendar llamada con el CFO", "razones": ["Pidió descuento", "Propuesta vence pronto"]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    let (gateway, log) = gateway_with(&server, Some("sk-test"), Duration::from_secs(300));

    let result = gateway.generate_next_step(&next_step_request()).await;
    assert!(!result.used_fallback);
    assert_eq!(
        result.recommendation.as_deref(),
        Some("Agendar llamada con el CFO")
    );
    assert_eq!(
        result.content.as_deref(),
        Some("Agendar llamada con el CFO\nPidió descuento\nPropuesta vence pronto")
    );

    gateway.logger().flush().await;
    let records = log.records();
    assert_eq!(records[0].job, JobType::NextStep);
    assert_eq!(records[0].metadata.get("dealId"), Some(&json!("d1")));
    assert!(records[0].payload_hash.is_none());
}

#[tokio::test]
async fn next_step_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(r#"{"recommendation": "Llamar"}"#))
        .expect(2)
        .mount(&server)
        .await;
    let (gateway, _log) = gateway_with(&server, Some("sk-test"), Duration::from_secs(300));

    gateway.generate_next_step(&next_step_request()).await;
    gateway.generate_next_step(&next_step_request()).await;
}

#[tokio::test]
async fn contact_summary_success_and_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(
            r#"{"summary": "Decisora económica en ACME.", "puntosClave": ["Sensible al precio"]}"#,
        ))
        .mount(&server)
        .await;
    let (gateway, _log) = gateway_with(&server, Some("sk-test"), Duration::from_secs(300));

    let ok = gateway.generate_contact_summary(&contact_request("F")).await;
    assert_eq!(ok.summary.as_deref(), Some("Decisora económica en ACME."));
    assert_eq!(ok.highlights, Some(vec!["Sensible al precio".to_string()]));
    assert!(!ok.used_fallback);

    let (offline, _log) = gateway_with(&server, None, Duration::from_secs(300));
    let fallback = offline.generate_contact_summary(&contact_request("")).await;
    assert!(fallback.used_fallback);
    assert_eq!(
        fallback.content.as_deref(),
        Some("Lucía Pérez (ACME): 1 oportunidades asociadas.")
    );
}

#[tokio::test]
async fn failing_log_sink_does_not_change_the_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(r#"{"headline": "Hola", "actions": ["Llamar a ACME"]}"#))
        .expect(1)
        .mount(&server)
        .await;

    let db = std::env::temp_dir().join(format!(
        "insight-broken-sink-{}.db",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let db = db.to_string_lossy().to_string();
    let logger = InvocationLogger::from_config(&InvocationLog {
        sink: "sqlite".to_string(),
        jsonl_path: None,
        sqlite_path: Some(db.clone()),
    })
    .await;
    assert!(logger.is_enabled());
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch("DROP TABLE invocation_log;")
        .unwrap();

    let client = HttpCompletionClient::new(
        &server.uri(),
        Some("sk-test".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    let gateway = InsightGateway::new(
        Arc::new(client),
        Arc::new(InsightCache::new()),
        logger,
        settings(Duration::from_secs(300)),
    );

    let result = gateway.generate_digest(&digest_request("R")).await;
    gateway.logger().flush().await;

    assert!(!result.used_fallback);
    assert_eq!(result.provider, MODEL);
    assert_eq!(result.headline.as_deref(), Some("Hola"));
    assert_eq!(result.content.as_deref(), Some("Hola\nLlamar a ACME"));
    assert!(result.error.is_none());

    let cached = gateway.generate_digest(&digest_request("R")).await;
    assert_eq!(cached, result);
}
