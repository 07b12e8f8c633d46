use ai_gateway_core::metrics::MetricsCollector;
use ai_gateway_core::models::{
    HealthStatus, HttpMethod, Operation, ProviderConfigRecord, ProviderEndpointConfig,
    ProviderRequest, ProviderTypeConfig, ResponseMapping,
};
use ai_gateway_core::proxy::ProviderProxy;
use ai_gateway_core::repository::{InMemoryProviderConfigRepository, ProviderConfigRepository};
use ai_gateway_service::server::create_server;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn llm_config(endpoint: String, provider_id: &str) -> ProviderConfigRecord {
    ProviderConfigRecord {
        id: 0,
        provider_id: provider_id.to_string(),
        provider_name: provider_id.to_string(),
        configuration: ProviderTypeConfig::Llm(ProviderEndpointConfig {
            endpoint,
            request_template: serde_json::json!({"prompt": "${prompt}"}),
            response_mapping: ResponseMapping {
                content: "choices[0].message.content".to_string(),
                artwork_url: None,
                audio_url: None,
                format: None,
            },
            method: HttpMethod::Post,
            headers: HashMap::new(),
            timeout: Some(std::time::Duration::from_secs(5)),
            models: vec![],
            auth: None,
            health_endpoint: None,
        }),
        is_active: true,
        is_primary: true,
        priority: 1,
        cost_per_unit: "0.001".to_string(),
        credit_cost: 0.5,
        health_status: HealthStatus::Unknown,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        created_by: None,
        updated_by: None,
    }
}

#[tokio::test]
async fn invoke_route_proxies_to_mock_provider() {
    std::env::set_var("MOCKP_API_KEY", "test-key");
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "hello from the test provider"}}]
        })))
        .mount(&mock_server)
        .await;

    let repo = InMemoryProviderConfigRepository::new();
    repo.create(llm_config(format!("{}/v1/chat", mock_server.uri()), "mockp"))
        .await
        .unwrap();

    let proxy = Arc::new(ProviderProxy::new(Arc::new(repo), Arc::new(MetricsCollector::noop())));
    let app = create_server(proxy);

    let request = ProviderRequest {
        provider_id: Some("mockp".to_string()),
        operation: Operation::TextGeneration,
        payload: HashMap::from([("prompt".to_string(), Value::String("hi".to_string()))]),
        options: Default::default(),
        metadata: Default::default(),
    };

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/invoke")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&request).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], Value::Bool(true));
    assert_eq!(json["result"], Value::String("hello from the test provider".to_string()));
}

#[tokio::test]
async fn health_route_reports_tracked_providers() {
    let repo = InMemoryProviderConfigRepository::new();
    let proxy = Arc::new(ProviderProxy::new(Arc::new(repo), Arc::new(MetricsCollector::noop())));
    let app = create_server(proxy);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["tracked_providers"], Value::Number(0.into()));
}

#[tokio::test]
async fn invoke_route_reports_provider_not_found() {
    let repo = InMemoryProviderConfigRepository::new();
    let proxy = Arc::new(ProviderProxy::new(Arc::new(repo), Arc::new(MetricsCollector::noop())));
    let app = create_server(proxy);

    let request = ProviderRequest {
        provider_id: Some("does-not-exist".to_string()),
        operation: Operation::TextGeneration,
        payload: HashMap::new(),
        options: Default::default(),
        metadata: Default::default(),
    };

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/invoke")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&request).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
