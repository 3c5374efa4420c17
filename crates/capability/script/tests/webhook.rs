use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use domain::WebhookConfig;
use mc_script::{RequestBody, ScriptError, WebhookClient};
use serde_json::{Value, json};
use std::collections::HashMap;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

fn router() -> Router {
    Router::new()
        .route(
            "/echo",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                Json(json!({"limit": query.get("limit").cloned().unwrap_or_default()}))
            }),
        )
        .route(
            "/evaluate",
            post(|Json(body): Json<Value>| async move {
                let temp = body["temp"].as_f64().unwrap_or_default();
                Json(json!({"isTriggered": temp > 30.0}))
            }),
        )
        .route("/created", post(|| async { StatusCode::CREATED }))
}

#[tokio::test]
async fn get_with_query_parameters_decodes_json() {
    let base = serve(router()).await;
    let client = WebhookClient::new().expect("client");
    let mut config = WebhookConfig {
        url: format!("{base}/echo"),
        ..Default::default()
    };
    config.query_parameters.insert("limit".to_string(), json!(5));

    let response = client.call(&config, "GET", None).await.expect("call");
    assert_eq!(response.status, 200);
    let map = response.json_map().expect("json");
    assert_eq!(map["limit"], "5");
}

#[tokio::test]
async fn post_body_and_response_code_check() {
    let base = serve(router()).await;
    let client = WebhookClient::new().expect("client");
    let config = WebhookConfig {
        url: format!("{base}/evaluate"),
        ..Default::default()
    };
    let response = client
        .call(&config, "POST", Some(RequestBody::Json(json!({"temp": 31}))))
        .await
        .expect("call");
    assert_eq!(response.json().expect("json")["isTriggered"], true);

    let config = WebhookConfig {
        url: format!("{base}/created"),
        response_code: 200,
        ..Default::default()
    };
    let err = client
        .call(&config, "POST", None)
        .await
        .expect_err("201 is not 200");
    assert!(matches!(err, ScriptError::Http(_)));

    let config = WebhookConfig {
        url: format!("{base}/created"),
        response_code: 201,
        ..Default::default()
    };
    let response = client.call(&config, "POST", None).await.expect("201 expected");
    assert_eq!(response.json().expect("empty"), Value::Null);
}
