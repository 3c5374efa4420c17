use domain::{DataRepository, Field, Spec, VariableSpec};
use mc_bus::EmbeddedBus;
use mc_crypto::SecretCipher;
use mc_script::{TemplateEngine, WebhookClient};
use mc_storage::EntityApi;
use mc_variable::VariableEngine;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn engine(api: EntityApi, cipher: Option<SecretCipher>) -> VariableEngine {
    VariableEngine::new(
        api,
        TemplateEngine::new("2.0.0", None),
        WebhookClient::new().expect("client"),
        cipher,
    )
}

#[tokio::test]
async fn quick_id_variable_walks_into_field_value() {
    let api = EntityApi::in_memory(Arc::new(EmbeddedBus::new("", 100)));
    let mut field = Field::new("g1", "n1", "s1", "f1");
    field.shift_value(json!("23.5"), chrono::Utc::now());
    api.field.save(field).await.expect("save");

    let mut variables = BTreeMap::new();
    variables.insert(
        "t".to_string(),
        VariableSpec::quick_id("sf:g1.n1.s1.f1.current.value"),
    );
    variables.insert("whole".to_string(), VariableSpec::quick_id("sf:g1.n1.s1.f1"));
    variables.insert("greeting".to_string(), VariableSpec::literal("hi {{ who }}"));

    let mut scope = Spec::new();
    scope.insert("who".to_string(), json!("there"));
    let resolved = engine(api, None)
        .load(&variables, &scope)
        .await
        .expect("load");
    assert_eq!(resolved["t"], json!("23.5"));
    assert_eq!(resolved["whole"]["fieldId"], json!("f1"));
    assert_eq!(resolved["greeting"], json!("hi there"));
}

#[tokio::test]
async fn labels_variable_takes_first_match_and_decrypts_secrets() {
    let api = EntityApi::in_memory(Arc::new(EmbeddedBus::new("", 100)));
    let cipher = SecretCipher::new("my-secret").expect("cipher");
    let mut data = Spec::new();
    data.insert("host".to_string(), json!("mail.local"));
    data.insert("password".to_string(), json!(cipher.encrypt("s3cret").expect("encrypt")));
    let mut repository = DataRepository {
        id: "smtp".to_string(),
        data,
        ..Default::default()
    };
    repository.labels.set("kind", "mail");
    api.data_repository.save(repository).await.expect("save");

    let mut variables = BTreeMap::new();
    variables.insert(
        "mail".to_string(),
        VariableSpec::ResourceByLabels {
            resource_type: "data_repository".to_string(),
            labels: [("kind", "mail")].into_iter().collect(),
            key_path: "data".to_string(),
        },
    );
    variables.insert(
        "nothing".to_string(),
        VariableSpec::ResourceByLabels {
            resource_type: "node".to_string(),
            labels: [("kind", "none")].into_iter().collect(),
            key_path: String::new(),
        },
    );
    let resolved = engine(api, Some(cipher))
        .load(&variables, &Spec::new())
        .await
        .expect("load");
    assert_eq!(resolved["mail"]["host"], json!("mail.local"));
    assert_eq!(resolved["mail"]["password"], json!("s3cret"));
    assert_eq!(resolved["nothing"], serde_json::Value::Null);
}

#[tokio::test]
async fn unknown_entity_fails_with_not_found() {
    let api = EntityApi::in_memory(Arc::new(EmbeddedBus::new("", 100)));
    let mut variables = BTreeMap::new();
    variables.insert("n".to_string(), VariableSpec::quick_id("nd:g1.99"));
    let err = engine(api, None)
        .load(&variables, &Spec::new())
        .await
        .expect_err("missing");
    assert_eq!(err.kind(), contract::ErrorKind::NotFound);
}
