use mc_telemetry::{LogSettings, new_correlation_id, new_request_ids};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
}

#[test]
fn correlation_id_has_no_separators() {
    let id = new_correlation_id();
    assert_eq!(id.len(), 32);
    assert!(!id.contains('-'));
    assert!(!id.contains('.'));
}

#[test]
fn log_settings_build_target_directives() {
    let settings = LogSettings {
        storage: "warn".to_string(),
        ..Default::default()
    };
    assert_eq!(
        settings.directives(),
        "info,mc.storage=warn,mc.metric=warn,mc.web=info"
    );
}
