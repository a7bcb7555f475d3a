use potts_core::errors::{ErrorInfo, PottsError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("worker", 1)
        .with_context("reason", "example")
}

#[test]
fn config_error_surface() {
    let err = PottsError::Config(sample_info("C001", "bad partition"));
    assert_eq!(err.info().code, "C001");
    assert!(err.info().context.contains_key("worker"));
}

#[test]
fn divergence_error_surface() {
    let err = PottsError::Divergence(
        sample_info("D001", "neff collapsed").with_hint("decrease gamma"),
    );
    assert!(err.is_divergence());
    let text = err.to_string();
    assert!(text.starts_with("divergence:"));
    assert!(text.contains("hint: decrease gamma"));
}

#[test]
fn consistency_error_surface() {
    let err = PottsError::Consistency(sample_info("S001", "count mismatch"));
    assert_eq!(err.info().code, "S001");
    assert!(!err.is_divergence());
}

#[test]
fn errors_serialize_with_family_tag() {
    let err = PottsError::Worker(sample_info("W001", "wrong buffer kind"));
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["family"], "Worker");
    let back: PottsError = serde_json::from_value(json).unwrap();
    assert_eq!(back, err);
}
