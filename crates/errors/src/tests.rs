use super::*;

#[test]
fn test_not_found_classification() {
    let id = Uuid::new_v4();
    assert!(JobFlowError::job_not_found(id).is_not_found());
    assert!(JobFlowError::task_run_not_found(id).is_not_found());
    assert!(JobFlowError::job_config_not_found(id).is_not_found());
    assert!(!JobFlowError::Validation("bad".into()).is_not_found());
}

#[test]
fn test_timeout_classification() {
    assert!(JobFlowError::JobTimedOut.is_timeout());
    assert!(JobFlowError::TaskTimedOut.is_timeout());
    assert!(!JobFlowError::Interrupted("shutdown".into()).is_timeout());
}

#[test]
fn test_registry_error_classification() {
    assert!(JobFlowError::unknown_task("nope").is_registry_error());
    assert!(JobFlowError::InvalidTaskName.is_registry_error());
    assert!(JobFlowError::MissingDependency {
        task: "email.send".into(),
        field: "mailer",
        type_name: "Mailer",
    }
    .is_registry_error());
    assert!(!JobFlowError::TaskTimedOut.is_registry_error());
}

#[test]
fn test_from_serde_json_error() {
    let err = serde_json::from_str::<i32>("not-a-number").unwrap_err();
    let converted: JobFlowError = err.into();
    assert!(matches!(converted, JobFlowError::Serialization(_)));
}

#[test]
fn test_error_display_includes_context() {
    let id = Uuid::new_v4();
    let msg = JobFlowError::job_not_found(id).to_string();
    assert!(msg.contains(&id.to_string()));

    let msg = JobFlowError::unknown_task("email.send").to_string();
    assert!(msg.contains("email.send"));
}
