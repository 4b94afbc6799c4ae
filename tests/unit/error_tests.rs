//! Unit tests for the two error channels and their display formats.

use session_relay::{AgentError, AgentErrorKind, AppError};

#[test]
fn app_error_display_uses_variant_prefix() {
    assert_eq!(
        AppError::Context("missing agent id".into()).to_string(),
        "context: missing agent id"
    );
    assert_eq!(AppError::Watch("gone".into()).to_string(), "watch: gone");
    assert_eq!(
        AppError::NotFound("session record x".into()).to_string(),
        "not found: session record x"
    );
}

#[test]
fn agent_error_kinds_have_kebab_case_labels() {
    assert_eq!(AgentErrorKind::ProcessKilled.as_str(), "process-killed");
    assert_eq!(
        AgentErrorKind::CapabilityNotSupported.as_str(),
        "capability-not-supported"
    );
    assert_eq!(AgentErrorKind::MaxTurnsExceeded.as_str(), "max-turns-exceeded");
    assert_eq!(AgentErrorKind::Unknown.to_string(), "unknown");
}

#[test]
fn agent_error_display_includes_cause() {
    let err = AgentError::new(AgentErrorKind::ProcessSpawnFailed, "failed to spawn claude")
        .with_cause("No such file or directory");
    assert_eq!(
        err.to_string(),
        "process-spawn-failed: failed to spawn claude (caused by: No such file or directory)"
    );
}

#[test]
fn agent_error_without_cause_has_no_suffix() {
    let err = AgentError::unknown("boom");
    assert_eq!(err.to_string(), "unknown: boom");
    assert!(err.cause.is_none());
}

#[test]
fn from_app_keeps_wrapped_agent_error() {
    let inner = AgentError::new(AgentErrorKind::BudgetExceeded, "spent");
    let mapped = AgentError::from_app(AppError::Agent(inner.clone()));
    assert_eq!(mapped, inner);
}

#[test]
fn from_app_maps_cancellation_and_missing_sessions() {
    assert_eq!(
        AgentError::from_app(AppError::Cancelled("aborted".into())).kind,
        AgentErrorKind::ProcessKilled
    );
    assert_eq!(
        AgentError::from_app(AppError::NotFound("record".into())).kind,
        AgentErrorKind::SessionNotFound
    );
    assert_eq!(
        AgentError::from_app(AppError::Io("disk".into())).kind,
        AgentErrorKind::Unknown
    );
}

#[test]
fn json_errors_become_serialization_errors() {
    let err: AppError = serde_json::from_str::<serde_json::Value>("{")
        .unwrap_err()
        .into();
    assert!(matches!(err, AppError::Serialization(_)));
}
