//! FSM unit tests

use wsdeploy::deploy::fsm::{SessionEvent, SessionFsm};
use wsdeploy::models::SessionStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = SessionFsm::new();
    assert_eq!(fsm.state(), &SessionStatus::Requested);
    assert!(fsm.error().is_none());
    assert!(fsm.container_id().is_none());
    assert!(!fsm.is_terminal());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = SessionFsm::new();

    // Requested -> Starting
    fsm.process(SessionEvent::Starting).unwrap();
    assert_eq!(fsm.state(), &SessionStatus::Starting);

    // Starting -> Running
    fsm.process(SessionEvent::Ready("abc123".to_string())).unwrap();
    assert_eq!(fsm.state(), &SessionStatus::Running);
    assert_eq!(fsm.container_id(), Some("abc123"));
}

#[test]
fn test_fsm_direct_ready() {
    let mut fsm = SessionFsm::new();

    fsm.process(SessionEvent::Ready("abc123".to_string())).unwrap();
    assert_eq!(fsm.state(), &SessionStatus::Running);
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = SessionFsm::new();

    fsm.process(SessionEvent::Failed("no capacity".to_string())).unwrap();

    assert_eq!(fsm.state(), &SessionStatus::Failed);
    assert_eq!(fsm.error(), Some("no capacity"));
    assert!(fsm.is_terminal());
}

#[test]
fn test_fsm_unknown_status_is_terminal() {
    let mut fsm = SessionFsm::new();

    fsm.process(SessionEvent::Starting).unwrap();
    fsm.process(SessionEvent::Unknown("paused".to_string())).unwrap();

    assert_eq!(fsm.state(), &SessionStatus::Unexpected("paused".to_string()));
    assert!(fsm.is_terminal());
}

#[test]
fn test_fsm_terminal_states_reject_events() {
    let mut fsm = SessionFsm::new();
    fsm.process(SessionEvent::Ready("abc123".to_string())).unwrap();

    let result = fsm.process(SessionEvent::Starting);
    assert!(result.is_err());
    assert_eq!(fsm.state(), &SessionStatus::Running);

    let mut failed = SessionFsm::new();
    failed.process(SessionEvent::Failed("boom".to_string())).unwrap();
    assert!(failed.process(SessionEvent::Ready("late".to_string())).is_err());
}

#[test]
fn test_event_from_status() {
    assert_eq!(SessionEvent::from_status(&SessionStatus::Requested, None), None);
    assert_eq!(
        SessionEvent::from_status(&SessionStatus::Running, Some("abc")),
        Some(SessionEvent::Ready("abc".to_string()))
    );
    assert!(matches!(
        SessionEvent::from_status(&SessionStatus::Failed, None),
        Some(SessionEvent::Failed(_))
    ));
}
