//! FSM unit tests

use deployd::deploy::fsm::{transition, DeploymentEvent, DeploymentStatus};
use deployd::errors::DeployError;

#[test]
fn test_pending_edges() {
    assert_eq!(
        transition(DeploymentStatus::Pending, &DeploymentEvent::BuildTriggered).unwrap(),
        DeploymentStatus::Building
    );
    assert_eq!(
        transition(
            DeploymentStatus::Pending,
            &DeploymentEvent::TriggerFailed("422".to_string())
        )
        .unwrap(),
        DeploymentStatus::Failed
    );
    assert_eq!(
        transition(DeploymentStatus::Pending, &DeploymentEvent::Cancel).unwrap(),
        DeploymentStatus::Cancelled
    );
}

#[test]
fn test_building_edges() {
    assert_eq!(
        transition(DeploymentStatus::Building, &DeploymentEvent::Deployed).unwrap(),
        DeploymentStatus::Success
    );
    assert_eq!(
        transition(
            DeploymentStatus::Building,
            &DeploymentEvent::Failed("failure".to_string())
        )
        .unwrap(),
        DeploymentStatus::Failed
    );
    assert_eq!(
        transition(DeploymentStatus::Building, &DeploymentEvent::Cancel).unwrap(),
        DeploymentStatus::Cancelled
    );
}

#[test]
fn test_cannot_skip_the_build() {
    assert!(transition(DeploymentStatus::Pending, &DeploymentEvent::Deployed).is_err());
    assert!(transition(DeploymentStatus::Building, &DeploymentEvent::BuildTriggered).is_err());
}

#[test]
fn test_only_success_rolls_back() {
    assert_eq!(
        transition(DeploymentStatus::Success, &DeploymentEvent::RollBack).unwrap(),
        DeploymentStatus::RolledBack
    );
    for state in [
        DeploymentStatus::Pending,
        DeploymentStatus::Building,
        DeploymentStatus::Failed,
        DeploymentStatus::Cancelled,
        DeploymentStatus::RolledBack,
    ] {
        assert!(
            transition(state, &DeploymentEvent::RollBack).is_err(),
            "{} must not roll back",
            state
        );
    }
}

#[test]
fn test_success_cannot_be_cancelled_or_failed() {
    assert!(transition(DeploymentStatus::Success, &DeploymentEvent::Cancel).is_err());
    assert!(transition(
        DeploymentStatus::Success,
        &DeploymentEvent::Failed("late".to_string())
    )
    .is_err());
}

#[test]
fn test_rejection_message_is_prefixed_once() {
    let message = transition(DeploymentStatus::Success, &DeploymentEvent::Cancel).unwrap_err();
    assert_eq!(message, "success -> Cancel");
    assert_eq!(
        DeployError::InvalidTransition(message).to_string(),
        "Invalid transition: success -> Cancel"
    );
}

#[test]
fn test_terminal_flags() {
    assert!(!DeploymentStatus::Pending.is_terminal());
    assert!(!DeploymentStatus::Building.is_terminal());
    assert!(DeploymentStatus::Success.is_terminal());
    assert!(DeploymentStatus::Failed.is_terminal());
    assert!(DeploymentStatus::Cancelled.is_terminal());
    assert!(DeploymentStatus::RolledBack.is_terminal());
}

#[test]
fn test_status_round_trips_through_json() {
    let status: DeploymentStatus = serde_json::from_str("\"building\"").unwrap();
    assert_eq!(status, DeploymentStatus::Building);
    assert_eq!(status.to_string(), "building");
}
