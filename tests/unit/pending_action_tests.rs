//! Unit tests for the pending action registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use session_relay::models::action::{ActionResponse, ApprovalDecision};
use session_relay::permission::pending::{PendingActions, RespondOutcome};
use session_relay::AppError;
use tokio_util::sync::CancellationToken;

fn approve(id: &str) -> ActionResponse {
    ActionResponse::approval(id, ApprovalDecision::Allow, None)
}

#[tokio::test]
async fn response_reaches_waiter() {
    let pending = PendingActions::new();
    let waiter = pending.await_agent_action_response("tu-1", None, None);
    assert!(pending.contains("tu-1"));

    assert_eq!(pending.respond(approve("tu-1")), RespondOutcome::Delivered);

    let response = waiter.recv().await.expect("response delivered");
    assert_eq!(response.action_id, "tu-1");
    assert_eq!(response.decision, Some(ApprovalDecision::Allow));
    assert!(pending.is_empty());
}

#[tokio::test]
async fn second_response_is_a_no_op() {
    let pending = PendingActions::new();
    let _waiter = pending.await_agent_action_response("tu-1", None, None);

    assert_eq!(pending.respond(approve("tu-1")), RespondOutcome::Delivered);
    assert_eq!(
        pending.respond(approve("tu-1")),
        RespondOutcome::NoPendingAction
    );
}

#[tokio::test]
async fn unknown_response_is_a_no_op() {
    let pending = PendingActions::new();
    assert_eq!(
        pending.respond(approve("missing")),
        RespondOutcome::NoPendingAction
    );
}

#[tokio::test]
async fn cancellation_rejects_and_cleans_up() {
    let pending = PendingActions::new();
    let cleaned = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cleaned);
    let token = CancellationToken::new();

    let waiter = pending.await_agent_action_response(
        "tu-2",
        Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
        Some(token.clone()),
    );

    let wait = tokio::spawn(waiter.recv());
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("wait ends")
        .expect("task joins");
    assert!(matches!(result, Err(AppError::Cancelled(_))));
    assert!(cleaned.load(Ordering::SeqCst), "cleanup runs on cancel");
    assert!(!pending.contains("tu-2"));
    assert_eq!(
        pending.respond(approve("tu-2")),
        RespondOutcome::NoPendingAction
    );
}

#[tokio::test]
async fn already_cancelled_token_rejects_immediately() {
    let pending = PendingActions::new();
    let token = CancellationToken::new();
    token.cancel();

    let waiter = pending.await_agent_action_response("tu-3", None, Some(token));
    assert!(matches!(waiter.recv().await, Err(AppError::Cancelled(_))));
    assert!(pending.is_empty());
}

#[tokio::test]
async fn cancel_all_releases_every_waiter() {
    let pending = PendingActions::new();
    let cleanups = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut waiters = Vec::new();
    for id in ["a", "b", "c"] {
        let counter = Arc::clone(&cleanups);
        waiters.push(pending.await_agent_action_response(
            id,
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        ));
    }

    assert_eq!(pending.cancel_all(), 3);
    assert_eq!(cleanups.load(Ordering::SeqCst), 3);
    for waiter in waiters {
        assert!(matches!(waiter.recv().await, Err(AppError::Cancelled(_))));
    }
    assert_eq!(pending.cancel_all(), 0);
}
