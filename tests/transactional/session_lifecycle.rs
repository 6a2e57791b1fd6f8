//! Usage errors: every misuse fails with its own error, leaves the batch
//! alone and dispatches nothing.

use transactional_session::{
    CancellationToken, OpenOptions, OutgoingMessage, PublishOptions, SendOptions, SessionError,
    SessionState, TransactionalSession, UsageError,
};

use crate::support::Endpoint;

fn usage(err: SessionError) -> UsageError {
    match err {
        SessionError::Usage(usage) => usage,
        other => panic!("expected a usage error, got {other:?}"),
    }
}

async fn try_everything(
    session: &mut dyn TransactionalSession,
    cancel: &CancellationToken,
) -> Vec<UsageError> {
    vec![
        usage(
            session
                .send(OutgoingMessage::new("ChargeCard", Vec::new()), SendOptions::new(), cancel)
                .await
                .unwrap_err(),
        ),
        usage(
            session
                .publish(
                    OutgoingMessage::new("OrderPlaced", Vec::new()),
                    PublishOptions::new(),
                    cancel,
                )
                .await
                .unwrap_err(),
        ),
        usage(session.commit(cancel).await.unwrap_err()),
    ]
}

#[tokio::test]
async fn operations_before_open_fail_with_not_open() {
    let endpoint = Endpoint::orders();
    let cancel = CancellationToken::new();
    let mut session = endpoint.factory.outbox_session().unwrap();

    let errors = try_everything(&mut session, &cancel).await;

    assert_eq!(errors, vec![UsageError::NotOpen; 3]);
    assert!(session.pending_operations().is_empty());
    assert!(endpoint.transport.dispatched().is_empty());
}

#[tokio::test]
async fn opening_twice_fails_with_already_open() {
    let endpoint = Endpoint::orders();
    let cancel = CancellationToken::new();
    let mut session = endpoint
        .factory
        .open_outbox_session(OpenOptions::new(), &cancel)
        .await
        .unwrap();
    let id = session.session_id().map(str::to_string);

    let err = session.open(OpenOptions::new(), &cancel).await.unwrap_err();

    assert_eq!(usage(err), UsageError::AlreadyOpen);
    assert_eq!(session.session_id().map(str::to_string), id);
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn operations_after_commit_fail_with_already_committed() {
    let endpoint = Endpoint::orders();
    let cancel = CancellationToken::new();
    let mut session = endpoint
        .factory
        .open_outbox_session(OpenOptions::new(), &cancel)
        .await
        .unwrap();
    session
        .send(OutgoingMessage::new("ChargeCard", Vec::new()), SendOptions::new(), &cancel)
        .await
        .unwrap();
    session.commit(&cancel).await.unwrap();
    let dispatched = endpoint.transport.dispatched().len();

    let errors = try_everything(&mut session, &cancel).await;
    let reopen = session.open(OpenOptions::new(), &cancel).await.unwrap_err();

    assert_eq!(errors, vec![UsageError::AlreadyCommitted; 3]);
    assert_eq!(usage(reopen), UsageError::AlreadyCommitted);
    assert_eq!(session.pending_operations().len(), 1);
    assert_eq!(endpoint.transport.dispatched().len(), dispatched);
}

#[tokio::test]
async fn operations_after_dispose_fail_with_disposed() {
    let endpoint = Endpoint::orders();
    let cancel = CancellationToken::new();
    let mut session = endpoint
        .factory
        .open_outbox_session(OpenOptions::new(), &cancel)
        .await
        .unwrap();
    session
        .send(OutgoingMessage::new("ChargeCard", Vec::new()), SendOptions::new(), &cancel)
        .await
        .unwrap();

    session.dispose();
    session.dispose();

    let errors = try_everything(&mut session, &cancel).await;
    assert_eq!(errors, vec![UsageError::Disposed; 3]);
    assert_eq!(session.pending_operations().len(), 1);
    assert!(endpoint.transport.dispatched().is_empty());
    assert_eq!(endpoint.persistence.outbox_len(), 0);
}

#[tokio::test]
async fn plain_sessions_follow_the_same_lifecycle() {
    let endpoint = Endpoint::new(
        transactional_session::SessionConfig::new()
            .with_outbox(false)
            .with_route("ChargeCard", "billing"),
    );
    let cancel = CancellationToken::new();
    let mut session = endpoint.factory.session();

    assert_eq!(try_everything(session.as_mut(), &cancel).await, vec![UsageError::NotOpen; 3]);

    session.open(OpenOptions::new(), &cancel).await.unwrap();
    session.commit(&cancel).await.unwrap();
    assert_eq!(
        try_everything(session.as_mut(), &cancel).await,
        vec![UsageError::AlreadyCommitted; 3]
    );
}

#[tokio::test]
async fn cancelled_operations_do_not_touch_the_batch() {
    let endpoint = Endpoint::orders();
    let mut session = endpoint
        .factory
        .open_outbox_session(OpenOptions::new(), &CancellationToken::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = session
        .send(OutgoingMessage::new("ChargeCard", Vec::new()), SendOptions::new(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Cancelled));
    assert!(session.pending_operations().is_empty());
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn unroutable_send_is_rejected_without_batching() {
    let endpoint = Endpoint::orders();
    let cancel = CancellationToken::new();
    let mut session = endpoint
        .factory
        .open_outbox_session(OpenOptions::new(), &cancel)
        .await
        .unwrap();

    let err = session
        .send(OutgoingMessage::new("Unknown", Vec::new()), SendOptions::new(), &cancel)
        .await
        .unwrap_err();

    assert_eq!(usage(err), UsageError::UnroutableMessage("Unknown".into()));
    assert!(session.pending_operations().is_empty());
}
