//! Ordering and atomicity of the outbox-backed commit.

use std::sync::Arc;
use std::time::Duration;

use transactional_session::bus::{headers, Destination, InMemoryTransport};
use transactional_session::control::codec::ATTEMPT;
use transactional_session::storage::{OutboxStorage, StorageSessionProvider};
use transactional_session::{
    CancellationToken, MessageSender, OpenOptions, OutboxSession, OutgoingMessage, PlainSession,
    PublishOptions, SendOptions, SessionError, SessionState, StorageError, TransactionalSession,
    UsageError,
};

use crate::support::{Endpoint, Journal, JournalDispatcher, ScriptedPersistence};

fn scripted_session(
    persistence: &ScriptedPersistence,
    transport: &InMemoryTransport,
) -> OutboxSession<ScriptedPersistence, <ScriptedPersistence as StorageSessionProvider>::Session> {
    let dispatcher = JournalDispatcher {
        journal: persistence.journal.clone(),
        transport: transport.clone(),
    };
    let sender = MessageSender::new(Arc::new(dispatcher)).with_route("ChargeCard", "billing");
    OutboxSession::new(
        Arc::new(persistence.clone()),
        persistence.create_session(),
        sender,
        "orders.processor",
    )
}

fn scripted_plain_session(
    persistence: &ScriptedPersistence,
    transport: &InMemoryTransport,
) -> PlainSession<<ScriptedPersistence as StorageSessionProvider>::Session> {
    let sender =
        MessageSender::new(Arc::new(transport.clone())).with_route("ChargeCard", "billing");
    PlainSession::new(persistence.create_session(), sender)
}

fn cancel_after(delay: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
    });
    cancel
}

#[tokio::test]
async fn batch_is_stored_exactly_and_in_order() {
    let endpoint = Endpoint::orders();
    let cancel = CancellationToken::new();
    let mut session = endpoint
        .factory
        .open_outbox_session(OpenOptions::new().with_session_id("s-order"), &cancel)
        .await
        .unwrap();

    session
        .send(
            OutgoingMessage::with_string_payload("ChargeCard", "first"),
            SendOptions::new(),
            &cancel,
        )
        .await
        .unwrap();
    session
        .publish(
            OutgoingMessage::with_string_payload("OrderPlaced", "second"),
            PublishOptions::new(),
            &cancel,
        )
        .await
        .unwrap();
    session
        .send(
            OutgoingMessage::with_string_payload("ChargeCard", "third"),
            SendOptions::new().with_destination("audit"),
            &cancel,
        )
        .await
        .unwrap();
    session.commit(&cancel).await.unwrap();

    let record = endpoint.persistence.get("s-order").await.unwrap().unwrap();
    let stored = record.undispatched();
    assert_eq!(stored, session.pending_operations().operations());

    let bodies: Vec<_> = stored
        .iter()
        .map(|op| op.message.body_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(bodies, vec!["first", "second", "third"]);
    assert_eq!(stored[1].destination, Destination::topic("OrderPlaced"));
    assert_eq!(stored[2].destination, Destination::queue("audit"));
}

#[tokio::test]
async fn control_message_goes_out_before_the_store() {
    let persistence = ScriptedPersistence::default();
    let transport = InMemoryTransport::new();
    let cancel = CancellationToken::new();
    let mut session = scripted_session(&persistence, &transport);

    session
        .open(OpenOptions::new().with_session_id("s-42"), &cancel)
        .await
        .unwrap();
    session
        .send(OutgoingMessage::new("ChargeCard", Vec::new()), SendOptions::new(), &cancel)
        .await
        .unwrap();
    session.commit(&cancel).await.unwrap();

    let journal = persistence.journal.clone();
    assert_eq!(
        journal.entries(),
        vec![
            "begin",
            "attach",
            "dispatch orders.processor",
            "complete",
            "store",
            "commit",
            "dispose",
        ]
    );

    let control = transport.dispatched();
    assert_eq!(control.len(), 1);
    assert_eq!(control[0].destination, Destination::queue("orders.processor"));
    assert_eq!(control[0].message.id, "s-42");
    assert_eq!(control[0].message.header(headers::MESSAGE_ID), Some("s-42"));
    assert_eq!(control[0].message.header(ATTEMPT), Some("1"));
    assert!(control[0].message.is_control_message());
}

#[tokio::test]
async fn failed_store_leaves_session_completed_and_transaction_uncommitted() {
    let persistence = ScriptedPersistence {
        fail_store: true,
        ..ScriptedPersistence::default()
    };
    let transport = InMemoryTransport::new();
    let cancel = CancellationToken::new();
    let mut session = scripted_session(&persistence, &transport);

    session.open(OpenOptions::new(), &cancel).await.unwrap();
    let err = session.commit(&cancel).await.unwrap_err();

    assert!(matches!(err, SessionError::Storage(StorageError::Backend(_))));
    assert!(err.is_transient());
    assert_eq!(session.state(), SessionState::Failed);
    assert!(!persistence.was_committed());

    let journal: Journal = persistence.journal.clone();
    let complete = journal.position("complete").unwrap();
    let store = journal.position("store").unwrap();
    assert!(complete < store);
    assert!(journal.position("commit").is_none());
    assert!(journal.position("rollback").unwrap() > store);
    // The control message is already in flight.
    assert_eq!(transport.dispatched().len(), 1);
}

#[tokio::test]
async fn incompatible_storage_is_a_fatal_open_error() {
    let persistence = ScriptedPersistence {
        refuse_attach: true,
        ..ScriptedPersistence::default()
    };
    let transport = InMemoryTransport::new();
    let mut session = scripted_session(&persistence, &transport);

    let err = session
        .open(OpenOptions::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Incompatible(_)));
    assert!(!err.is_transient());
    assert_eq!(
        persistence.journal.entries(),
        vec!["begin", "attach", "dispose", "rollback"]
    );

    assert_eq!(session.state(), SessionState::Disposed);
    let reopen = session
        .open(OpenOptions::new(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(reopen, SessionError::Usage(UsageError::Disposed)));
    assert_eq!(persistence.journal.count("attach"), 1);
}

#[tokio::test]
async fn storage_session_is_released_once() {
    let persistence = ScriptedPersistence::default();
    let transport = InMemoryTransport::new();
    let cancel = CancellationToken::new();

    let mut session = scripted_session(&persistence, &transport);
    session.open(OpenOptions::new(), &cancel).await.unwrap();
    session.commit(&cancel).await.unwrap();
    session.dispose();
    session.dispose();
    drop(session);

    assert_eq!(persistence.journal.count("dispose"), 1);
}

#[tokio::test]
async fn failed_commit_releases_storage_once() {
    let persistence = ScriptedPersistence {
        fail_store: true,
        ..ScriptedPersistence::default()
    };
    let transport = InMemoryTransport::new();
    let cancel = CancellationToken::new();

    let mut session = scripted_session(&persistence, &transport);
    session.open(OpenOptions::new(), &cancel).await.unwrap();
    session.commit(&cancel).await.unwrap_err();
    session.dispose();
    drop(session);

    assert_eq!(persistence.journal.count("dispose"), 1);
}

#[tokio::test]
async fn plain_session_releases_storage_once() {
    let persistence = ScriptedPersistence::default();
    let transport = InMemoryTransport::new();
    let cancel = CancellationToken::new();

    let mut session = scripted_plain_session(&persistence, &transport);
    session.open(OpenOptions::new(), &cancel).await.unwrap();
    session.commit(&cancel).await.unwrap();
    session.dispose();
    session.dispose();
    drop(session);

    assert_eq!(
        persistence.journal.entries(),
        vec!["open", "complete", "dispose"]
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_aborts_a_pending_attach() {
    let persistence = ScriptedPersistence {
        stall: true,
        ..ScriptedPersistence::default()
    };
    let transport = InMemoryTransport::new();
    let mut session = scripted_session(&persistence, &transport);
    let cancel = cancel_after(Duration::from_millis(10));

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        session.open(OpenOptions::new(), &cancel),
    )
    .await
    .expect("open ignored the cancellation")
    .unwrap_err();

    assert!(matches!(err, SessionError::Cancelled));
    assert_eq!(session.state(), SessionState::Disposed);
    assert_eq!(
        persistence.journal.entries(),
        vec!["begin", "attach", "dispose", "rollback"]
    );
    drop(session);
    assert_eq!(persistence.journal.count("dispose"), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_aborts_a_pending_storage_open() {
    let persistence = ScriptedPersistence {
        stall: true,
        ..ScriptedPersistence::default()
    };
    let transport = InMemoryTransport::new();
    let mut session = scripted_plain_session(&persistence, &transport);
    let cancel = cancel_after(Duration::from_millis(10));

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        session.open(OpenOptions::new(), &cancel),
    )
    .await
    .expect("open ignored the cancellation")
    .unwrap_err();

    assert!(matches!(err, SessionError::Cancelled));
    assert_eq!(session.state(), SessionState::Disposed);
    assert_eq!(persistence.journal.entries(), vec!["open", "dispose"]);
}

#[tokio::test]
async fn business_mutation_and_record_commit_together() {
    let endpoint = Endpoint::orders();
    let cancel = CancellationToken::new();

    let mut committed = endpoint
        .factory
        .open_outbox_session(OpenOptions::new().with_session_id("s-ok"), &cancel)
        .await
        .unwrap();
    committed
        .storage_session_mut()
        .unwrap()
        .put("order-1", b"placed".to_vec())
        .unwrap();
    committed.commit(&cancel).await.unwrap();

    let mut rolled_back = endpoint
        .factory
        .open_outbox_session(OpenOptions::new().with_session_id("s-bad"), &cancel)
        .await
        .unwrap();
    rolled_back
        .storage_session_mut()
        .unwrap()
        .put("order-2", b"placed".to_vec())
        .unwrap();
    endpoint.persistence.fail_next_commit("serialization failure");
    rolled_back.commit(&cancel).await.unwrap_err();

    assert_eq!(endpoint.persistence.document("order-1"), Some(b"placed".to_vec()));
    assert!(endpoint.persistence.get("s-ok").await.unwrap().is_some());
    assert!(endpoint.persistence.document("order-2").is_none());
    assert!(endpoint.persistence.get("s-bad").await.unwrap().is_none());
}

#[tokio::test]
async fn second_commit_under_the_same_id_conflicts() {
    let endpoint = Endpoint::orders();
    let cancel = CancellationToken::new();

    let mut first = endpoint
        .factory
        .open_outbox_session(OpenOptions::new().with_session_id("s-dup"), &cancel)
        .await
        .unwrap();
    first.commit(&cancel).await.unwrap();

    let mut second = endpoint
        .factory
        .open_outbox_session(OpenOptions::new().with_session_id("s-dup"), &cancel)
        .await
        .unwrap();
    let err = second.commit(&cancel).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Storage(StorageError::Conflict { ref id }) if id == "s-dup"
    ));
    assert!(err.is_transient());
}
