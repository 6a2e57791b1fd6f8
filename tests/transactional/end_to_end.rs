//! Whole endpoint: session on one side, processor running on the other.

use std::sync::Arc;
use std::time::Duration;

use transactional_session::processor::{Processor, ProcessorHandle};
use transactional_session::storage::OutboxStorage;
use transactional_session::{
    CancellationToken, OpenOptions, OutgoingMessage, SendOptions, TransactionalSession,
};

use crate::support::{eventually, init_tracing, CountingHandler, Endpoint};

fn start(endpoint: &Endpoint, handler: &CountingHandler) -> ProcessorHandle {
    Processor::from_config(
        &endpoint.config,
        Arc::new(endpoint.persistence.clone()),
        endpoint.transport.clone(),
    )
    .unwrap()
    .with_handler(Arc::new(handler.clone()))
    .with_observer(Arc::new(endpoint.observer.clone()))
    .with_poll_interval(Duration::from_millis(5))
    .spawn()
}

fn quick_retries() -> OpenOptions {
    OpenOptions::new()
        .with_maximum_commit_duration(Duration::from_secs(2))
        .with_commit_delay_increment(Duration::from_millis(20))
}

#[tokio::test]
async fn committed_local_send_is_delivered_once() {
    init_tracing();
    let endpoint = Endpoint::orders();
    let handler = CountingHandler::default();
    let processor = start(&endpoint, &handler);
    let cancel = CancellationToken::new();

    let mut session = endpoint
        .factory
        .open_outbox_session(quick_retries(), &cancel)
        .await
        .unwrap();
    session
        .send(
            OutgoingMessage::with_string_payload("OrderPlaced", r#"{"order":"o-1"}"#),
            SendOptions::new().route_to_this_endpoint().with_message_id("business-1"),
            &cancel,
        )
        .await
        .unwrap();
    session.commit(&cancel).await.unwrap();
    let session_id = session.session_id().unwrap().to_string();
    session.dispose();

    let seen = handler.clone();
    assert!(eventually(Duration::from_secs(2), || seen.seen().len() == 1).await);
    // Give a duplicate delivery a chance to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = processor.stop().await;

    assert_eq!(handler.seen(), vec!["business-1".to_string()]);
    assert_eq!(endpoint.persistence.outbox_len(), 1);
    let record = endpoint.persistence.get(&session_id).await.unwrap().unwrap();
    assert!(record.is_dispatched());
    assert_eq!(stats.failed, 0);
    assert!(endpoint
        .observer
        .completed()
        .iter()
        .any(|outcome| outcome.session_id() == session_id));
}

#[tokio::test]
async fn disposing_without_commit_delivers_nothing() {
    init_tracing();
    let endpoint = Endpoint::orders();
    let handler = CountingHandler::default();
    let processor = start(&endpoint, &handler);
    let cancel = CancellationToken::new();

    let mut session = endpoint
        .factory
        .open_outbox_session(quick_retries(), &cancel)
        .await
        .unwrap();
    session
        .storage_session_mut()
        .unwrap()
        .put("order-1", b"placed".to_vec())
        .unwrap();
    session
        .send(
            OutgoingMessage::with_string_payload("OrderPlaced", r#"{"order":"o-1"}"#),
            SendOptions::new().route_to_this_endpoint(),
            &cancel,
        )
        .await
        .unwrap();
    session.dispose();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = processor.stop().await;

    assert!(handler.seen().is_empty());
    assert!(endpoint.transport.dispatched().is_empty());
    assert_eq!(endpoint.persistence.outbox_len(), 0);
    assert!(endpoint.persistence.document("order-1").is_none());
    assert_eq!(stats.handled, 0);
}
