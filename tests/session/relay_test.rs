//! Outbound messages and the plain-text fallback.

use serde_json::{json, Value};

use pbchat::rpc::RemoteCallError;
use pbchat::session::relay::FALLBACK_MARKER;
use pbchat::session::ClientError;
use pbchat::types::Metadata;
use pbchat::ui::UiEvent;

use crate::support::{alice, bob, broker, drain, log_on};

fn style(value: i64) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("x".to_owned(), Value::from(value));
    metadata
}

#[tokio::test]
async fn rejected_metadata_falls_back_to_marked_plain_text() {
    let broker = broker().reject_metadata();
    let alice = log_on(&broker, alice()).await;
    let mut bob = log_on(&broker, bob()).await;
    drain(&mut bob.events);

    let answer = alice
        .words
        .send_direct("bob", "hi", Some(&style(1)))
        .await
        .expect("fallback succeeds");
    assert_eq!(answer, Value::from(1_u64));

    let calls = broker.calls_to("directMessage");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].args, vec![json!("bob"), json!("hi"), json!({"x": 1})]);
    assert_eq!(calls[1].args, vec![json!("bob"), json!("* hi")]);

    assert_eq!(
        drain(&mut bob.events),
        vec![UiEvent::DirectMessage {
            account: "work (words:bob)".to_owned(),
            from: "alice".to_owned(),
            text: format!("{FALLBACK_MARKER}hi"),
            metadata: None,
        }]
    );
}

#[tokio::test]
async fn plain_send_is_a_single_call() {
    let broker = broker();
    let alice = log_on(&broker, alice()).await;
    let _bob = log_on(&broker, bob()).await;

    let answer = alice
        .words
        .send_direct("bob", "hi", None)
        .await
        .expect("delivered");

    assert_eq!(answer, Value::from(1_u64));
    let calls = broker.calls_to("directMessage");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, vec![json!("bob"), json!("hi")]);
}

#[tokio::test]
async fn empty_metadata_counts_as_none() {
    let broker = broker().reject_metadata();
    let alice = log_on(&broker, alice()).await;
    let _bob = log_on(&broker, bob()).await;

    alice
        .words
        .send_direct("bob", "hi", Some(&Metadata::new()))
        .await
        .expect("delivered");

    let calls = broker.calls_to("directMessage");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args.len(), 2);
}

#[tokio::test]
async fn accepted_metadata_reaches_recipient() {
    let broker = broker();
    let alice = log_on(&broker, alice()).await;
    let mut bob = log_on(&broker, bob()).await;
    drain(&mut bob.events);

    alice
        .words
        .send_direct("bob", "hi", Some(&style(7)))
        .await
        .expect("delivered");

    assert_eq!(broker.calls_to("directMessage").len(), 1);
    assert!(matches!(
        drain(&mut bob.events).as_slice(),
        [UiEvent::DirectMessage { text, metadata: Some(m), .. }]
            if text == "hi" && m.get("x") == Some(&json!(7))
    ));
}

#[tokio::test]
async fn failed_fallback_reports_plain_error() {
    let broker = broker();
    let alice = log_on(&broker, alice()).await;

    let err = alice
        .words
        .send_direct("nobody", "hi", Some(&style(1)))
        .await
        .expect_err("recipient offline");

    assert!(matches!(
        err,
        ClientError::Remote(RemoteCallError::Failed { ref method, .. }) if method == "directMessage"
    ));
    let calls = broker.calls_to("directMessage");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].args[1], json!("* hi"));
}

#[tokio::test]
async fn plain_failure_is_not_retried() {
    let broker = broker();
    let alice = log_on(&broker, alice()).await;

    let result = alice.words.send_direct("nobody", "hi", None).await;

    assert!(result.is_err());
    assert_eq!(broker.calls_to("directMessage").len(), 1);
}

#[tokio::test]
async fn group_message_falls_back_too() {
    let broker = broker().reject_metadata();
    let alice = log_on(&broker, alice()).await;
    let mut bob = log_on(&broker, bob()).await;
    alice.words.join_group("lobby").await.expect("join");
    bob.words.join_group("lobby").await.expect("join");
    drain(&mut bob.events);

    let delivered = alice
        .words
        .send_group("lobby", "ship it", Some(&style(1)))
        .await
        .expect("fallback succeeds");

    assert_eq!(delivered, Value::from(1_u64));
    assert!(matches!(
        drain(&mut bob.events).as_slice(),
        [UiEvent::GroupMessage { group, sender, text, metadata: None, .. }]
            if group == "lobby" && sender == "alice" && text == "* ship it"
    ));
}
