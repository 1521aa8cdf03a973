//! Logon workflow: connect, identify, attach, disconnect.

use std::sync::Arc;
use std::time::Duration;

use pbchat::rpc::memory::MemoryBroker;
use pbchat::rpc::{RemoteCallError, RpcTimeouts};
use pbchat::session::{log_on_auto, Account, ClientError, LogonError, LogonStage};
use pbchat::ui::{ChannelUi, ChatUi};

use crate::support::{account, alice, bob, broker, drain, log_on};

fn ui() -> Arc<dyn ChatUi> {
    let (ui, _events) = ChannelUi::channel();
    Arc::new(ui)
}

#[tokio::test]
async fn log_on_attaches_words_service() {
    let broker = broker();
    let mut alice = log_on(&broker, alice()).await;

    assert_eq!(alice.connection.session().identity().name(), "alice");
    assert_eq!(alice.connection.handlers().len(), 1);
    assert!(alice.connection.failures().is_empty());
    assert!(alice.words.is_connected());
    assert!(broker.is_attached("words", "alice"));
    assert!(!drain(&mut alice.events).is_empty());
}

#[tokio::test]
async fn wrong_password_is_auth_error() {
    let broker = broker();
    let result = account("home", "alice", "guess")
        .log_on(&broker, ui(), &RpcTimeouts::default())
        .await;

    match result {
        Err(LogonError::Auth { identity }) => assert_eq!(identity, "alice"),
        other => panic!("expected auth error, got {other:?}"),
    }
    assert!(!broker.is_attached("words", "alice"));
}

#[tokio::test]
async fn unreachable_host_is_connection_error() {
    let broker = broker().unreachable();
    let result = alice()
        .log_on(&broker, ui(), &RpcTimeouts::default())
        .await;

    match result {
        Err(LogonError::Connection {
            host, port, stage, ..
        }) => {
            assert_eq!(host, "localhost");
            assert_eq!(port, 8787);
            assert_eq!(stage, LogonStage::Connecting);
        }
        other => panic!("expected connection error, got {other:?}"),
    }
}

#[tokio::test]
async fn broken_identify_exchange_is_connection_error() {
    let broker = broker().fail_method("authenticate");
    let result = alice()
        .log_on(&broker, ui(), &RpcTimeouts::default())
        .await;

    assert!(matches!(
        result,
        Err(LogonError::Connection {
            stage: LogonStage::Identifying,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn stalled_connect_times_out() {
    let broker = broker().stall_method("connect");
    let timeouts = RpcTimeouts {
        call: Duration::from_secs(30),
        connect: Duration::from_secs(5),
    };
    let result = alice().log_on(&broker, ui(), &timeouts).await;

    match result {
        Err(LogonError::Connection { stage, source, .. }) => {
            assert_eq!(stage, LogonStage::Connecting);
            assert_eq!(
                source,
                RemoteCallError::Timeout {
                    method: "connect".to_owned(),
                    timeout_ms: 5_000,
                }
            );
        }
        other => panic!("expected connect timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn auto_login_skips_manual_accounts_and_isolates_failures() {
    let broker = broker();
    let manual = Arc::new(Account::new(
        "manual",
        false,
        "localhost",
        8787,
        "bob",
        "pw-bob",
        vec![],
    ));
    let rejected = account("typo", "alice", "wrong");
    let accounts = vec![manual, rejected, bob()];

    let outcomes = log_on_auto(&accounts, &broker, ui(), &RpcTimeouts::default()).await;

    let names: Vec<&str> = outcomes.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["typo", "work"]);
    assert!(matches!(outcomes[0].1, Err(LogonError::Auth { .. })));
    assert!(outcomes[1].1.is_ok());
    assert!(broker.is_attached("words", "bob"));
}

#[tokio::test]
async fn disconnect_fails_later_calls() {
    let broker = broker();
    let alice = log_on(&broker, alice()).await;
    let words = Arc::clone(&alice.words);

    alice.connection.disconnect();

    assert!(!broker.is_attached("words", "alice"));
    let err = words
        .send_direct("bob", "still there?", None)
        .await
        .expect_err("disconnected");
    assert!(matches!(
        err,
        ClientError::Remote(RemoteCallError::Disconnected)
    ));
}

#[tokio::test]
async fn each_account_gets_its_own_session() {
    let broker = MemoryBroker::new()
        .with_user("alice", "pw-alice")
        .with_user("bob", "pw-bob")
        .with_service("words");
    let alice = log_on(&broker, alice()).await;
    let bob = log_on(&broker, bob()).await;

    alice.connection.disconnect();

    assert!(!broker.is_attached("words", "alice"));
    assert!(broker.is_attached("words", "bob"));
    assert!(bob.words.is_connected());
}
