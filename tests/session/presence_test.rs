//! Contact presence, locally and through the broker.

use std::sync::Arc;

use pbchat::session::PresenceTracker;
use pbchat::types::Status;
use pbchat::ui::{ChannelUi, UiEvent};

use crate::support::{alice, bob, broker, drain, log_on};

fn statuses(events: &[UiEvent], name: &str) -> Vec<Status> {
    events
        .iter()
        .filter_map(|e| match e {
            UiEvent::ContactStatus { contact, .. } if contact.name == name => Some(contact.status),
            _ => None,
        })
        .collect()
}

#[test]
fn unknown_contact_takes_reported_status() {
    let (ui, mut events) = ChannelUi::channel();
    let tracker = PresenceTracker::new("home (words:alice)", Arc::new(ui));

    for (name, status, reachable) in [
        ("bob", Status::Online, true),
        ("carol", Status::Away, true),
        ("dave", Status::Offline, false),
    ] {
        let contact = tracker.set_status(name, status);
        assert_eq!(contact.status, status);
        assert_eq!(contact.is_online(), reachable);
        assert!(contact.changed_at.is_some());
    }

    assert_eq!(tracker.online_count(), 2);
    let delivered = drain(&mut events);
    assert_eq!(delivered.len(), 3);
    assert_eq!(statuses(&delivered, "carol"), vec![Status::Away]);
}

#[test]
fn last_update_wins() {
    let (ui, _events) = ChannelUi::channel();
    let tracker = PresenceTracker::new("home (words:alice)", Arc::new(ui));

    tracker.set_status("bob", Status::Online);
    tracker.set_status("bob", Status::Away);
    tracker.set_status("bob", Status::Offline);
    tracker.set_status("bob", Status::Away);

    assert_eq!(tracker.contact("bob").map(|c| c.status), Some(Status::Away));
    assert_eq!(tracker.contacts_sorted().len(), 1);
}

#[tokio::test]
async fn watcher_sees_contact_come_and_go() {
    let broker = broker().with_contact("words", "alice", "bob");
    let mut alice = log_on(&broker, alice()).await;
    drain(&mut alice.events);

    let bob = log_on(&broker, bob()).await;
    bob.connection.disconnect();

    let seen = drain(&mut alice.events);
    assert_eq!(statuses(&seen, "bob"), vec![Status::Online, Status::Offline]);
    assert_eq!(
        alice.words.presence().contact("bob").map(|c| c.status),
        Some(Status::Offline)
    );
}

#[tokio::test]
async fn contact_list_snapshot_is_applied() {
    let broker = broker()
        .with_contact("words", "alice", "bob")
        .with_contact("words", "alice", "carol");
    let bob = log_on(&broker, bob()).await;
    let mut alice = log_on(&broker, alice()).await;
    drain(&mut alice.events);

    broker.set_presence("words", "carol", Status::Away);
    drain(&mut alice.events);
    broker.push_contact_list("words", "alice");

    let presence = alice.words.presence();
    let sorted: Vec<(String, Status)> = presence
        .contacts_sorted()
        .into_iter()
        .map(|c| (c.name, c.status))
        .collect();
    assert_eq!(
        sorted,
        vec![
            ("bob".to_owned(), Status::Online),
            ("carol".to_owned(), Status::Away),
        ]
    );
    assert_eq!(drain(&mut alice.events).len(), 2);
    drop(bob);
}

#[tokio::test]
async fn added_contact_reports_current_status() {
    let broker = broker();
    let _bob = log_on(&broker, bob()).await;
    let mut alice = log_on(&broker, alice()).await;
    drain(&mut alice.events);

    alice
        .words
        .add_contact("bob")
        .expect("attached")
        .await
        .expect("task");

    assert_eq!(
        statuses(&drain(&mut alice.events), "bob"),
        vec![Status::Online]
    );
    assert_eq!(broker.calls_to("addContact").len(), 1);
}

#[tokio::test]
async fn direct_message_from_stranger_adds_offline_contact() {
    let broker = broker();
    let mut alice = log_on(&broker, alice()).await;
    let bob = log_on(&broker, bob()).await;
    drain(&mut alice.events);

    bob.words
        .send_direct("alice", "hello?", None)
        .await
        .expect("delivered");

    let seen = drain(&mut alice.events);
    assert!(statuses(&seen, "bob").is_empty());
    assert!(matches!(
        seen.as_slice(),
        [UiEvent::DirectMessage { from, text, .. }] if from == "bob" && text == "hello?"
    ));
    assert_eq!(
        alice.words.presence().contact("bob").map(|c| c.status),
        Some(Status::Offline)
    );
}
