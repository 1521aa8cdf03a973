//! UI collaborator surface.
//!
//! The adapter never renders anything. It describes what changed as a
//! [`UiEvent`] and hands it to a [`ChatUi`]. [`ChannelUi`] forwards events
//! over an unbounded mpsc channel so a front end can consume them at its own
//! pace.

use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{Contact, Metadata};

/// Something the chat front end should reflect.
///
/// Every variant carries the display name of the service handler it came
/// from, e.g. `"work (words:alice)"`.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A service handler finished attaching and is ready for use.
    AccountRegistered {
        /// Handler display name.
        account: String,
        /// Remote service the handler is attached to.
        service: String,
    },
    /// The contact list view for this handler should be shown.
    ContactsListOpened {
        /// Handler display name.
        account: String,
    },
    /// A contact's status changed.
    ContactStatus {
        /// Handler display name.
        account: String,
        /// Contact after the update.
        contact: Contact,
    },
    /// A direct message arrived.
    DirectMessage {
        /// Handler display name.
        account: String,
        /// Sender perspective name.
        from: String,
        /// Message body.
        text: String,
        /// Optional sender-supplied metadata.
        metadata: Option<Metadata>,
    },
    /// A line to show in a group conversation (remote or system generated).
    GroupMessage {
        /// Handler display name.
        account: String,
        /// Group name.
        group: String,
        /// Sender perspective name, `sys` for local system lines.
        sender: String,
        /// Message body.
        text: String,
        /// Optional sender-supplied metadata.
        metadata: Option<Metadata>,
    },
    /// Full member roster of a group.
    GroupMembers {
        /// Handler display name.
        account: String,
        /// Group name.
        group: String,
        /// Members as reported by the service.
        members: Vec<String>,
    },
    /// Someone else joined a group.
    MemberJoined {
        /// Handler display name.
        account: String,
        /// Group name.
        group: String,
        /// Joining member.
        member: String,
    },
    /// Someone else left a group.
    MemberLeft {
        /// Handler display name.
        account: String,
        /// Group name.
        group: String,
        /// Departing member.
        member: String,
    },
    /// The topic of a group changed.
    TopicChanged {
        /// Handler display name.
        account: String,
        /// Group name.
        group: String,
        /// New topic text.
        topic: String,
        /// Who set it, when the service reported it.
        author: Option<String>,
    },
    /// We left the group; its conversation can be closed.
    GroupClosed {
        /// Handler display name.
        account: String,
        /// Group name.
        group: String,
    },
}

impl UiEvent {
    /// Display name of the handler that produced this event.
    pub fn account(&self) -> &str {
        match self {
            Self::AccountRegistered { account, .. }
            | Self::ContactsListOpened { account }
            | Self::ContactStatus { account, .. }
            | Self::DirectMessage { account, .. }
            | Self::GroupMessage { account, .. }
            | Self::GroupMembers { account, .. }
            | Self::MemberJoined { account, .. }
            | Self::MemberLeft { account, .. }
            | Self::TopicChanged { account, .. }
            | Self::GroupClosed { account, .. } => account,
        }
    }
}

impl std::fmt::Display for UiEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccountRegistered { account, service } => {
                write!(f, "[{account}] registered with service {service}")
            }
            Self::ContactsListOpened { account } => write!(f, "[{account}] contact list opened"),
            Self::ContactStatus { account, contact } => {
                write!(f, "[{account}] {} is {}", contact.name, contact.status)
            }
            Self::DirectMessage {
                account,
                from,
                text,
                ..
            } => write!(f, "[{account}] <{from}> {text}"),
            Self::GroupMessage {
                account,
                group,
                sender,
                text,
                ..
            } => write!(f, "[{account}] #{group} <{sender}> {text}"),
            Self::GroupMembers {
                account,
                group,
                members,
            } => write!(f, "[{account}] #{group} members: {}", members.join(", ")),
            Self::MemberJoined {
                account,
                group,
                member,
            } => write!(f, "[{account}] #{group} {member} joined"),
            Self::MemberLeft {
                account,
                group,
                member,
            } => write!(f, "[{account}] #{group} {member} left"),
            Self::TopicChanged {
                account,
                group,
                topic,
                author,
            } => match author {
                Some(author) => write!(f, "[{account}] #{group} topic by {author}: {topic}"),
                None => write!(f, "[{account}] #{group} topic: {topic}"),
            },
            Self::GroupClosed { account, group } => write!(f, "[{account}] #{group} closed"),
        }
    }
}

/// The chat front end as seen from the adapter.
///
/// `deliver` is called synchronously from inbound notification handling, so
/// implementations must not block.
pub trait ChatUi: Send + Sync {
    /// Reflect one change.
    fn deliver(&self, event: UiEvent);
}

/// [`ChatUi`] that forwards every event over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelUi {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelUi {
    /// Create the UI handle and the receiving end the front end drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ChatUi for ChannelUi {
    fn deliver(&self, event: UiEvent) {
        if let Err(e) = self.tx.send(event) {
            // Receiver dropped: the front end went away, nothing to update.
            debug!(event = %e.0, "UI channel closed, event discarded");
        }
    }
}
