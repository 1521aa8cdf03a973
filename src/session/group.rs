//! Group membership and conversation state for one attached service.
//!
//! Local membership only advances on acknowledged RPCs:
//!
//! ```text
//! NotJoined --join--> Joining --ack--> Joined --leave--> Leaving --ack--> NotJoined
//! ```
//!
//! At most one join or leave per group is outstanding at a time. A failed
//! one leaves the group at Joining or Leaving with nothing outstanding, and
//! the same operation may be retried from there; nothing reverts on its own.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ClientError;
use crate::rpc::RemoteCaller;
use crate::types::Metadata;
use crate::ui::{ChatUi, UiEvent};

/// Sender name used for locally generated conversation lines.
pub const SYSTEM_SENDER: &str = "sys";

/// Membership state of one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GroupState {
    /// Not a member.
    #[default]
    NotJoined,
    /// `joinGroup` issued, not acknowledged.
    Joining,
    /// Membership acknowledged.
    Joined,
    /// `leaveGroup` issued, not acknowledged.
    Leaving,
}

impl GroupState {
    fn can_join(self) -> bool {
        matches!(self, Self::NotJoined | Self::Joining | Self::Leaving)
    }

    fn can_leave(self) -> bool {
        matches!(self, Self::Joined | Self::Leaving)
    }
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotJoined => "not joined",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::Leaving => "leaving",
        })
    }
}

/// A group topic and who set it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    /// Topic text.
    pub text: String,
    /// Setter, when the service reported one.
    pub author: Option<String>,
}

/// Local view of one group.
///
/// Only kept while we are in the group or on our way in or out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Group name.
    pub name: String,
    /// Membership state.
    pub state: GroupState,
    /// A join or leave is awaiting its answer.
    pub pending: bool,
    /// Members as last reported by the service.
    pub members: BTreeSet<String>,
    /// Topic as last reported by the service.
    pub topic: Option<Topic>,
    generation: u64,
}

impl Group {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: GroupState::NotJoined,
            pending: false,
            members: BTreeSet::new(),
            topic: None,
            generation: 0,
        }
    }

    /// True only once a join has been acknowledged.
    pub fn joined(&self) -> bool {
        self.state == GroupState::Joined
    }
}

/// Groups of one attached service.
pub struct GroupSession {
    account: String,
    ui: Arc<dyn ChatUi>,
    groups: Mutex<HashMap<String, Group>>,
}

impl GroupSession {
    /// Session reporting to `ui` under the handler display name `account`.
    pub fn new(account: impl Into<String>, ui: Arc<dyn ChatUi>) -> Self {
        Self {
            account: account.into(),
            ui,
            groups: Mutex::new(HashMap::new()),
        }
    }

    fn groups(&self) -> MutexGuard<'_, HashMap<String, Group>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to a group we track. Groups we are not in are left alone.
    fn update_group(&self, name: &str, f: impl FnOnce(&mut Group)) {
        if let Some(group) = self.groups().get_mut(name) {
            f(group);
        }
    }

    /// Snapshot of one group, if tracked.
    pub fn group(&self, name: &str) -> Option<Group> {
        self.groups().get(name).cloned()
    }

    /// Membership state; untracked groups are NotJoined.
    pub fn state(&self, name: &str) -> GroupState {
        self.groups()
            .get(name)
            .map(|g| g.state)
            .unwrap_or_default()
    }

    /// Names of groups whose membership is acknowledged, sorted.
    pub fn joined_groups(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .groups()
            .values()
            .filter(|g| g.joined())
            .map(|g| g.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Move `name` to `next` and mark it pending. Returns the request number.
    fn begin(
        &self,
        name: &str,
        op: &'static str,
        allowed: fn(GroupState) -> bool,
        next: GroupState,
    ) -> Result<u64, ClientError> {
        let mut groups = self.groups();
        let group = groups
            .entry(name.to_owned())
            .or_insert_with(|| Group::new(name));
        if group.pending {
            return Err(ClientError::Pending {
                group: name.to_owned(),
                op,
                state: group.state,
            });
        }
        if !allowed(group.state) {
            return Err(ClientError::InvalidTransition {
                group: name.to_owned(),
                op,
                state: group.state,
            });
        }
        group.state = next;
        group.pending = true;
        group.generation = group.generation.wrapping_add(1);
        Ok(group.generation)
    }

    /// Request `generation` failed: keep the state, allow a retry.
    fn abandon(&self, name: &str, generation: u64) {
        self.update_group(name, |group| {
            if group.generation == generation {
                group.pending = false;
            }
        });
    }

    /// Request `generation` was acknowledged. Moves `expected` to `next` only
    /// if nothing else touched the group meanwhile. NotJoined drops the entry.
    fn settle(&self, name: &str, generation: u64, expected: GroupState, next: GroupState) -> bool {
        let mut groups = self.groups();
        let current = groups
            .get(name)
            .is_some_and(|g| g.generation == generation && g.state == expected);
        if !current {
            return false;
        }
        if next == GroupState::NotJoined {
            groups.remove(name);
        } else if let Some(group) = groups.get_mut(name) {
            group.state = next;
            group.pending = false;
        }
        true
    }

    fn system_line(&self, group: &str, text: &str) {
        self.ui.deliver(UiEvent::GroupMessage {
            account: self.account.clone(),
            group: group.to_owned(),
            sender: SYSTEM_SENDER.to_owned(),
            text: text.to_owned(),
            metadata: None,
        });
    }

    /// Join `name`.
    ///
    /// On acknowledgement the group becomes Joined, a "you joined" line is
    /// shown and the member roster is requested.
    ///
    /// # Errors
    ///
    /// [`ClientError::Pending`] while a join or leave is outstanding,
    /// [`ClientError::InvalidTransition`] when already Joined, or the remote
    /// error, in which case the group stays Joining.
    pub async fn join(&self, caller: &RemoteCaller, name: &str) -> Result<(), ClientError> {
        let generation = self.begin(name, "join", GroupState::can_join, GroupState::Joining)?;

        if let Err(e) = caller.call("joinGroup", vec![Value::from(name)]).await {
            self.abandon(name, generation);
            warn!(account = %self.account, group = name, error = %e, "join not acknowledged");
            return Err(e.into());
        }

        if !self.settle(name, generation, GroupState::Joining, GroupState::Joined) {
            debug!(account = %self.account, group = name, "stale join acknowledgement ignored");
            return Ok(());
        }
        info!(account = %self.account, group = name, "joined group");
        self.system_line(name, "you joined");

        if let Err(e) = caller.call("getGroupMembers", vec![Value::from(name)]).await {
            warn!(account = %self.account, group = name, error = %e, "member roster request failed");
        }
        Ok(())
    }

    /// Leave `name`.
    ///
    /// On acknowledgement the group is forgotten, a "you left" line is shown
    /// and the conversation is closed.
    ///
    /// # Errors
    ///
    /// [`ClientError::Pending`] while a join or leave is outstanding,
    /// [`ClientError::InvalidTransition`] unless Joined or Leaving, or the
    /// remote error, in which case the group stays Leaving.
    pub async fn leave(&self, caller: &RemoteCaller, name: &str) -> Result<(), ClientError> {
        let generation = self.begin(name, "leave", GroupState::can_leave, GroupState::Leaving)?;

        if let Err(e) = caller.call("leaveGroup", vec![Value::from(name)]).await {
            self.abandon(name, generation);
            warn!(account = %self.account, group = name, error = %e, "leave not acknowledged");
            return Err(e.into());
        }

        if !self.settle(name, generation, GroupState::Leaving, GroupState::NotJoined) {
            debug!(account = %self.account, group = name, "stale leave acknowledgement ignored");
            return Ok(());
        }
        info!(account = %self.account, group = name, "left group");
        self.system_line(name, "you left");
        self.ui.deliver(UiEvent::GroupClosed {
            account: self.account.clone(),
            group: name.to_owned(),
        });
        Ok(())
    }

    /// Ask the service to change the topic of `name`, authored by `author`.
    ///
    /// Fire-and-forget: the local display only changes when the service
    /// echoes the change back through [`topic_changed`](Self::topic_changed).
    pub fn set_topic(
        &self,
        caller: &RemoteCaller,
        name: &str,
        text: &str,
        author: &str,
    ) -> JoinHandle<()> {
        caller.fire_and_forget(
            "setGroupMetadata",
            vec![
                json!({ "topic": text, "topic_author": author }),
                Value::from(name),
            ],
        )
    }

    /// The service reported the full roster of `name`.
    pub fn set_members(&self, name: &str, members: Vec<String>) {
        self.update_group(name, |group| {
            group.members = members.iter().cloned().collect();
        });
        self.ui.deliver(UiEvent::GroupMembers {
            account: self.account.clone(),
            group: name.to_owned(),
            members,
        });
    }

    /// Someone joined `name`. Does not touch our own membership state.
    pub fn member_joined(&self, name: &str, member: &str) {
        self.update_group(name, |group| {
            group.members.insert(member.to_owned());
        });
        self.ui.deliver(UiEvent::MemberJoined {
            account: self.account.clone(),
            group: name.to_owned(),
            member: member.to_owned(),
        });
    }

    /// Someone left `name`. Does not touch our own membership state.
    pub fn member_left(&self, name: &str, member: &str) {
        self.update_group(name, |group| {
            group.members.remove(member);
        });
        self.ui.deliver(UiEvent::MemberLeft {
            account: self.account.clone(),
            group: name.to_owned(),
            member: member.to_owned(),
        });
    }

    /// A message was posted to `name`.
    pub fn show_message(&self, name: &str, sender: &str, text: &str, metadata: Option<Metadata>) {
        self.ui.deliver(UiEvent::GroupMessage {
            account: self.account.clone(),
            group: name.to_owned(),
            sender: sender.to_owned(),
            text: text.to_owned(),
            metadata,
        });
    }

    /// The service reported a new topic for `name`.
    pub fn topic_changed(&self, name: &str, text: &str, author: Option<&str>) {
        self.update_group(name, |group| {
            group.topic = Some(Topic {
                text: text.to_owned(),
                author: author.map(str::to_owned),
            });
        });
        self.ui.deliver(UiEvent::TopicChanged {
            account: self.account.clone(),
            group: name.to_owned(),
            topic: text.to_owned(),
            author: author.map(str::to_owned),
        });
    }
}
