//! Client for the text chat ("words") service.
//!
//! One [`WordsClient`] exists per attached words service. It is the callback
//! target the service pushes notifications to, and the entry point for
//! everything the UI asks of that service.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::group::GroupSession;
use super::presence::PresenceTracker;
use super::relay::MessageRelay;
use super::ClientError;
use crate::rpc::{InboundHandler, Perspective, RemoteCaller};
use crate::types::{Metadata, Status};
use crate::ui::{ChatUi, UiEvent};

/// Handler for one attached words service.
pub struct WordsClient {
    display_name: String,
    service_name: String,
    name: String,
    ui: Arc<dyn ChatUi>,
    call_timeout: Duration,
    caller: OnceLock<RemoteCaller>,
    presence: PresenceTracker,
    groups: GroupSession,
}

impl std::fmt::Debug for WordsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordsClient")
            .field("display_name", &self.display_name)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl WordsClient {
    /// Handler named `display_name`, attaching to `service_name` as
    /// `perspective_name`.
    pub fn new(
        display_name: impl Into<String>,
        service_name: impl Into<String>,
        perspective_name: impl Into<String>,
        ui: Arc<dyn ChatUi>,
        call_timeout: Duration,
    ) -> Self {
        let display_name = display_name.into();
        Self {
            presence: PresenceTracker::new(display_name.clone(), Arc::clone(&ui)),
            groups: GroupSession::new(display_name.clone(), Arc::clone(&ui)),
            display_name,
            service_name: service_name.into(),
            name: perspective_name.into(),
            ui,
            call_timeout,
            caller: OnceLock::new(),
        }
    }

    /// Display name, e.g. `work (words:alice)`.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Remote service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Our perspective name; also the author of topics we set.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contact status for this service.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Group state for this service.
    pub fn groups(&self) -> &GroupSession {
        &self.groups
    }

    /// Whether [`connected`](Self::connected) has run.
    pub fn is_connected(&self) -> bool {
        self.caller.get().is_some()
    }

    /// Attach completed: keep the perspective, register with the UI and open
    /// the contact list.
    pub fn connected(&self, perspective: Arc<dyn Perspective>) {
        if self
            .caller
            .set(RemoteCaller::new(perspective, self.call_timeout))
            .is_err()
        {
            warn!(account = %self.display_name, "already connected, keeping first perspective");
            return;
        }
        info!(account = %self.display_name, "words client connected");
        self.ui.deliver(UiEvent::AccountRegistered {
            account: self.display_name.clone(),
            service: self.service_name.clone(),
        });
        self.ui.deliver(UiEvent::ContactsListOpened {
            account: self.display_name.clone(),
        });
    }

    fn caller(&self) -> Result<&RemoteCaller, ClientError> {
        self.caller
            .get()
            .ok_or_else(|| ClientError::NotAttached(self.display_name.clone()))
    }

    /// Join a group. See [`GroupSession::join`].
    ///
    /// # Errors
    ///
    /// Fails when not attached, on an invalid transition, or when the
    /// service does not acknowledge.
    pub async fn join_group(&self, group: &str) -> Result<(), ClientError> {
        self.groups.join(self.caller()?, group).await
    }

    /// Leave a group. See [`GroupSession::leave`].
    ///
    /// # Errors
    ///
    /// Fails when not attached, on an invalid transition, or when the
    /// service does not acknowledge.
    pub async fn leave_group(&self, group: &str) -> Result<(), ClientError> {
        self.groups.leave(self.caller()?, group).await
    }

    /// Change a group topic, authored by us. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Fails only when not attached.
    pub fn set_topic(&self, group: &str, topic: &str) -> Result<JoinHandle<()>, ClientError> {
        Ok(self
            .groups
            .set_topic(self.caller()?, group, topic, &self.name))
    }

    /// Put `name` on our contact list. Fire-and-forget; the service answers
    /// with a status notification.
    ///
    /// # Errors
    ///
    /// Fails only when not attached.
    pub fn add_contact(&self, name: &str) -> Result<JoinHandle<()>, ClientError> {
        Ok(self
            .caller()?
            .fire_and_forget("addContact", vec![Value::from(name)]))
    }

    /// Send a direct message. See [`MessageRelay::send_direct`].
    ///
    /// # Errors
    ///
    /// Fails when not attached or when the last delivery tier fails.
    pub async fn send_direct(
        &self,
        contact: &str,
        text: &str,
        metadata: Option<&Metadata>,
    ) -> Result<Value, ClientError> {
        Ok(MessageRelay::new(self.caller()?)
            .send_direct(contact, text, metadata)
            .await?)
    }

    /// Send a group message. See [`MessageRelay::send_group`].
    ///
    /// # Errors
    ///
    /// Fails when not attached or when the last delivery tier fails.
    pub async fn send_group(
        &self,
        group: &str,
        text: &str,
        metadata: Option<&Metadata>,
    ) -> Result<Value, ClientError> {
        Ok(MessageRelay::new(self.caller()?)
            .send_group(group, text, metadata)
            .await?)
    }
}

impl InboundHandler for WordsClient {
    fn receive_group_members(&self, names: Vec<String>, group: &str) {
        debug!(account = %self.display_name, group, count = names.len(), "group members received");
        self.groups.set_members(group, names);
    }

    fn receive_group_message(
        &self,
        sender: &str,
        group: &str,
        message: &str,
        metadata: Option<Metadata>,
    ) {
        self.groups.show_message(group, sender, message, metadata);
    }

    fn member_joined(&self, member: &str, group: &str) {
        self.groups.member_joined(group, member);
    }

    fn member_left(&self, member: &str, group: &str) {
        self.groups.member_left(group, member);
    }

    fn notify_status_changed(&self, name: &str, status: Status) {
        self.presence.set_status(name, status);
    }

    fn receive_direct_message(&self, name: &str, message: &str, metadata: Option<Metadata>) {
        self.presence.ensure_contact(name);
        self.ui.deliver(UiEvent::DirectMessage {
            account: self.display_name.clone(),
            from: name.to_owned(),
            text: message.to_owned(),
            metadata,
        });
    }

    fn receive_contact_list(&self, contacts: Vec<(String, Status)>) {
        debug!(account = %self.display_name, count = contacts.len(), "contact list received");
        self.presence.bulk_set_status(&contacts);
    }

    fn set_group_metadata(&self, metadata: Metadata, group: &str) {
        // Only the topic is meaningful to us; other keys are ignored.
        let Some(topic) = metadata.get("topic").and_then(Value::as_str) else {
            return;
        };
        let author = metadata.get("topic_author").and_then(Value::as_str);
        self.groups.topic_changed(group, topic, author);
    }
}
