//! Contact status tracking for one attached service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::trace;

use crate::types::{Contact, Status};
use crate::ui::{ChatUi, UiEvent};

/// Per-contact status, updated only by status notifications.
///
/// Uses a sync [`Mutex`] since the critical sections are brief (no awaits).
pub struct PresenceTracker {
    account: String,
    ui: Arc<dyn ChatUi>,
    contacts: Mutex<HashMap<String, Contact>>,
}

impl PresenceTracker {
    /// Tracker reporting to `ui` under the handler display name `account`.
    pub fn new(account: impl Into<String>, ui: Arc<dyn ChatUi>) -> Self {
        Self {
            account: account.into(),
            ui,
            contacts: Mutex::new(HashMap::new()),
        }
    }

    fn contacts(&self) -> MutexGuard<'_, HashMap<String, Contact>> {
        self.contacts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `status` for `name`, creating the contact if needed, and
    /// notify the contact list view before returning.
    pub fn set_status(&self, name: &str, status: Status) -> Contact {
        let contact = {
            let mut contacts = self.contacts();
            let contact = contacts
                .entry(name.to_owned())
                .or_insert_with(|| Contact::new(name));
            contact.status = status;
            contact.changed_at = Some(Utc::now());
            contact.clone()
        };
        trace!(account = %self.account, contact = name, %status, "contact status set");
        self.ui.deliver(UiEvent::ContactStatus {
            account: self.account.clone(),
            contact: contact.clone(),
        });
        contact
    }

    /// Apply a roster snapshot, in order.
    pub fn bulk_set_status(&self, roster: &[(String, Status)]) {
        for (name, status) in roster {
            self.set_status(name, *status);
        }
    }

    /// The contact for `name`, creating an Offline entry without notifying
    /// anyone when it is not known yet.
    pub fn ensure_contact(&self, name: &str) -> Contact {
        self.contacts()
            .entry(name.to_owned())
            .or_insert_with(|| Contact::new(name))
            .clone()
    }

    /// The contact for `name`, if known.
    pub fn contact(&self, name: &str) -> Option<Contact> {
        self.contacts().get(name).cloned()
    }

    /// Every known contact, sorted by name.
    pub fn contacts_sorted(&self) -> Vec<Contact> {
        let mut all: Vec<Contact> = self.contacts().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// How many contacts are Online or Away.
    pub fn online_count(&self) -> usize {
        self.contacts().values().filter(|c| c.is_online()).count()
    }
}
