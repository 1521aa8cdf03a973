//! Core chat types shared by the session layer, the UI surface and the RPC seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form metadata carried alongside message text (styling, client hints).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Presence of a contact as reported by the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Connected and available.
    Online,
    /// Connected but idle.
    Away,
    /// Not connected.
    #[default]
    Offline,
}

impl Status {
    /// Online and Away both count as reachable.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online | Self::Away)
    }

    /// Human-readable label for contact list rendering.
    pub fn label(self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Away => "Away",
            Self::Offline => "Offline",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A person on the contact list of one attached service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    /// Remote perspective name of the contact.
    pub name: String,
    /// Last status received for this contact.
    pub status: Status,
    /// When the status was last set by a notification. `None` until the first one.
    pub changed_at: Option<DateTime<Utc>>,
}

impl Contact {
    /// A contact nobody has reported a status for yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Status::Offline,
            changed_at: None,
        }
    }

    /// See [`Status::is_online`].
    pub fn is_online(&self) -> bool {
        self.status.is_online()
    }
}
