//! Account sessions against a perspective-broker chat service.
//!
//! Logon is a fixed sequence ([`logon`]): connect, identify, then attach
//! every configured service ([`attach`]). Each attached service gets its own
//! [`WordsClient`], which owns the [`presence`] and [`group`] state for that
//! service and sends outbound traffic through the [`relay`].

use anyhow::Context;
use serde::Deserialize;

use crate::config::AccountConfig;
use crate::credentials::Credentials;
use crate::rpc::RemoteCallError;

pub mod attach;
pub mod group;
pub mod logon;
pub mod presence;
pub mod relay;
pub mod words;

pub use attach::{attach_all, AttachFailure, AttachReport, ServiceHandler};
pub use group::{Group, GroupSession, GroupState, Topic};
pub use logon::{authenticate, connect, log_on_auto, Connection, LogonStage, Session};
pub use presence::PresenceTracker;
pub use relay::MessageRelay;
pub use words::WordsClient;

/// Kind of remote service a descriptor attaches to.
///
/// Closed set, resolved when configuration is parsed: an unknown tag is a
/// configuration error. A known tag without a local implementation fails at
/// attach time for that service only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Text chat: contacts, groups, direct and group messages.
    Words,
    /// Shared-world service. Known to the registry, no client implementation.
    Reality,
}

impl ServiceType {
    /// Every registered service type.
    pub const ALL: [ServiceType; 2] = [ServiceType::Words, ServiceType::Reality];

    /// Configuration tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Words => "words",
            Self::Reality => "reality",
        }
    }

    /// Whether a handler can be constructed for this type.
    pub fn is_implemented(self) -> bool {
        matches!(self, Self::Words)
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One service to attach after identifying.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceDescriptor {
    /// Which handler to construct.
    pub service_type: ServiceType,
    /// Remote service name.
    pub service_name: String,
    /// Perspective to attach as.
    pub perspective_name: String,
}

impl ServiceDescriptor {
    /// Build a descriptor.
    pub fn new(
        service_type: ServiceType,
        service_name: impl Into<String>,
        perspective_name: impl Into<String>,
    ) -> Self {
        Self {
            service_type,
            service_name: service_name.into(),
            perspective_name: perspective_name.into(),
        }
    }
}

/// A remote endpoint, the credentials for it and the services to attach.
///
/// Immutable once built; shared as `Arc<Account>` by its session and handlers.
#[derive(Clone)]
pub struct Account {
    /// Account name shown in the UI.
    pub name: String,
    /// Log on automatically at startup.
    pub auto_login: bool,
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Identity to authenticate as.
    pub identity: String,
    password: String,
    /// Services to attach, in order.
    pub services: Vec<ServiceDescriptor>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("auto_login", &self.auto_login)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("identity", &self.identity)
            .field("password", &"[REDACTED]")
            .field("services", &self.services)
            .finish()
    }
}

impl Account {
    /// Build an account from already-resolved values.
    pub fn new(
        name: impl Into<String>,
        auto_login: bool,
        host: impl Into<String>,
        port: u16,
        identity: impl Into<String>,
        password: impl Into<String>,
        services: Vec<ServiceDescriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            auto_login,
            host: host.into(),
            port,
            identity: identity.into(),
            password: password.into(),
            services,
        }
    }

    /// Build an account from its configuration entry, resolving the password.
    ///
    /// `password_env` is looked up in `credentials` first, then in the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when no password can be resolved.
    pub fn from_config(config: &AccountConfig, credentials: &Credentials) -> anyhow::Result<Self> {
        let password = match (&config.password, &config.password_env) {
            (Some(password), None) => password.clone(),
            (None, Some(key)) => credentials
                .resolve(key)
                .with_context(|| format!("password for account {} not found", config.name))?,
            (Some(_), Some(_)) => {
                anyhow::bail!(
                    "account {} sets both password and password_env",
                    config.name
                )
            }
            (None, None) => anyhow::bail!("account {} has no password configured", config.name),
        };
        Ok(Self::new(
            config.name.clone(),
            config.auto_login,
            config.host.clone(),
            config.port,
            config.identity.clone(),
            password,
            config.services.clone(),
        ))
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Display name of the handler for one service, e.g. `work (words:alice)`.
    pub fn handler_name(&self, descriptor: &ServiceDescriptor) -> String {
        format!(
            "{} ({}:{})",
            self.name, descriptor.service_name, descriptor.perspective_name
        )
    }
}

/// Why logging on failed. Logon is all or nothing: no partial state remains.
#[derive(Debug, thiserror::Error)]
pub enum LogonError {
    /// The remote endpoint could not be reached or dropped the handshake.
    #[error("could not reach {host}:{port} while {stage}: {source}")]
    Connection {
        /// Remote host.
        host: String,
        /// Remote port.
        port: u16,
        /// Step that failed.
        stage: LogonStage,
        /// Transport failure.
        #[source]
        source: RemoteCallError,
    },

    /// The remote endpoint rejected the credentials.
    #[error("identity {identity} rejected: username or password incorrect")]
    Auth {
        /// Identity that was rejected.
        identity: String,
    },
}

/// Why one service failed to attach. Never aborts the other services.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// The service type is registered without an implementation.
    #[error("service type {0} has no client implementation")]
    UnsupportedService(ServiceType),

    /// The remote attach call failed.
    #[error("attach to {service} as {perspective} failed: {source}")]
    Remote {
        /// Remote service name.
        service: String,
        /// Perspective name.
        perspective: String,
        /// Transport failure.
        #[source]
        source: RemoteCallError,
    },
}

/// Errors from operations on an attached client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The client has not finished attaching.
    #[error("{0} is not attached")]
    NotAttached(String),

    /// The group is not in a state that allows the operation.
    #[error("cannot {op} group {group} while {state}")]
    InvalidTransition {
        /// Group name.
        group: String,
        /// Requested operation.
        op: &'static str,
        /// Current state.
        state: GroupState,
    },

    /// A join or leave for the group is still awaiting its answer.
    #[error("cannot {op} group {group}: a {state} request is still outstanding")]
    Pending {
        /// Group name.
        group: String,
        /// Requested operation.
        op: &'static str,
        /// State set by the outstanding request.
        state: GroupState,
    },

    /// The remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteCallError),
}
