//! Remote-object RPC seam.
//!
//! The transport is an external collaborator. This module fixes the shape the
//! session layer needs from it:
//! - [`Transport`] reaches the root object published at `host:port`
//! - [`RemoteRoot`] authenticates an identity against that root
//! - [`RemoteIdentity`] attaches a local [`InboundHandler`] to a named service
//! - [`Perspective`] issues calls on the attached service
//!
//! All outbound calls from the session layer go through [`RemoteCaller`],
//! which bounds each one with the configured timeout.
//! [`memory::MemoryBroker`] implements the whole seam in-process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{Metadata, Status};

pub mod memory;

/// Default bound for a single remote call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for reaching the remote root object.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Any failure of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteCallError {
    /// The remote side answered with an error.
    #[error("remote call {method} failed: {reason}")]
    Failed {
        /// Remote method name.
        method: String,
        /// Error text reported by the remote side.
        reason: String,
    },

    /// No answer arrived within the configured bound.
    #[error("remote call {method} timed out after {timeout_ms} ms")]
    Timeout {
        /// Remote method name.
        method: String,
        /// The bound that elapsed.
        timeout_ms: u64,
    },

    /// The connection was closed before or while the call was outstanding.
    #[error("connection lost")]
    Disconnected,
}

impl RemoteCallError {
    /// Shorthand for [`RemoteCallError::Failed`].
    pub fn failed(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Timeout error for `method` after `timeout`.
    pub fn timeout(method: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            method: method.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Call bounds applied by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcTimeouts {
    /// Bound for every call, including authenticate and attach.
    pub call: Duration,
    /// Bound for reaching the root object.
    pub connect: Duration,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self {
            call: DEFAULT_CALL_TIMEOUT,
            connect: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Reaches remote root objects.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the root object published at `host:port`.
    async fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn RemoteRoot>, RemoteCallError>;
}

/// The root object of one connection.
#[async_trait]
pub trait RemoteRoot: Send + Sync {
    /// Identify with a credential pair.
    ///
    /// `Ok(None)` means the remote side rejected the credentials.
    async fn authenticate(
        &self,
        identity: &str,
        password: &str,
    ) -> Result<Option<Arc<dyn RemoteIdentity>>, RemoteCallError>;

    /// Drop the connection. Outstanding and later calls fail with
    /// [`RemoteCallError::Disconnected`].
    fn disconnect(&self);
}

/// An authenticated identity, able to attach to services.
#[async_trait]
pub trait RemoteIdentity: Send + Sync {
    /// Identity name as accepted by the remote side.
    fn name(&self) -> &str;

    /// Attach `client` as the callback target for `perspective_name` on the
    /// service `service_name`, returning the perspective to issue calls on.
    async fn attach(
        &self,
        service_name: &str,
        perspective_name: &str,
        client: Arc<dyn InboundHandler>,
    ) -> Result<Arc<dyn Perspective>, RemoteCallError>;
}

/// Remote view through which calls are issued.
#[async_trait]
pub trait Perspective: Send + Sync {
    /// Invoke `method` with positional `args` and await the answer.
    async fn call_remote(&self, method: &str, args: Vec<Value>) -> Result<Value, RemoteCallError>;
}

/// Notifications the remote service pushes to an attached client.
///
/// Dispatched as soon as they arrive; implementations update local state and
/// the UI synchronously.
pub trait InboundHandler: Send + Sync {
    /// Full member roster of `group`.
    fn receive_group_members(&self, names: Vec<String>, group: &str);
    /// A message posted to `group`.
    fn receive_group_message(
        &self,
        sender: &str,
        group: &str,
        message: &str,
        metadata: Option<Metadata>,
    );
    /// `member` joined `group`.
    fn member_joined(&self, member: &str, group: &str);
    /// `member` left `group`.
    fn member_left(&self, member: &str, group: &str);
    /// A contact's status changed.
    fn notify_status_changed(&self, name: &str, status: Status);
    /// A direct message from `name`.
    fn receive_direct_message(&self, name: &str, message: &str, metadata: Option<Metadata>);
    /// Initial contact list snapshot.
    fn receive_contact_list(&self, contacts: Vec<(String, Status)>);
    /// Group metadata changed; may carry `topic` and `topic_author`.
    fn set_group_metadata(&self, metadata: Metadata, group: &str);
}

/// Issues bounded calls on one perspective.
#[derive(Clone)]
pub struct RemoteCaller {
    perspective: Arc<dyn Perspective>,
    timeout: Duration,
}

impl std::fmt::Debug for RemoteCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCaller")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RemoteCaller {
    /// Wrap `perspective`, bounding each call by `timeout`.
    pub fn new(perspective: Arc<dyn Perspective>, timeout: Duration) -> Self {
        Self {
            perspective,
            timeout,
        }
    }

    /// Call `method` and await the answer.
    ///
    /// # Errors
    ///
    /// Returns the remote error, or [`RemoteCallError::Timeout`] when no
    /// answer arrives in time.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RemoteCallError> {
        let call_id = Uuid::new_v4();
        debug!(%call_id, method, args = args.len(), "remote call issued");

        let result =
            match tokio::time::timeout(self.timeout, self.perspective.call_remote(method, args))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(RemoteCallError::timeout(method, self.timeout)),
            };

        match &result {
            Ok(_) => debug!(%call_id, method, "remote call answered"),
            Err(e) => debug!(%call_id, method, error = %e, "remote call failed"),
        }
        result
    }

    /// Issue `method` without waiting for the answer. Failures are logged.
    ///
    /// Must be called from within a Tokio runtime. The returned handle may be
    /// awaited or dropped.
    pub fn fire_and_forget(&self, method: &str, args: Vec<Value>) -> JoinHandle<()> {
        let caller = self.clone();
        let method = method.to_owned();
        tokio::spawn(async move {
            if let Err(e) = caller.call(&method, args).await {
                warn!(method = %method, error = %e, "fire-and-forget call failed");
            }
        })
    }
}
