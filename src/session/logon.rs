//! Logon workflow: connect, identify, attach.
//!
//! Each step either yields the input of the next one or a typed
//! [`LogonError`]. Nothing is retried here; the caller decides.

use std::sync::Arc;

use tracing::{info, warn};

use super::attach::{attach_all, AttachFailure, ServiceHandler};
use super::words::WordsClient;
use super::{Account, LogonError};
use crate::rpc::{RemoteCallError, RemoteIdentity, RemoteRoot, RpcTimeouts, Transport};
use crate::ui::ChatUi;

/// Step of the logon sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonStage {
    /// Reaching the remote root object.
    Connecting,
    /// Presenting credentials.
    Identifying,
    /// Attaching configured services.
    Attaching,
}

impl std::fmt::Display for LogonStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Attaching => "attaching",
        })
    }
}

/// An authenticated connection for one account.
pub struct Session {
    account: Arc<Account>,
    root: Arc<dyn RemoteRoot>,
    identity: Arc<dyn RemoteIdentity>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account.name)
            .field("identity", &self.identity.name())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// The account this session was opened for.
    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    /// The authenticated remote identity.
    pub fn identity(&self) -> &Arc<dyn RemoteIdentity> {
        &self.identity
    }

    /// Close the underlying connection.
    pub fn disconnect(&self) {
        self.root.disconnect();
        info!(account = %self.account.name, "disconnected");
    }
}

fn connection_error(account: &Account, stage: LogonStage, source: RemoteCallError) -> LogonError {
    LogonError::Connection {
        host: account.host.clone(),
        port: account.port,
        stage,
        source,
    }
}

/// Reach the root object published at the account's host and port.
///
/// # Errors
///
/// [`LogonError::Connection`] when unreachable or when the bound elapses.
pub async fn connect(
    transport: &dyn Transport,
    account: &Account,
    timeouts: &RpcTimeouts,
) -> Result<Arc<dyn RemoteRoot>, LogonError> {
    info!(account = %account.name, host = %account.host, port = account.port, "connecting");
    let root = tokio::time::timeout(
        timeouts.connect,
        transport.connect(&account.host, account.port),
    )
    .await
    .map_err(|_| RemoteCallError::timeout("connect", timeouts.connect))
    .and_then(|r| r)
    .map_err(|e| {
        warn!(account = %account.name, error = %e, "not connected");
        connection_error(account, LogonStage::Connecting, e)
    })?;
    info!(account = %account.name, "connected");
    Ok(root)
}

/// Identify on `root` with the account's credentials.
///
/// # Errors
///
/// [`LogonError::Auth`] when the credentials are rejected,
/// [`LogonError::Connection`] when the exchange itself fails. The root is
/// disconnected in both cases.
pub async fn authenticate(
    account: Arc<Account>,
    root: Arc<dyn RemoteRoot>,
    timeouts: &RpcTimeouts,
) -> Result<Session, LogonError> {
    info!(account = %account.name, identity = %account.identity, "identifying");
    let answer = tokio::time::timeout(
        timeouts.call,
        root.authenticate(&account.identity, account.password()),
    )
    .await
    .map_err(|_| RemoteCallError::timeout("authenticate", timeouts.call))
    .and_then(|r| r);

    match answer {
        Ok(Some(identity)) => {
            info!(account = %account.name, "identified");
            Ok(Session {
                account,
                root,
                identity,
            })
        }
        Ok(None) => {
            warn!(account = %account.name, identity = %account.identity, "falsely identified");
            root.disconnect();
            Err(LogonError::Auth {
                identity: account.identity.clone(),
            })
        }
        Err(e) => {
            warn!(account = %account.name, error = %e, "identification failed");
            root.disconnect();
            Err(connection_error(&account, LogonStage::Identifying, e))
        }
    }
}

/// A logged-on account and its attached services.
#[derive(Debug)]
pub struct Connection {
    session: Session,
    handlers: Vec<ServiceHandler>,
    failures: Vec<AttachFailure>,
}

impl Connection {
    /// The authenticated session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Attached handlers, in configuration order.
    pub fn handlers(&self) -> &[ServiceHandler] {
        &self.handlers
    }

    /// Services that did not attach.
    pub fn failures(&self) -> &[AttachFailure] {
        &self.failures
    }

    /// The words client attached to `service_name`, if any.
    pub fn words(&self, service_name: &str) -> Option<Arc<WordsClient>> {
        self.handlers
            .iter()
            .find(|h| h.service_name() == service_name)
            .map(|h| Arc::clone(h.words()))
    }

    /// Close the connection. Outstanding calls fail as disconnected.
    pub fn disconnect(self) {
        self.session.disconnect();
    }
}

impl Account {
    /// Run the whole logon sequence for this account.
    ///
    /// Connect and identify failures abort the sequence. Attach failures do
    /// not: they are reported in [`Connection::failures`].
    ///
    /// # Errors
    ///
    /// See [`connect`] and [`authenticate`].
    pub async fn log_on(
        self: Arc<Self>,
        transport: &dyn Transport,
        ui: Arc<dyn ChatUi>,
        timeouts: &RpcTimeouts,
    ) -> Result<Connection, LogonError> {
        let root = connect(transport, &self, timeouts).await?;
        let session = authenticate(Arc::clone(&self), root, timeouts).await?;

        info!(account = %self.name, services = self.services.len(), stage = %LogonStage::Attaching, "attaching services");
        let report = attach_all(&session, &self.services, ui, timeouts).await;
        info!(
            account = %self.name,
            attached = report.handlers.len(),
            failed = report.failures.len(),
            "logon complete"
        );

        Ok(Connection {
            session,
            handlers: report.handlers,
            failures: report.failures,
        })
    }
}

/// Log on every account flagged `auto_login`, one after another.
///
/// Returns each account name with its outcome; one failing account does not
/// stop the others.
pub async fn log_on_auto(
    accounts: &[Arc<Account>],
    transport: &dyn Transport,
    ui: Arc<dyn ChatUi>,
    timeouts: &RpcTimeouts,
) -> Vec<(String, Result<Connection, LogonError>)> {
    let mut outcomes = Vec::new();
    for account in accounts.iter().filter(|a| a.auto_login) {
        let outcome = Arc::clone(account)
            .log_on(transport, Arc::clone(&ui), timeouts)
            .await;
        outcomes.push((account.name.clone(), outcome));
    }
    outcomes
}
