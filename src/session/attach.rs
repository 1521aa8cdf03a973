//! Attach one handler per configured service.

use std::sync::Arc;

use tracing::{info, warn};

use super::logon::Session;
use super::words::WordsClient;
use super::{AttachError, ServiceDescriptor, ServiceType};
use crate::rpc::{InboundHandler, RemoteCallError, RpcTimeouts};
use crate::ui::ChatUi;

/// A handler attached to one remote service, tagged by service type.
#[derive(Debug, Clone)]
pub enum ServiceHandler {
    /// Text chat handler.
    Words(Arc<WordsClient>),
}

impl ServiceHandler {
    /// Construct the handler registered for `descriptor.service_type`.
    ///
    /// # Errors
    ///
    /// [`AttachError::UnsupportedService`] when the type has no implementation.
    pub fn construct(
        descriptor: &ServiceDescriptor,
        display_name: String,
        ui: Arc<dyn ChatUi>,
        timeouts: &RpcTimeouts,
    ) -> Result<Self, AttachError> {
        match descriptor.service_type {
            ServiceType::Words => Ok(Self::Words(Arc::new(WordsClient::new(
                display_name,
                descriptor.service_name.clone(),
                descriptor.perspective_name.clone(),
                ui,
                timeouts.call,
            )))),
            other @ ServiceType::Reality => Err(AttachError::UnsupportedService(other)),
        }
    }

    /// The callback target handed to the remote side.
    pub fn inbound(&self) -> Arc<dyn InboundHandler> {
        match self {
            Self::Words(client) => Arc::clone(client) as Arc<dyn InboundHandler>,
        }
    }

    /// Display name, e.g. `work (words:alice)`.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Words(client) => client.display_name(),
        }
    }

    /// Remote service name.
    pub fn service_name(&self) -> &str {
        match self {
            Self::Words(client) => client.service_name(),
        }
    }

    /// The words client behind this handler.
    pub fn words(&self) -> &Arc<WordsClient> {
        match self {
            Self::Words(client) => client,
        }
    }

    fn connected(&self, perspective: Arc<dyn crate::rpc::Perspective>) {
        match self {
            Self::Words(client) => client.connected(perspective),
        }
    }
}

/// A service that did not attach, and why.
#[derive(Debug)]
pub struct AttachFailure {
    /// The descriptor that failed.
    pub descriptor: ServiceDescriptor,
    /// What went wrong.
    pub error: AttachError,
}

/// Outcome of attaching a batch of services.
#[derive(Debug, Default)]
pub struct AttachReport {
    /// Attached and connected handlers, in descriptor order.
    pub handlers: Vec<ServiceHandler>,
    /// Services that failed, in descriptor order.
    pub failures: Vec<AttachFailure>,
}

/// Attach a handler for every descriptor.
///
/// Failures are isolated: each is logged and recorded, and the remaining
/// descriptors are still attached.
pub async fn attach_all(
    session: &Session,
    descriptors: &[ServiceDescriptor],
    ui: Arc<dyn ChatUi>,
    timeouts: &RpcTimeouts,
) -> AttachReport {
    let mut report = AttachReport::default();
    for descriptor in descriptors {
        match attach_one(session, descriptor, Arc::clone(&ui), timeouts).await {
            Ok(handler) => report.handlers.push(handler),
            Err(error) => {
                warn!(
                    account = %session.account().name,
                    service = %descriptor.service_name,
                    perspective = %descriptor.perspective_name,
                    error = %error,
                    "service not attached"
                );
                report.failures.push(AttachFailure {
                    descriptor: descriptor.clone(),
                    error,
                });
            }
        }
    }
    report
}

async fn attach_one(
    session: &Session,
    descriptor: &ServiceDescriptor,
    ui: Arc<dyn ChatUi>,
    timeouts: &RpcTimeouts,
) -> Result<ServiceHandler, AttachError> {
    let display_name = session.account().handler_name(descriptor);
    let handler = ServiceHandler::construct(descriptor, display_name, ui, timeouts)?;

    let remote_error = |source: RemoteCallError| AttachError::Remote {
        service: descriptor.service_name.clone(),
        perspective: descriptor.perspective_name.clone(),
        source,
    };

    let attach = session.identity().attach(
        &descriptor.service_name,
        &descriptor.perspective_name,
        handler.inbound(),
    );
    let perspective = tokio::time::timeout(timeouts.call, attach)
        .await
        .map_err(|_| remote_error(RemoteCallError::timeout("attach", timeouts.call)))?
        .map_err(remote_error)?;

    handler.connected(perspective);
    info!(account = %handler.display_name(), "service attached");
    Ok(handler)
}
