//! Outbound direct and group messages with a plain-text fallback.
//!
//! Older services do not understand message calls that carry metadata. When
//! such a call fails, the text is resent without metadata, prefixed with
//! [`FALLBACK_MARKER`] so the reader can tell the message was downgraded.
//! The fallback's outcome is final.

use serde_json::Value;
use tracing::warn;

use crate::rpc::{RemoteCallError, RemoteCaller};
use crate::types::Metadata;

/// Prefix marking a message that lost its metadata on the way out.
pub const FALLBACK_MARKER: &str = "* ";

const DIRECT_MESSAGE: &str = "directMessage";
const GROUP_MESSAGE: &str = "groupMessage";

/// A metadata-carrying send failed. Only ever logged before the fallback.
#[derive(Debug, thiserror::Error)]
#[error("metadata delivery to {target} failed: {source}")]
pub(crate) struct MetadataDeliveryError {
    target: String,
    #[source]
    source: RemoteCallError,
}

/// Sends messages on one perspective.
#[derive(Debug, Clone, Copy)]
pub struct MessageRelay<'a> {
    caller: &'a RemoteCaller,
}

impl<'a> MessageRelay<'a> {
    /// Relay over `caller`.
    pub fn new(caller: &'a RemoteCaller) -> Self {
        Self { caller }
    }

    /// Send `text` to a contact.
    ///
    /// # Errors
    ///
    /// Returns the error of the last tier tried: the plain call when there is
    /// no metadata, otherwise the fallback call.
    pub async fn send_direct(
        &self,
        contact: &str,
        text: &str,
        metadata: Option<&Metadata>,
    ) -> Result<Value, RemoteCallError> {
        self.send(DIRECT_MESSAGE, contact, text, metadata).await
    }

    /// Send `text` to a group. Same contract as [`send_direct`](Self::send_direct).
    ///
    /// # Errors
    ///
    /// Returns the error of the last tier tried.
    pub async fn send_group(
        &self,
        group: &str,
        text: &str,
        metadata: Option<&Metadata>,
    ) -> Result<Value, RemoteCallError> {
        self.send(GROUP_MESSAGE, group, text, metadata).await
    }

    async fn send(
        &self,
        method: &str,
        target: &str,
        text: &str,
        metadata: Option<&Metadata>,
    ) -> Result<Value, RemoteCallError> {
        // An empty mapping counts as no metadata.
        let Some(metadata) = metadata.filter(|m| !m.is_empty()) else {
            return self
                .caller
                .call(method, vec![Value::from(target), Value::from(text)])
                .await;
        };

        let rich = self
            .caller
            .call(
                method,
                vec![
                    Value::from(target),
                    Value::from(text),
                    Value::Object(metadata.clone()),
                ],
            )
            .await;

        match rich {
            Ok(answer) => Ok(answer),
            Err(source) => {
                let failure = MetadataDeliveryError {
                    target: target.to_owned(),
                    source,
                };
                warn!(method, error = %failure, "resending as plain text");
                let downgraded = format!("{FALLBACK_MARKER}{text}");
                self.caller
                    .call(method, vec![Value::from(target), Value::from(downgraded)])
                    .await
            }
        }
    }
}
