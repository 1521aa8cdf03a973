//! pbchat: a chat client adapter for perspective-broker servers.
//!
//! Logs accounts on to a remote object broker, attaches one handler per
//! configured service, and relays contacts, presence, groups and messages
//! between the remote services and a local UI.
//!
//! See `DESIGN.md` for how the pieces fit together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod logging;

pub mod rpc;
pub mod session;
pub mod types;
pub mod ui;
