//! In-process chat service implementing the whole RPC seam.
//!
//! Models a small chat service: registered identities, named services,
//! groups with members, per-perspective contact lists and presence. Message,
//! membership and topic traffic fans out to attached clients through their
//! [`InboundHandler`]. Every perspective call is recorded, and failures can be
//! injected per method so callers can drive their error paths
//! deterministically.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::{InboundHandler, Perspective, RemoteCallError, RemoteIdentity, RemoteRoot, Transport};
use crate::types::{Metadata, Status};

/// (service, name) pair used for perspectives, groups and contact lists.
type Key = (String, String);

/// One call received on a perspective.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Service the calling perspective is attached to.
    pub service: String,
    /// Calling perspective name.
    pub perspective: String,
    /// Remote method name.
    pub method: String,
    /// Positional arguments as received.
    pub args: Vec<Value>,
}

#[derive(Default)]
struct BrokerState {
    users: HashMap<String, String>,
    services: HashSet<String>,
    unreachable: bool,
    reject_metadata: bool,
    failing: HashSet<String>,
    stalled: HashSet<String>,
    calls: Vec<RecordedCall>,
    attached: HashMap<Key, Arc<dyn InboundHandler>>,
    presence: HashMap<Key, Status>,
    groups: HashMap<Key, BTreeSet<String>>,
    contacts: HashMap<Key, BTreeSet<String>>,
}

impl BrokerState {
    fn client(&self, service: &str, name: &str) -> Option<Arc<dyn InboundHandler>> {
        self.attached
            .get(&(service.to_owned(), name.to_owned()))
            .cloned()
    }

    fn status_of(&self, service: &str, name: &str) -> Status {
        self.presence
            .get(&(service.to_owned(), name.to_owned()))
            .copied()
            .unwrap_or_default()
    }

    /// Attached clients on `service` that have `name` on their contact list.
    fn watchers(&self, service: &str, name: &str) -> Vec<Arc<dyn InboundHandler>> {
        self.contacts
            .iter()
            .filter(|((svc, _), list)| svc == service && list.contains(name))
            .filter_map(|((svc, owner), _)| self.client(svc, owner))
            .collect()
    }

    /// Attached members of `group`, optionally excluding one member.
    fn members_of(
        &self,
        service: &str,
        group: &str,
        except: Option<&str>,
    ) -> Vec<Arc<dyn InboundHandler>> {
        self.groups
            .get(&(service.to_owned(), group.to_owned()))
            .map(|members| {
                members
                    .iter()
                    .filter(|m| Some(m.as_str()) != except)
                    .filter_map(|m| self.client(service, m))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// In-process chat service. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryBroker")
            .field("users", &state.users.len())
            .field("services", &state.services)
            .field("attached", &state.attached.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

impl MemoryBroker {
    /// An empty service with no users and no services.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an identity and its password.
    pub fn with_user(self, identity: &str, password: &str) -> Self {
        self.lock()
            .users
            .insert(identity.to_owned(), password.to_owned());
        self
    }

    /// Publish a service that perspectives can attach to.
    pub fn with_service(self, name: &str) -> Self {
        self.lock().services.insert(name.to_owned());
        self
    }

    /// Put `contact` on `owner`'s contact list for `service`.
    pub fn with_contact(self, service: &str, owner: &str, contact: &str) -> Self {
        self.lock()
            .contacts
            .entry((service.to_owned(), owner.to_owned()))
            .or_default()
            .insert(contact.to_owned());
        self
    }

    /// Refuse every connection attempt.
    pub fn unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    /// Behave like an older service: message calls carrying metadata fail.
    pub fn reject_metadata(self) -> Self {
        self.lock().reject_metadata = true;
        self
    }

    /// Make every call of `method` fail. Also applies to `authenticate` and
    /// `attach`.
    pub fn fail_method(self, method: &str) -> Self {
        self.lock().failing.insert(method.to_owned());
        self
    }

    /// Make every call of `method` hang forever. Also applies to `connect`
    /// and `attach`.
    pub fn stall_method(self, method: &str) -> Self {
        self.lock().stalled.insert(method.to_owned());
        self
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Calls of one method, in arrival order.
    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Current members of a group, sorted.
    pub fn group_members(&self, service: &str, group: &str) -> Vec<String> {
        self.lock()
            .groups
            .get(&(service.to_owned(), group.to_owned()))
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a client is attached as `perspective` on `service`.
    pub fn is_attached(&self, service: &str, perspective: &str) -> bool {
        self.lock().client(service, perspective).is_some()
    }

    /// Change the presence of `name` and notify everyone watching it.
    pub fn set_presence(&self, service: &str, name: &str, status: Status) {
        let watchers = {
            let mut state = self.lock();
            state
                .presence
                .insert((service.to_owned(), name.to_owned()), status);
            state.watchers(service, name)
        };
        for watcher in watchers {
            watcher.notify_status_changed(name, status);
        }
    }

    /// Send `perspective` its contact list with current statuses.
    pub fn push_contact_list(&self, service: &str, perspective: &str) {
        let (client, list) = {
            let state = self.lock();
            let list: Vec<(String, Status)> = state
                .contacts
                .get(&(service.to_owned(), perspective.to_owned()))
                .map(|names| {
                    names
                        .iter()
                        .map(|n| (n.clone(), state.status_of(service, n)))
                        .collect()
                })
                .unwrap_or_default();
            (state.client(service, perspective), list)
        };
        if let Some(client) = client {
            client.receive_contact_list(list);
        }
    }

    fn detach(&self, keys: &[Key]) {
        for (service, name) in keys {
            let (watchers, departures) = {
                let mut state = self.lock();
                state.attached.remove(&(service.clone(), name.clone()));
                state
                    .presence
                    .insert((service.clone(), name.clone()), Status::Offline);
                let mut departures = Vec::new();
                let left: Vec<String> = state
                    .groups
                    .iter_mut()
                    .filter(|((svc, _), _)| svc == service)
                    .filter_map(|((_, group), members)| members.remove(name).then(|| group.clone()))
                    .collect();
                for group in left {
                    departures.push((group.clone(), state.members_of(service, &group, None)));
                }
                (state.watchers(service, name), departures)
            };
            for watcher in watchers {
                watcher.notify_status_changed(name, Status::Offline);
            }
            for (group, members) in departures {
                for member in members {
                    member.member_left(name, &group);
                }
            }
            debug!(service = %service, perspective = %name, "perspective detached");
        }
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn RemoteRoot>, RemoteCallError> {
        let (unreachable, stalled) = {
            let state = self.lock();
            (state.unreachable, state.stalled.contains("connect"))
        };
        if stalled {
            return std::future::pending().await;
        }
        if unreachable {
            return Err(RemoteCallError::failed(
                "connect",
                format!("{host}:{port} refused the connection"),
            ));
        }
        debug!(host, port, "memory broker connection opened");
        Ok(Arc::new(MemoryRoot {
            broker: self.clone(),
            link: Arc::new(Link::default()),
        }))
    }
}

/// Liveness flag and attached perspectives of one connection.
#[derive(Default)]
struct Link {
    closed: AtomicBool,
    attached: Mutex<Vec<Key>>,
}

impl Link {
    fn check(&self) -> Result<(), RemoteCallError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RemoteCallError::Disconnected)
        } else {
            Ok(())
        }
    }
}

struct MemoryRoot {
    broker: MemoryBroker,
    link: Arc<Link>,
}

#[async_trait]
impl RemoteRoot for MemoryRoot {
    async fn authenticate(
        &self,
        identity: &str,
        password: &str,
    ) -> Result<Option<Arc<dyn RemoteIdentity>>, RemoteCallError> {
        self.link.check()?;
        let accepted = {
            let state = self.broker.lock();
            if state.failing.contains("authenticate") {
                return Err(RemoteCallError::failed("authenticate", "injected failure"));
            }
            state.users.get(identity).is_some_and(|p| p == password)
        };
        if !accepted {
            return Ok(None);
        }
        Ok(Some(Arc::new(MemoryIdentity {
            broker: self.broker.clone(),
            link: Arc::clone(&self.link),
            name: identity.to_owned(),
            session_id: Uuid::new_v4(),
        })))
    }

    fn disconnect(&self) {
        if self.link.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let keys = self
            .link
            .attached
            .lock()
            .map(|mut keys| std::mem::take(&mut *keys))
            .unwrap_or_default();
        self.broker.detach(&keys);
        debug!("memory broker connection closed");
    }
}

struct MemoryIdentity {
    broker: MemoryBroker,
    link: Arc<Link>,
    name: String,
    session_id: Uuid,
}

#[async_trait]
impl RemoteIdentity for MemoryIdentity {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attach(
        &self,
        service_name: &str,
        perspective_name: &str,
        client: Arc<dyn InboundHandler>,
    ) -> Result<Arc<dyn Perspective>, RemoteCallError> {
        self.link.check()?;
        let key = (service_name.to_owned(), perspective_name.to_owned());
        let stalled = self.broker.lock().stalled.contains("attach");
        if stalled {
            return std::future::pending().await;
        }
        let watchers = {
            let mut state = self.broker.lock();
            if state.failing.contains("attach") {
                return Err(RemoteCallError::failed("attach", "injected failure"));
            }
            if !state.services.contains(service_name) {
                return Err(RemoteCallError::failed(
                    "attach",
                    format!("no such service: {service_name}"),
                ));
            }
            state.attached.insert(key.clone(), client);
            state.presence.insert(key.clone(), Status::Online);
            state.watchers(service_name, perspective_name)
        };
        if let Ok(mut keys) = self.link.attached.lock() {
            keys.push(key);
        }
        for watcher in watchers {
            watcher.notify_status_changed(perspective_name, Status::Online);
        }
        info!(
            session_id = %self.session_id,
            identity = %self.name,
            service = service_name,
            perspective = perspective_name,
            "perspective attached"
        );
        Ok(Arc::new(MemoryPerspective {
            broker: self.broker.clone(),
            link: Arc::clone(&self.link),
            service: service_name.to_owned(),
            name: perspective_name.to_owned(),
        }))
    }
}

struct MemoryPerspective {
    broker: MemoryBroker,
    link: Arc<Link>,
    service: String,
    name: String,
}

fn str_arg<'a>(method: &str, args: &'a [Value], idx: usize) -> Result<&'a str, RemoteCallError> {
    args.get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteCallError::failed(method, format!("argument {idx} must be a string")))
}

fn map_arg(method: &str, args: &[Value], idx: usize) -> Result<Option<Metadata>, RemoteCallError> {
    match args.get(idx) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(RemoteCallError::failed(
            method,
            format!("argument {idx} must be a mapping"),
        )),
    }
}

impl MemoryPerspective {
    fn key(&self) -> Key {
        (self.service.clone(), self.name.clone())
    }

    fn dispatch(&self, method: &str, args: &[Value]) -> Result<Value, RemoteCallError> {
        match method {
            "directMessage" => self.direct_message(method, args),
            "groupMessage" => self.group_message(method, args),
            "joinGroup" => self.join_group(method, args),
            "leaveGroup" => self.leave_group(method, args),
            "getGroupMembers" => self.get_group_members(method, args),
            "setGroupMetadata" => self.set_group_metadata(method, args),
            "addContact" => self.add_contact(method, args),
            other => Err(RemoteCallError::failed(other, "no such method")),
        }
    }

    fn direct_message(&self, method: &str, args: &[Value]) -> Result<Value, RemoteCallError> {
        let to = str_arg(method, args, 0)?;
        let text = str_arg(method, args, 1)?;
        let metadata = map_arg(method, args, 2)?;
        let target = {
            let state = self.broker.lock();
            if metadata.is_some() && state.reject_metadata {
                return Err(RemoteCallError::failed(method, "unexpected metadata argument"));
            }
            state.client(&self.service, to)
        };
        let target =
            target.ok_or_else(|| RemoteCallError::failed(method, format!("{to} is not online")))?;
        target.receive_direct_message(&self.name, text, metadata);
        Ok(Value::from(1_u64))
    }

    fn group_message(&self, method: &str, args: &[Value]) -> Result<Value, RemoteCallError> {
        let group = str_arg(method, args, 0)?;
        let text = str_arg(method, args, 1)?;
        let metadata = map_arg(method, args, 2)?;
        let recipients = {
            let state = self.broker.lock();
            if metadata.is_some() && state.reject_metadata {
                return Err(RemoteCallError::failed(method, "unexpected metadata argument"));
            }
            let member = state
                .groups
                .get(&(self.service.clone(), group.to_owned()))
                .is_some_and(|m| m.contains(&self.name));
            if !member {
                return Err(RemoteCallError::failed(method, format!("not in group {group}")));
            }
            state.members_of(&self.service, group, Some(&self.name))
        };
        for recipient in &recipients {
            recipient.receive_group_message(&self.name, group, text, metadata.clone());
        }
        Ok(Value::from(recipients.len()))
    }

    fn join_group(&self, method: &str, args: &[Value]) -> Result<Value, RemoteCallError> {
        let group = str_arg(method, args, 0)?;
        let others = {
            let mut state = self.broker.lock();
            state
                .groups
                .entry((self.service.clone(), group.to_owned()))
                .or_default()
                .insert(self.name.clone());
            state.members_of(&self.service, group, Some(&self.name))
        };
        for other in others {
            other.member_joined(&self.name, group);
        }
        Ok(Value::Null)
    }

    fn leave_group(&self, method: &str, args: &[Value]) -> Result<Value, RemoteCallError> {
        let group = str_arg(method, args, 0)?;
        let others = {
            let mut state = self.broker.lock();
            let removed = state
                .groups
                .get_mut(&(self.service.clone(), group.to_owned()))
                .is_some_and(|m| m.remove(&self.name));
            if !removed {
                return Err(RemoteCallError::failed(method, format!("not in group {group}")));
            }
            state.members_of(&self.service, group, None)
        };
        for other in others {
            other.member_left(&self.name, group);
        }
        Ok(Value::Null)
    }

    fn get_group_members(&self, method: &str, args: &[Value]) -> Result<Value, RemoteCallError> {
        let group = str_arg(method, args, 0)?;
        let (client, members) = {
            let state = self.broker.lock();
            let members: Vec<String> = state
                .groups
                .get(&(self.service.clone(), group.to_owned()))
                .map(|m| m.iter().cloned().collect())
                .unwrap_or_default();
            (state.client(&self.service, &self.name), members)
        };
        if let Some(client) = client {
            client.receive_group_members(members, group);
        }
        Ok(Value::Null)
    }

    fn set_group_metadata(&self, method: &str, args: &[Value]) -> Result<Value, RemoteCallError> {
        let metadata = map_arg(method, args, 0)?
            .ok_or_else(|| RemoteCallError::failed(method, "missing metadata mapping"))?;
        let group = str_arg(method, args, 1)?;
        let members = self.broker.lock().members_of(&self.service, group, None);
        for member in members {
            member.set_group_metadata(metadata.clone(), group);
        }
        Ok(Value::Null)
    }

    fn add_contact(&self, method: &str, args: &[Value]) -> Result<Value, RemoteCallError> {
        let name = str_arg(method, args, 0)?;
        let (client, status) = {
            let mut state = self.broker.lock();
            state
                .contacts
                .entry(self.key())
                .or_default()
                .insert(name.to_owned());
            (
                state.client(&self.service, &self.name),
                state.status_of(&self.service, name),
            )
        };
        if let Some(client) = client {
            client.notify_status_changed(name, status);
        }
        Ok(Value::Null)
    }
}

#[async_trait]
impl Perspective for MemoryPerspective {
    async fn call_remote(&self, method: &str, args: Vec<Value>) -> Result<Value, RemoteCallError> {
        self.link.check()?;
        let (stalled, failing) = {
            let mut state = self.broker.lock();
            state.calls.push(RecordedCall {
                service: self.service.clone(),
                perspective: self.name.clone(),
                method: method.to_owned(),
                args: args.clone(),
            });
            (
                state.stalled.contains(method),
                state.failing.contains(method),
            )
        };
        if stalled {
            return std::future::pending().await;
        }
        if failing {
            return Err(RemoteCallError::failed(method, "injected failure"));
        }
        self.dispatch(method, &args)
    }
}
