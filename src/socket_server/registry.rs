//! Session registry
//!
//! Process-wide indexes over logged-in sessions:
//!
//! - client id -> session
//! - user id -> client ids
//! - channel name -> client ids
//!
//! All three live behind one `RwLock`, so login, channel changes and removal
//! are atomic with respect to lookups. Lock order is registry, then session.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CommandError;
use crate::socket_server::protocol::{ClientId, UserId};
use crate::socket_server::session::Session;

#[derive(Default)]
struct Indexes {
    clients: HashMap<ClientId, Arc<Session>>,
    users: HashMap<UserId, HashSet<ClientId>>,
    channels: HashMap<String, HashSet<ClientId>>,
}

impl Indexes {
    fn resolve<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a ClientId>,
        seen: &mut HashSet<ClientId>,
        out: &mut Vec<Arc<Session>>,
    ) {
        for id in ids {
            if let Some(session) = self.clients.get(id) {
                if seen.insert(*id) {
                    out.push(Arc::clone(session));
                }
            }
        }
    }
}

/// Global registry of logged-in sessions
pub struct SessionRegistry {
    indexes: RwLock<Indexes>,
    next_id: AtomicI64,
}

impl SessionRegistry {
    /// Create a registry issuing client ids from 1
    pub fn new() -> Self {
        Self::with_first_id(1)
    }

    /// Create a registry whose first issued client id is `first_id`
    pub fn with_first_id(first_id: ClientId) -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
            next_id: AtomicI64::new(first_id),
        }
    }

    fn generate_id(&self) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if id == 0 {
            return self.next_id.fetch_add(1, Ordering::SeqCst);
        }
        id
    }

    /// Log a session in: issue its client id and index it by client and user.
    pub fn register_client(
        &self,
        session: &Arc<Session>,
        user_id: UserId,
    ) -> Result<ClientId, CommandError> {
        let mut idx = self.indexes.write();
        let client_id = self.generate_id();
        session.activate(client_id, user_id)?;

        idx.clients.insert(client_id, Arc::clone(session));
        idx.users.entry(user_id).or_default().insert(client_id);

        tracing::info!(
            "Session {} logged in as client {} (user {})",
            session.conn_id(),
            client_id,
            user_id
        );
        Ok(client_id)
    }

    pub fn lookup_by_client_ids(&self, ids: &[ClientId]) -> Vec<Arc<Session>> {
        let idx = self.indexes.read();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        idx.resolve(ids, &mut seen, &mut out);
        out
    }

    /// Every session owned by each user, deduplicated
    pub fn lookup_by_user_ids(&self, uids: &[UserId]) -> Vec<Arc<Session>> {
        let idx = self.indexes.read();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for uid in uids {
            if let Some(ids) = idx.users.get(uid) {
                idx.resolve(ids, &mut seen, &mut out);
            }
        }
        out
    }

    /// Every member of each channel, deduplicated
    pub fn lookup_by_channels<S: AsRef<str>>(&self, names: &[S]) -> Vec<Arc<Session>> {
        let idx = self.indexes.read();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in names {
            if let Some(ids) = idx.channels.get(name.as_ref()) {
                idx.resolve(ids, &mut seen, &mut out);
            }
        }
        out
    }

    pub fn channel_members(&self, name: &str) -> Vec<Arc<Session>> {
        self.lookup_by_channels(&[name])
    }

    /// Add a logged-in session to a channel.
    ///
    /// Returns true if it was not already a member. Empty names and sessions
    /// that are not logged in are ignored.
    pub fn join_channel(&self, session: &Arc<Session>, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        let mut idx = self.indexes.write();
        let Some(client_id) = session.client_id() else {
            return false;
        };
        if !idx.clients.contains_key(&client_id) || !session.insert_channel(name) {
            return false;
        }
        idx.channels.entry(name.to_string()).or_default().insert(client_id);
        tracing::debug!("Client {} entered channel {:?}", client_id, name);
        true
    }

    /// Remove a session from a channel. Returns true if it was a member.
    pub fn leave_channel(&self, session: &Arc<Session>, name: &str) -> bool {
        let mut idx = self.indexes.write();
        let Some(client_id) = session.client_id() else {
            return false;
        };
        if !session.remove_channel(name) {
            return false;
        }
        if let Some(members) = idx.channels.get_mut(name) {
            members.remove(&client_id);
            if members.is_empty() {
                idx.channels.remove(name);
            }
        }
        tracing::debug!("Client {} left channel {:?}", client_id, name);
        true
    }

    /// Purge a session from every index
    pub fn remove(&self, session: &Session) {
        let mut idx = self.indexes.write();
        let Some(client_id) = session.client_id() else {
            return;
        };

        let owned = idx
            .clients
            .get(&client_id)
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), session));
        if !owned {
            return;
        }
        idx.clients.remove(&client_id);

        if let Some(uid) = session.user_id() {
            if let Some(ids) = idx.users.get_mut(&uid) {
                ids.remove(&client_id);
                if ids.is_empty() {
                    idx.users.remove(&uid);
                }
            }
        }

        for name in session.take_channels() {
            if let Some(members) = idx.channels.get_mut(&name) {
                members.remove(&client_id);
                if members.is_empty() {
                    idx.channels.remove(&name);
                }
            }
        }

        tracing::debug!("Removed client {} from registry", client_id);
    }

    /// Names of channels that currently have members
    pub fn active_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get stats about the registry
    pub fn stats(&self) -> RegistryStats {
        let idx = self.indexes.read();
        RegistryStats {
            session_count: idx.clients.len(),
            user_count: idx.users.len(),
            channel_count: idx.channels.len(),
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub session_count: usize,
    pub user_count: usize,
    pub channel_count: usize,
}
