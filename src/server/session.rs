//! Client session table.
//!
//! Maps each claimed client id to its [`ClientSession`]. An id is exclusive
//! from a successful hello until goodbye, a kick, or server shutdown.

use std::collections::HashMap;

use super::extension::SessionExtensions;
use crate::protocol::{BROADCAST_CLIENT_ID, MAX_CLIENT_ID};

/// Default upper bound on concurrent sessions: every claimable id.
pub const DEFAULT_MAX_SESSIONS: usize = MAX_CLIENT_ID as usize;

/// State held for one connected client.
pub struct ClientSession<S> {
    client_id: u8,
    /// Namespace persisting across this client's requests.
    pub scope: S,
    /// Extension tags bound by this client.
    pub extensions: SessionExtensions<S>,
}

impl<S: Default> ClientSession<S> {
    fn new(client_id: u8) -> Self {
        Self {
            client_id,
            scope: S::default(),
            extensions: SessionExtensions::new(),
        }
    }
}

impl<S> ClientSession<S> {
    /// Client id owning this session.
    pub fn client_id(&self) -> u8 {
        self.client_id
    }
}

/// Why a hello was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRefusal {
    /// The id is reserved or out of range.
    InvalidId,
    /// Another client holds the id.
    InUse,
    /// The session limit is reached.
    Full,
}

/// Live sessions by client id.
pub struct SessionTable<S> {
    sessions: HashMap<u8, ClientSession<S>>,
    max_sessions: usize,
}

impl<S: Default> SessionTable<S> {
    /// Create a table holding at most `max_sessions` sessions (capped at 127).
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions: max_sessions.min(DEFAULT_MAX_SESSIONS),
        }
    }

    /// Create a session for `client_id` if the id is free.
    pub fn claim(&mut self, client_id: u8) -> Result<&mut ClientSession<S>, ClaimRefusal> {
        if client_id == BROADCAST_CLIENT_ID || client_id > MAX_CLIENT_ID {
            return Err(ClaimRefusal::InvalidId);
        }
        if self.sessions.contains_key(&client_id) {
            return Err(ClaimRefusal::InUse);
        }
        if self.sessions.len() >= self.max_sessions {
            return Err(ClaimRefusal::Full);
        }
        Ok(self
            .sessions
            .entry(client_id)
            .or_insert_with(|| ClientSession::new(client_id)))
    }
}

impl<S> SessionTable<S> {
    /// Remove the session for `client_id`.
    pub fn release(&mut self, client_id: u8) -> Option<ClientSession<S>> {
        self.sessions.remove(&client_id)
    }

    /// Session for `client_id`.
    pub fn get_mut(&mut self, client_id: u8) -> Option<&mut ClientSession<S>> {
        self.sessions.get_mut(&client_id)
    }

    /// Check if `client_id` has a live session.
    pub fn contains(&self, client_id: u8) -> bool {
        self.sessions.contains_key(&client_id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Configured session limit.
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Client ids of live sessions, sorted.
    pub fn ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop every session.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
