use super::registry::IdentityRegistry;
use crate::protocol::{ClientHandle, ClientIdentity};
use futures::lock::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// One open client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub peer: SocketAddr,
    pub handle: ClientHandle,
    pub identity: ClientIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted {
        session: ActiveSession,
        reconnected: bool,
    },
    Refused {
        active: usize,
        max_clients: usize,
    },
}

struct Shared {
    registry: IdentityRegistry,
    sessions: HashMap<SocketAddr, ActiveSession>,
    watchdog: Option<SocketAddr>,
    counter: u64,
    max_clients: usize,
}

/// Everything the connection tasks share, behind a single lock.
#[derive(Clone)]
pub struct ServerState(Arc<Mutex<Shared>>);

impl ServerState {
    pub fn new(max_clients: usize) -> Self {
        ServerState(Arc::new(Mutex::new(Shared {
            registry: IdentityRegistry::new(),
            sessions: HashMap::new(),
            watchdog: None,
            counter: 0,
            max_clients,
        })))
    }

    /// Capacity check, identity resolution and session registration happen
    /// under one lock acquisition.
    pub async fn admit(&self, identity: ClientIdentity, peer: SocketAddr) -> Admission {
        let mut shared = self.0.lock().await;

        if shared.sessions.len() >= shared.max_clients {
            return Admission::Refused {
                active: shared.sessions.len(),
                max_clients: shared.max_clients,
            };
        }

        let resolution = shared.registry.resolve(&identity);
        let session = ActiveSession {
            peer,
            handle: resolution.handle,
            identity,
        };
        shared.sessions.insert(peer, session.clone());

        Admission::Accepted {
            session,
            reconnected: resolution.reconnected,
        }
    }

    pub async fn end_session(&self, peer: SocketAddr) -> Option<ActiveSession> {
        self.0.lock().await.sessions.remove(&peer)
    }

    /// Increments the shared counter and returns the new value.
    pub async fn record_request(&self) -> u64 {
        let mut shared = self.0.lock().await;
        shared.counter += 1;
        shared.counter
    }

    pub async fn claim_watchdog(&self, peer: SocketAddr) -> bool {
        let mut shared = self.0.lock().await;
        if shared.watchdog.is_some() {
            return false;
        }
        shared.watchdog = Some(peer);
        true
    }

    /// Frees the slot if `peer` is the one holding it.
    pub async fn release_watchdog(&self, peer: SocketAddr) -> bool {
        let mut shared = self.0.lock().await;
        if shared.watchdog == Some(peer) {
            shared.watchdog = None;
            return true;
        }
        false
    }

    pub async fn counter(&self) -> u64 {
        self.0.lock().await.counter
    }

    pub async fn active_sessions(&self) -> usize {
        self.0.lock().await.sessions.len()
    }

    pub async fn registered_clients(&self) -> usize {
        self.0.lock().await.registry.len()
    }

    pub async fn handle_of(&self, identity: &ClientIdentity) -> Option<ClientHandle> {
        self.0.lock().await.registry.get(identity)
    }

    pub async fn watchdog(&self) -> Option<SocketAddr> {
        self.0.lock().await.watchdog
    }
}
