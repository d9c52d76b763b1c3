use crate::protocol::{ClientHandle, ClientIdentity};
use std::collections::HashMap;

/// Outcome of resolving an identity against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub handle: ClientHandle,
    pub reconnected: bool,
}

/// Maps every identity seen during this server run to its handle.
///
/// Entries are never removed and handles are never reassigned, so an identity
/// that reconnects always gets its old handle back.
#[derive(Debug)]
pub struct IdentityRegistry {
    handles: HashMap<ClientIdentity, ClientHandle>,
    next_handle: u64,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn resolve(&mut self, identity: &ClientIdentity) -> Resolution {
        if let Some(handle) = self.handles.get(identity) {
            return Resolution {
                handle: *handle,
                reconnected: true,
            };
        }

        let handle = ClientHandle::new(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(identity.clone(), handle);

        Resolution {
            handle,
            reconnected: false,
        }
    }

    pub fn get(&self, identity: &ClientIdentity) -> Option<ClientHandle> {
        self.handles.get(identity).copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
