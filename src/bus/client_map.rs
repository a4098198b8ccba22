//! Worker-thread to bus-client resolution.
//!
//! Sending on the bus needs a sender client id, but ingest entry points
//! are called deep inside worker threads that never see their own bus
//! registration. The `WorkerClientMap` closes that gap: each worker
//! binds its OS thread id to its client id once at startup, and the
//! notifier resolves the binding once per filled block. The map is an
//! injected capability, not hidden global state; whoever owns the
//! worker pool owns the map.

use std::thread::{self, ThreadId};

use eyre::{eyre, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::bus::ClientId;

#[derive(Default)]
pub struct WorkerClientMap {
    map: RwLock<HashMap<ThreadId, ClientId>>,
}

impl WorkerClientMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the calling thread to `client`. Rebinding overwrites.
    pub fn bind_current(&self, client: ClientId) {
        self.map.write().insert(thread::current().id(), client);
    }

    /// Removes the calling thread's binding, if any.
    pub fn unbind_current(&self) {
        self.map.write().remove(&thread::current().id());
    }

    /// The calling thread's client id.
    pub fn current(&self) -> Result<ClientId> {
        self.map
            .read()
            .get(&thread::current().id())
            .copied()
            .ok_or_else(|| eyre!("calling thread is not bound to a bus client"))
    }
}
