//! # Message Bus
//!
//! The delivery seam between the insert layer and the query scheduler.
//! The insert layer only ever *sends* — block-filled notifications are
//! fire-and-forget — but tests and in-process schedulers also receive
//! through the same trait.
//!
//! `MemoryBus` is the in-process implementation: a registry of
//! per-client queues. Registration is cheap; senders never block on
//! receivers. A send to an unregistered client fails, which the
//! destination layer treats as a broken pipeline (fatal to the query).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{eyre, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

mod client_map;
mod message;

pub use client_map::WorkerClientMap;
pub use message::{
    DataPipelineMessage, TaggedMessage, DATA_PIPELINE_MESSAGE_SIZE, KIND_DATA_PIPELINE,
};

/// Identifies one registered bus endpoint.
pub type ClientId = u32;

pub trait MessageBus: Send + Sync {
    fn register_client(&self) -> ClientId;

    fn send(&self, sender: ClientId, receiver: ClientId, message: TaggedMessage) -> Result<()>;

    /// Pops the oldest undelivered message for `receiver`, if any.
    fn try_receive(&self, receiver: ClientId) -> Option<TaggedMessage>;
}

pub struct MemoryBus {
    clients: RwLock<HashMap<ClientId, Arc<Mutex<VecDeque<TaggedMessage>>>>>,
    next_client: AtomicU32,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_client: AtomicU32::new(0),
        }
    }
}

impl MessageBus for MemoryBus {
    fn register_client(&self) -> ClientId {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        self.clients
            .write()
            .insert(id, Arc::new(Mutex::new(VecDeque::new())));
        id
    }

    fn send(&self, _sender: ClientId, receiver: ClientId, message: TaggedMessage) -> Result<()> {
        let queue = {
            let clients = self.clients.read();
            clients
                .get(&receiver)
                .cloned()
                .ok_or_else(|| eyre!("bus client {} is not registered", receiver))?
        };
        queue.lock().push_back(message);
        Ok(())
    }

    fn try_receive(&self, receiver: ClientId) -> Option<TaggedMessage> {
        let queue = self.clients.read().get(&receiver).cloned()?;
        let message = queue.lock().pop_front();
        message
    }
}
