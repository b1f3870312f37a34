use std::sync::atomic::{AtomicU64, Ordering};

use crate::{groups::GroupStore, registry::Registry, sink::SessionId};

/// Buffer size used when streaming file payloads between connections.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub chunk_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// State shared by every session of one server.
///
/// Handed to sessions behind an `Arc`; tests build their own instance.
pub struct Hub {
    pub registry: Registry,
    pub groups: GroupStore,
    config: RelayConfig,
    next_session: AtomicU64,
}

impl Hub {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Registry::new(),
            groups: GroupStore::new(),
            config,
            next_session: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn next_session_id(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}
