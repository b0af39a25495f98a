//! In-memory transport store with one lock per transport.

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

use crate::domain::{ModelError, RecalcState, Transport};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown transport {0:?}")]
    UnknownTransport(String),
    #[error("transport {0:?} already exists")]
    Duplicate(String),
    #[error("transport {reference:?} has no phase with ordre {ordre}")]
    PhaseNotFound { reference: String, ordre: i32 },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// A transport together with its recompute bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransportEntry {
    pub transport: Transport,
    pub state: RecalcState,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TransportEntry {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            state: RecalcState::Stale,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Records an input change.
    pub fn touch(&mut self) {
        self.state.invalidate();
        self.updated_at = OffsetDateTime::now_utc();
    }
}

pub type EntryHandle = Arc<Mutex<TransportEntry>>;

/// Transports by `ref`. The map lock is held only to find a handle; all
/// reads and writes of one transport go through that transport's mutex.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    entries: Arc<RwLock<HashMap<String, EntryHandle>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, transport: Transport) -> Result<EntryHandle, RegistryError> {
        let reference = transport.reference().to_string();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&reference) {
            return Err(RegistryError::Duplicate(reference));
        }
        let handle = Arc::new(Mutex::new(TransportEntry::new(transport)));
        entries.insert(reference, Arc::clone(&handle));
        Ok(handle)
    }

    pub async fn handle(&self, reference: &str) -> Result<EntryHandle, RegistryError> {
        self.entries
            .read()
            .await
            .get(reference.trim())
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTransport(reference.to_string()))
    }

    /// All refs, sorted.
    pub async fn refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.entries.read().await.keys().cloned().collect();
        refs.sort();
        refs
    }

    pub async fn remove(&self, reference: &str) -> Result<Transport, RegistryError> {
        let handle = self
            .entries
            .write()
            .await
            .remove(reference.trim())
            .ok_or_else(|| RegistryError::UnknownTransport(reference.to_string()))?;
        let entry = handle.lock().await;
        Ok(entry.transport.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
