//! In-memory holder for the serialized index document.

use std::sync::{Mutex, PoisonError};

use bytes::Bytes;

/// Holds the current `index.yaml` bytes.
///
/// `install` swaps in a fully built buffer and `read` hands out a cheap
/// reference-counted view, both under the same lock, so readers only ever
/// see one complete document or the next.
#[derive(Debug, Default)]
pub struct IndexStore {
    index: Mutex<Bytes>,
}

impl IndexStore {
    /// Create a store holding `index`.
    pub fn new(index: impl Into<Bytes>) -> Self {
        Self {
            index: Mutex::new(index.into()),
        }
    }

    /// Replace the held index.
    pub fn install(&self, index: impl Into<Bytes>) {
        let index = index.into();
        *self.index.lock().unwrap_or_else(PoisonError::into_inner) = index;
    }

    /// Get the current index.
    pub fn read(&self) -> Bytes {
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
