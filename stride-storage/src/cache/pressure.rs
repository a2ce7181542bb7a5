//! Process-wide low-memory signal.
//!
//! The host environment may terminate the process if memory is not released
//! promptly, so delivery is synchronous: `notify()` returns only after every
//! live listener has handled the event on the calling thread.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::info;

/// Something that releases memory when the process is under pressure.
pub trait MemoryPressureListener: Send + Sync {
    fn on_memory_pressure(&self);
}

/// Cloneable handle to the low-memory signal.
///
/// Listeners are held weakly; dropping a cache unsubscribes it.
#[derive(Clone, Default)]
pub struct MemoryPressure {
    listeners: Arc<Mutex<Vec<Weak<dyn MemoryPressureListener>>>>,
}

impl MemoryPressure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for future events.
    pub fn subscribe<L>(&self, listener: &Arc<L>)
    where
        L: MemoryPressureListener + 'static,
    {
        let listener: Arc<dyn MemoryPressureListener> = listener.clone();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&listener));
    }

    /// Fire one low-memory event, returning how many listeners handled it.
    pub fn notify(&self) -> usize {
        let live: Vec<Arc<dyn MemoryPressureListener>> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in &live {
            listener.on_memory_pressure();
        }

        info!(listeners = live.len(), "Memory pressure signal delivered");
        live.len()
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
