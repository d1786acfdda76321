//! Per-session state: the single generated-code slot and the trigger latch.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use crate::generation::GeneratedCode;

/// Holds at most one `GeneratedCode`; every write replaces the previous value.
#[derive(Debug, Default)]
pub struct CodeStore {
    slot: Option<GeneratedCode>,
}

impl CodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&GeneratedCode> {
        self.slot.as_ref()
    }

    /// Store `code`, returning whatever it displaced.
    pub fn replace(&mut self, code: GeneratedCode) -> Option<GeneratedCode> {
        tracing::debug!(fingerprint = %code.fingerprint(), "storing generated code");
        self.slot.replace(code)
    }

    pub fn clear(&mut self) -> Option<GeneratedCode> {
        self.slot.take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}

/// One interactive session. Dropping it discards the stored code.
///
/// Shared by reference between the prompt loop and in-flight work; the store
/// lock is never held across an await.
#[derive(Debug, Default)]
pub struct Session {
    store: Mutex<CodeStore>,
    busy: Arc<AtomicBool>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CodeStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A copy of the stored code, if any.
    pub fn current(&self) -> Option<GeneratedCode> {
        self.lock().current().cloned()
    }

    pub fn store(&self, code: GeneratedCode) -> Option<GeneratedCode> {
        self.lock().replace(code)
    }

    pub fn clear(&self) -> Option<GeneratedCode> {
        self.lock().clear()
    }

    /// Claim the trigger. Returns `None` while another request holds it.
    pub fn try_begin(&self) -> Option<TriggerGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TriggerGuard { busy: Arc::clone(&self.busy) })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the session trigger on drop.
#[derive(Debug)]
pub struct TriggerGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for TriggerGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_is_last_write_wins() {
        let mut store = CodeStore::new();
        assert!(store.is_empty());

        assert!(store.replace(GeneratedCode::new("a = 1\n", "first")).is_none());
        let old = store.replace(GeneratedCode::new("b = 2\n", "second")).unwrap();

        assert_eq!(old.prompt, "first");
        assert_eq!(store.current().unwrap().source, "b = 2\n");
        assert!(store.clear().is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn session_hands_out_copies() {
        let session = Session::new();
        assert!(session.current().is_none());
        session.store(GeneratedCode::new("x = 1\n", "p"));

        let mut copy = session.current().unwrap();
        copy.source.push_str("y = 2\n");
        assert_eq!(session.current().unwrap().source, "x = 1\n");
    }

    #[test]
    fn trigger_is_exclusive_until_guard_drops() {
        let session = Session::new();
        let guard = session.try_begin().expect("first trigger");
        assert!(session.is_busy());
        assert!(session.try_begin().is_none());

        drop(guard);
        assert!(!session.is_busy());
        assert!(session.try_begin().is_some());
    }
}
