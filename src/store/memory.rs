//! In-memory [`FingerprintStore`] for tests and dry runs.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::models::Snapshot;

use super::FingerprintStore;

#[derive(Default)]
pub struct MemoryFingerprintStore {
    snapshot: Mutex<Snapshot>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Current contents.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().unwrap().clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every subsequent `save` fail (simulates a full disk).
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FingerprintStore for MemoryFingerprintStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self) -> Result<Snapshot> {
        Ok(self.snapshot())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("simulated save failure");
        }
        *self.snapshot.lock().unwrap() = snapshot.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
