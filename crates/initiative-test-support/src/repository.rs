//! Test repositories: mock `EncounterRepository` implementations for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use initiative_core::error::EncounterError;
use initiative_core::repository::{EncounterRepository, StoredEvent};
use uuid::Uuid;

/// A repository that records every successful `save` and `delete` call.
/// It succeeds unless told to fail a particular save with
/// `failing_on_save`.
#[derive(Debug)]
pub struct RecordingEncounterRepository<R> {
    saved: Mutex<Vec<(R, Vec<StoredEvent>)>>,
    deleted: Mutex<Vec<Uuid>>,
    save_attempts: AtomicUsize,
    fail_on_save: Option<usize>,
}

impl<R> Default for RecordingEncounterRepository<R> {
    fn default() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            save_attempts: AtomicUsize::new(0),
            fail_on_save: None,
        }
    }
}

impl<R: Clone> RecordingEncounterRepository<R> {
    /// Create an empty recording repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `attempt`-th call to `save` (counting from 1) fail with
    /// `EncounterError::Persistence`. Failed saves are not recorded.
    #[must_use]
    pub fn failing_on_save(mut self, attempt: usize) -> Self {
        self.fail_on_save = Some(attempt);
        self
    }

    /// Returns a snapshot of every saved record with its events.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved(&self) -> Vec<(R, Vec<StoredEvent>)> {
        self.saved.lock().unwrap().clone()
    }

    /// Returns the most recently saved record, if any.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn last_record(&self) -> Option<R> {
        self.saved.lock().unwrap().last().map(|(r, _)| r.clone())
    }

    /// Returns the ids passed to `delete`, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn deleted(&self) -> Vec<Uuid> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl<R> EncounterRepository<R> for RecordingEncounterRepository<R>
where
    R: Clone + Send + Sync,
{
    async fn save(&self, record: &R, events: &[StoredEvent]) -> Result<(), EncounterError> {
        let attempt = self.save_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_save == Some(attempt) {
            return Err(EncounterError::Persistence("down".into()));
        }
        self.saved
            .lock()
            .unwrap()
            .push((record.clone(), events.to_vec()));
        Ok(())
    }

    async fn delete(&self, encounter_id: Uuid) -> Result<(), EncounterError> {
        self.deleted.lock().unwrap().push(encounter_id);
        Ok(())
    }
}

/// A repository that always returns a persistence error. Useful for testing
/// error-handling paths.
#[derive(Debug)]
pub struct FailingEncounterRepository;

#[async_trait]
impl<R> EncounterRepository<R> for FailingEncounterRepository
where
    R: Send + Sync + 'static,
{
    async fn save(&self, _record: &R, _events: &[StoredEvent]) -> Result<(), EncounterError> {
        Err(EncounterError::Persistence("connection refused".into()))
    }

    async fn delete(&self, _encounter_id: Uuid) -> Result<(), EncounterError> {
        Err(EncounterError::Persistence("connection refused".into()))
    }
}
