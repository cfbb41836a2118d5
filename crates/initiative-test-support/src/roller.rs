//! Test rollers: deterministic `InitiativeRoller` implementations for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use initiative_core::error::RollError;
use initiative_core::roller::{InitiativeRoller, RollContext};
use tokio::sync::{Notify, Semaphore};

/// A roller that returns values from a predetermined sequence, one per call.
/// Once the sequence is exhausted every call fails with `RollError::Roller`.
#[derive(Debug)]
pub struct SequenceRoller {
    values: Mutex<std::vec::IntoIter<f64>>,
}

impl SequenceRoller {
    /// Create a new `SequenceRoller` with the given values.
    #[must_use]
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect::<Vec<_>>().into_iter()),
        }
    }
}

#[async_trait]
impl InitiativeRoller for SequenceRoller {
    async fn roll(&self, _formula: &str, _context: &RollContext) -> Result<f64, RollError> {
        self.values
            .lock()
            .unwrap()
            .next()
            .ok_or_else(|| RollError::Roller("roll sequence exhausted".into()))
    }
}

/// A roller that answers by combatant name. Names without a scripted value
/// fail with `RollError::Roller`; names scripted with `failing` fail with the
/// given error.
#[derive(Debug, Default)]
pub struct ScriptedRoller {
    results: HashMap<String, Result<f64, RollError>>,
}

impl ScriptedRoller {
    /// Create a roller returning `value` for each `(name, value)` pair.
    #[must_use]
    pub fn new<'a>(values: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self {
            results: values
                .into_iter()
                .map(|(name, value)| (name.to_owned(), Ok(value)))
                .collect(),
        }
    }

    /// Makes rolls for `name` fail with `error`.
    #[must_use]
    pub fn failing(mut self, name: &str, error: RollError) -> Self {
        self.results.insert(name.to_owned(), Err(error));
        self
    }
}

#[async_trait]
impl InitiativeRoller for ScriptedRoller {
    async fn roll(&self, _formula: &str, context: &RollContext) -> Result<f64, RollError> {
        self.results
            .get(&context.name)
            .cloned()
            .unwrap_or_else(|| Err(RollError::Roller(format!("no roll scripted for {}", context.name))))
    }
}

/// A roller whose rolls never complete. Each roll signals that it started,
/// so tests can act while rolls are in flight.
#[derive(Debug, Default)]
pub struct PendingRoller {
    started: Notify,
}

impl PendingRoller {
    /// Create a new pending roller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until at least one roll has started.
    pub async fn wait_until_started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl InitiativeRoller for PendingRoller {
    async fn roll(&self, _formula: &str, _context: &RollContext) -> Result<f64, RollError> {
        self.started.notify_one();
        std::future::pending().await
    }
}

/// A roller that holds every roll until `open` is called, then returns a
/// fixed value. Each roll signals that it started.
#[derive(Debug)]
pub struct GatedRoller {
    value: f64,
    started: Notify,
    gate: Semaphore,
}

impl GatedRoller {
    /// Create a closed gate whose rolls produce `value`.
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            value,
            started: Notify::new(),
            gate: Semaphore::new(0),
        }
    }

    /// Waits until at least one roll has started.
    pub async fn wait_until_started(&self) {
        self.started.notified().await;
    }

    /// Lets every pending and future roll through.
    pub fn open(&self) {
        // A closed semaphore fails every acquire immediately.
        self.gate.close();
    }
}

#[async_trait]
impl InitiativeRoller for GatedRoller {
    async fn roll(&self, _formula: &str, _context: &RollContext) -> Result<f64, RollError> {
        self.started.notify_one();
        let _ = self.gate.acquire().await;
        Ok(self.value)
    }
}

/// A roller that always fails. Useful for testing error-handling paths.
#[derive(Debug)]
pub struct FailingRoller;

#[async_trait]
impl InitiativeRoller for FailingRoller {
    async fn roll(&self, formula: &str, _context: &RollContext) -> Result<f64, RollError> {
        Err(RollError::InvalidFormula {
            formula: formula.to_owned(),
            reason: "unsupported".into(),
        })
    }
}
