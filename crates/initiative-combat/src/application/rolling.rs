//! Concurrent execution of planned initiative rolls.
//!
//! Rolls are independent, so they run side by side on a `JoinSet`. Nothing
//! here touches an encounter: the caller plans under the encounter lock,
//! releases it, runs the rolls, then applies the outcomes under the lock
//! again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use initiative_core::error::RollError;
use initiative_core::roller::InitiativeRoller;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::rolls::PlannedRoll;

/// Limits applied to one batch of rolls.
#[derive(Debug, Clone, Copy)]
pub struct RollLimits {
    /// Rolls allowed in flight at once.
    pub max_concurrent: usize,
    /// Per-roll timeout.
    pub timeout: Option<Duration>,
}

/// Runs every planned roll and returns `(combatant_id, outcome)` pairs in
/// plan order.
///
/// When `cancel` turns `true` (or its sender goes away) every roll still in
/// flight resolves as `RollError::Cancelled`.
pub async fn run_rolls(
    planned: Vec<PlannedRoll>,
    roller: Arc<dyn InitiativeRoller>,
    cancel: watch::Receiver<bool>,
    limits: RollLimits,
) -> Vec<(Uuid, Result<f64, RollError>)> {
    let semaphore = Arc::new(Semaphore::new(limits.max_concurrent.max(1)));
    let mut tasks = JoinSet::new();
    let mut slots = HashMap::new();
    let mut outcomes: Vec<Option<(Uuid, Result<f64, RollError>)>> = vec![None; planned.len()];

    for (position, roll) in planned.into_iter().enumerate() {
        let combatant_id = roll.context.combatant_id;
        let roller = Arc::clone(&roller);
        let semaphore = Arc::clone(&semaphore);
        let mut cancel = cancel.clone();

        let handle = tasks.spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancelled(&mut cancel) => Err(RollError::Cancelled),
                outcome = roll_one(roller.as_ref(), &roll, &semaphore, limits.timeout) => outcome,
            };
            (position, combatant_id, outcome)
        });
        slots.insert(handle.id(), (position, combatant_id));
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((position, combatant_id, outcome)) => {
                debug!(%combatant_id, ok = outcome.is_ok(), "initiative roll finished");
                outcomes[position] = Some((combatant_id, outcome));
            }
            Err(join_error) => {
                if let Some(&(position, combatant_id)) = slots.get(&join_error.id()) {
                    warn!(%combatant_id, error = %join_error, "initiative roll task failed");
                    outcomes[position] = Some((
                        combatant_id,
                        Err(RollError::Roller(format!("roll task failed: {join_error}"))),
                    ));
                }
            }
        }
    }

    outcomes.into_iter().flatten().collect()
}

async fn roll_one(
    roller: &dyn InitiativeRoller,
    roll: &PlannedRoll,
    semaphore: &Semaphore,
    timeout: Option<Duration>,
) -> Result<f64, RollError> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|_| RollError::Cancelled)?;

    let pending = roller.roll(&roll.formula, &roll.context);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, pending)
            .await
            .map_err(|_| RollError::TimedOut(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)))?,
        None => pending.await,
    }
}

/// Resolves once the flag is raised or its sender is dropped.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use initiative_core::refs::{ActorRef, TokenRef};
    use initiative_core::roller::{FnRoller, RollContext};
    use initiative_test_support::{PendingRoller, ScriptedRoller};

    fn planned(name: &str) -> PlannedRoll {
        PlannedRoll {
            formula: "1d20".to_owned(),
            context: RollContext {
                encounter_id: Uuid::nil(),
                combatant_id: Uuid::new_v4(),
                actor_ref: ActorRef::new(format!("actor-{name}")),
                token_ref: TokenRef::new(format!("token-{name}")),
                name: name.to_owned(),
                player_owned: false,
            },
        }
    }

    fn unlimited() -> RollLimits {
        RollLimits {
            max_concurrent: 4,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_outcomes_keep_plan_order() {
        let rolls = vec![planned("A"), planned("B"), planned("C")];
        let expected: Vec<Uuid> = rolls.iter().map(|r| r.context.combatant_id).collect();
        let roller = Arc::new(ScriptedRoller::new([("A", 3.0), ("B", 17.0), ("C", 9.0)]));
        let (_tx, rx) = watch::channel(false);

        let outcomes = run_rolls(rolls, roller, rx, unlimited()).await;

        let ids: Vec<Uuid> = outcomes.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, expected);
        assert_eq!(outcomes[1].1, Ok(17.0));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_rolls() {
        let rolls = vec![planned("A"), planned("Unknown")];
        let roller = Arc::new(ScriptedRoller::new([("A", 11.0)]));
        let (_tx, rx) = watch::channel(false);

        let outcomes = run_rolls(rolls, roller, rx, unlimited()).await;

        assert_eq!(outcomes[0].1, Ok(11.0));
        assert!(matches!(outcomes[1].1, Err(RollError::Roller(_))));
    }

    #[tokio::test]
    async fn test_sync_closure_roller() {
        let roller = Arc::new(FnRoller(|formula: &str, _: &RollContext| {
            if formula == "1d20" { Ok(20.0) } else { Err(RollError::Roller("bad".into())) }
        }));
        let (_tx, rx) = watch::channel(false);

        let outcomes = run_rolls(vec![planned("A")], roller, rx, unlimited()).await;

        assert_eq!(outcomes[0].1, Ok(20.0));
    }

    #[tokio::test]
    async fn test_timeout_fails_slow_rolls() {
        let roller = Arc::new(PendingRoller::new());
        let (_tx, rx) = watch::channel(false);
        let limits = RollLimits {
            max_concurrent: 1,
            timeout: Some(Duration::from_millis(20)),
        };

        let outcomes = run_rolls(vec![planned("A"), planned("B")], roller, rx, limits).await;

        assert_eq!(outcomes.len(), 2);
        for (_, outcome) in outcomes {
            assert_eq!(outcome, Err(RollError::TimedOut(20)));
        }
    }

    #[tokio::test]
    async fn test_cancel_resolves_in_flight_rolls() {
        let roller = Arc::new(PendingRoller::new());
        let (tx, rx) = watch::channel(false);
        let started = Arc::clone(&roller);

        let batch = tokio::spawn(run_rolls(vec![planned("A"), planned("B")], roller, rx, unlimited()));
        started.wait_until_started().await;
        tx.send_replace(true);

        let outcomes = batch.await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, o)| *o == Err(RollError::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_plan_returns_nothing() {
        let (_tx, rx) = watch::channel(false);
        let outcomes = run_rolls(Vec::new(), Arc::new(PendingRoller::new()), rx, unlimited()).await;
        assert!(outcomes.is_empty());
    }
}
