//! The encounter store.
//!
//! Owns every encounter, serializes writes per encounter, keeps the
//! one-active-encounter-per-scene invariant under a per-scene lock, and
//! forwards each change to the optional persistence hook.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use initiative_core::aggregate::AggregateRoot;
use initiative_core::clock::Clock;
use initiative_core::error::{EncounterError, RollError};
use initiative_core::event::{DomainEvent, EventMetadata};
use initiative_core::refs::SceneRef;
use initiative_core::repository::{EncounterRepository, StoredEvent};
use initiative_core::roller::InitiativeRoller;
use tokio::sync::{Mutex, MutexGuard, RwLock, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::application::rolling::{self, RollLimits};
use crate::config::CombatSettings;
use crate::domain::encounter::Encounter;
use crate::domain::events::{EncounterEvent, EncounterEventKind};
use crate::domain::record::EncounterRecord;
use crate::domain::rolls::{RollReport, RollRequest};

/// Repository type the store persists through.
pub type SharedEncounterRepository = Arc<dyn EncounterRepository<EncounterRecord>>;

fn to_stored_event(event: &EncounterEvent) -> StoredEvent {
    let meta = event.metadata();
    StoredEvent {
        event_id: meta.event_id,
        aggregate_id: meta.aggregate_id,
        event_type: event.event_type().to_owned(),
        payload: event.to_payload(),
        sequence_number: meta.sequence_number,
        correlation_id: meta.correlation_id,
        occurred_at: meta.occurred_at,
    }
}

/// One encounter and its bookkeeping.
#[derive(Debug)]
struct EncounterSlot {
    id: Uuid,
    scene_ref: SceneRef,
    /// Creation order, used to list a scene's encounters stably.
    sequence: u64,
    encounter: Mutex<Encounter>,
    /// Raised when the encounter is deleted; in-flight rolls watch it.
    deleted: watch::Sender<bool>,
}

impl EncounterSlot {
    fn is_deleted(&self) -> bool {
        *self.deleted.borrow()
    }
}

/// Owns all encounters of a host session.
pub struct EncounterStore {
    settings: CombatSettings,
    clock: Arc<dyn Clock>,
    repository: Option<SharedEncounterRepository>,
    encounters: RwLock<HashMap<Uuid, Arc<EncounterSlot>>>,
    scene_locks: Mutex<HashMap<SceneRef, Arc<Mutex<()>>>>,
    viewed: RwLock<Option<Uuid>>,
    next_sequence: AtomicU64,
}

impl std::fmt::Debug for EncounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncounterStore")
            .field("settings", &self.settings)
            .field("persistent", &self.repository.is_some())
            .finish_non_exhaustive()
    }
}

impl EncounterStore {
    /// Creates an empty store without persistence.
    #[must_use]
    pub fn new(settings: CombatSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            repository: None,
            encounters: RwLock::new(HashMap::new()),
            scene_locks: Mutex::new(HashMap::new()),
            viewed: RwLock::new(None),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Forwards every change to `repository`.
    #[must_use]
    pub fn with_repository(mut self, repository: SharedEncounterRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    /// The settings this store was built with.
    #[must_use]
    pub fn settings(&self) -> &CombatSettings {
        &self.settings
    }

    // --- lifecycle ---

    /// Creates an empty encounter in `scene_ref`.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::Persistence` if the persistence hook fails.
    #[instrument(skip(self), fields(scene = %scene_ref))]
    pub async fn create_encounter(&self, scene_ref: SceneRef) -> Result<Uuid, EncounterError> {
        let id = Uuid::new_v4();
        let mut encounter =
            Encounter::create(id, scene_ref).with_skip_defeated(self.settings.skip_defeated);
        // Nothing else can see the encounter until it is inserted, so a
        // failed save leaves the store untouched.
        self.persist(&mut encounter, Uuid::new_v4()).await?;
        self.insert_slot(encounter).await;
        info!(encounter_id = %id, "encounter created");
        Ok(id)
    }

    /// Loads an encounter from its persisted record.
    ///
    /// # Errors
    ///
    /// Returns the `Encounter::from_record` validation errors,
    /// `EncounterError::InvalidValue` if the id is already in use, and
    /// `EncounterError::ActivationConflict` if the record is active while
    /// another encounter of its scene already is.
    #[instrument(skip(self, record), fields(encounter_id = %record.id, scene = %record.scene_ref))]
    pub async fn insert_record(&self, record: EncounterRecord) -> Result<Uuid, EncounterError> {
        let encounter =
            Encounter::from_record(record)?.with_skip_defeated(self.settings.skip_defeated);
        let id = encounter.id;
        let scene_ref = encounter.scene_ref().clone();

        let scene_lock = self.scene_lock(&scene_ref).await;
        let _scene_guard = scene_lock.lock().await;

        if self.encounters.read().await.contains_key(&id) {
            return Err(EncounterError::InvalidValue(format!(
                "encounter {id} already exists"
            )));
        }
        if encounter.is_active() {
            let active = self.count_active(&scene_ref).await;
            if active > 0 {
                warn!(%scene_ref, active, "loaded record would make a second active encounter");
                return Err(EncounterError::ActivationConflict {
                    scene: scene_ref.to_string(),
                    active: active + 1,
                });
            }
        }

        self.insert_slot(encounter).await;
        info!("encounter loaded from record");
        Ok(id)
    }

    /// Deletes an encounter. Rolls in flight for it are cancelled.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::EncounterNotFound` if no such encounter exists,
    /// or `EncounterError::Persistence` if the persistence hook fails.
    #[instrument(skip(self))]
    pub async fn delete_encounter(&self, encounter_id: Uuid) -> Result<(), EncounterError> {
        let slot = self
            .encounters
            .write()
            .await
            .remove(&encounter_id)
            .ok_or(EncounterError::EncounterNotFound(encounter_id))?;

        {
            // Raising the flag under the encounter lock orders it against
            // writers that already hold the slot.
            let _encounter = slot.encounter.lock().await;
            slot.deleted.send_replace(true);
        }

        let mut viewed = self.viewed.write().await;
        if *viewed == Some(encounter_id) {
            *viewed = None;
        }
        drop(viewed);

        info!("encounter deleted");
        if let Some(repository) = &self.repository {
            repository.delete(encounter_id).await?;
        }
        Ok(())
    }

    // --- mutation and reads ---

    /// Runs `operation` against an encounter as its only writer, then
    /// persists whatever it changed.
    ///
    /// Changes made before `operation` fails are still persisted. If the
    /// persistence hook fails the encounter is rolled back to its state
    /// before `operation` ran.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::EncounterNotFound` if no such encounter exists,
    /// the error returned by `operation`, or `EncounterError::Persistence`.
    pub async fn update<T, F>(&self, encounter_id: Uuid, operation: F) -> Result<T, EncounterError>
    where
        F: FnOnce(&mut Encounter) -> Result<T, EncounterError>,
    {
        let slot = self.slot(encounter_id).await?;
        let mut encounter = slot.encounter.lock().await;
        if slot.is_deleted() {
            return Err(EncounterError::EncounterNotFound(encounter_id));
        }

        let correlation_id = Uuid::new_v4();
        let before = self.rollback_point(&encounter);
        let outcome = operation(&mut *encounter);
        if let Err(err) = &outcome {
            debug!(%encounter_id, %correlation_id, error = %err, "encounter operation rejected");
        }
        self.commit(&mut encounter, before, correlation_id).await?;
        outcome
    }

    /// Reads from an encounter under its lock.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::EncounterNotFound` if no such encounter exists.
    pub async fn read<T, F>(&self, encounter_id: Uuid, view: F) -> Result<T, EncounterError>
    where
        F: FnOnce(&Encounter) -> T,
    {
        let slot = self.slot(encounter_id).await?;
        let encounter = slot.encounter.lock().await;
        Ok(view(&*encounter))
    }

    /// Snapshot of one encounter in its persisted shape.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::EncounterNotFound` if no such encounter exists.
    pub async fn record(&self, encounter_id: Uuid) -> Result<EncounterRecord, EncounterError> {
        self.read(encounter_id, Encounter::to_record).await
    }

    // --- scenes ---

    /// Makes `encounter_id` the only active encounter of `scene_ref`.
    ///
    /// Holds the scene lock and every encounter of the scene for the whole
    /// swap. All flags are flipped before anything is persisted; if the
    /// persistence hook fails, encounters not yet saved are restored and the
    /// saved ones are switched back, so the scene keeps its previous
    /// activation.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::EncounterNotFound` if no such encounter exists,
    /// `EncounterError::InvalidValue` if it belongs to another scene,
    /// `EncounterError::ActivationConflict` if the invariant does not hold
    /// afterwards, or `EncounterError::Persistence`.
    #[instrument(skip(self), fields(scene = %scene_ref))]
    pub async fn activate(
        &self,
        encounter_id: Uuid,
        scene_ref: &SceneRef,
    ) -> Result<(), EncounterError> {
        let scene_lock = self.scene_lock(scene_ref).await;
        let _scene_guard = scene_lock.lock().await;

        let target = self.slot(encounter_id).await?;
        if &target.scene_ref != scene_ref {
            return Err(EncounterError::InvalidValue(format!(
                "encounter {encounter_id} belongs to scene {}, not {scene_ref}",
                target.scene_ref
            )));
        }

        let correlation_id = Uuid::new_v4();
        let slots = self.slots_for_scene(scene_ref).await;
        let mut encounters = Vec::with_capacity(slots.len());
        for slot in &slots {
            encounters.push(slot.encounter.lock().await);
        }

        // Deactivations are saved before the activation.
        let mut flipped: Vec<(usize, Encounter)> = Vec::new();
        for (index, encounter) in encounters.iter_mut().enumerate() {
            let before = (**encounter).clone();
            let is_target = encounter.id == encounter_id;
            if encounter.set_active(is_target) {
                flipped.push((index, before));
            }
        }
        flipped.sort_by_key(|(index, _)| slots[*index].id == encounter_id);

        for position in 0..flipped.len() {
            let index = flipped[position].0;
            if let Err(err) = self.persist(&mut encounters[index], correlation_id).await {
                warn!(error = %err, "activation could not be saved; restoring previous state");
                self.undo_activation(&mut encounters, &flipped, position, correlation_id)
                    .await;
                return Err(err);
            }
            debug!(encounter_id = %slots[index].id, "activation flag saved");
        }

        let active = encounters.iter().filter(|e| e.is_active()).count();
        if active != 1 {
            warn!(active, "activation left the scene inconsistent");
            return Err(EncounterError::ActivationConflict {
                scene: scene_ref.to_string(),
                active,
            });
        }

        info!(%correlation_id, "encounter activated");
        Ok(())
    }

    /// The active encounter of `scene_ref`, if any.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::ActivationConflict` if more than one encounter
    /// of the scene is active.
    pub async fn active_for_scene(
        &self,
        scene_ref: &SceneRef,
    ) -> Result<Option<EncounterRecord>, EncounterError> {
        let active: Vec<EncounterRecord> = self
            .combats_for_scene(scene_ref)
            .await
            .into_iter()
            .filter(|record| record.active)
            .collect();

        match active.len() {
            0 | 1 => Ok(active.into_iter().next()),
            count => Err(EncounterError::ActivationConflict {
                scene: scene_ref.to_string(),
                active: count,
            }),
        }
    }

    /// Every encounter of `scene_ref`, in creation order.
    pub async fn combats_for_scene(&self, scene_ref: &SceneRef) -> Vec<EncounterRecord> {
        let scene_lock = self.scene_lock(scene_ref).await;
        let _scene_guard = scene_lock.lock().await;

        let mut records = Vec::new();
        for slot in self.slots_for_scene(scene_ref).await {
            records.push(slot.encounter.lock().await.to_record());
        }
        records
    }

    // --- viewing ---

    /// Marks `encounter_id` as the encounter the host presents.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::EncounterNotFound` if no such encounter exists.
    pub async fn view(&self, encounter_id: Uuid) -> Result<(), EncounterError> {
        self.slot(encounter_id).await?;
        *self.viewed.write().await = Some(encounter_id);
        Ok(())
    }

    /// Clears the viewed encounter.
    pub async fn clear_view(&self) {
        *self.viewed.write().await = None;
    }

    /// The encounter the host presents, independent of activation.
    pub async fn viewed_encounter(&self) -> Option<EncounterRecord> {
        let viewed = (*self.viewed.read().await)?;
        self.record(viewed).await.ok()
    }

    // --- rolling ---

    /// Rolls initiative for the requested combatants.
    ///
    /// Rolls run concurrently with no encounter lock held; their results are
    /// applied one at a time under the lock. Individual failures are collected
    /// in the report.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::EncounterNotFound` if no such encounter exists,
    /// `EncounterError::Cancelled` if it is deleted while rolls are in flight,
    /// or `EncounterError::Persistence`.
    #[instrument(skip(self, request, roller), fields(requested = request.ids.len()))]
    pub async fn roll_initiative(
        &self,
        encounter_id: Uuid,
        request: RollRequest,
        roller: Arc<dyn InitiativeRoller>,
    ) -> Result<RollReport, EncounterError> {
        let slot = self.slot(encounter_id).await?;
        let (planned, mut report) = {
            let encounter = slot.encounter.lock().await;
            encounter.plan_rolls(&request, &self.settings.initiative_formula)
        };
        debug!(planned = planned.len(), skipped = report.skipped.len(), "rolls planned");

        let limits = RollLimits {
            max_concurrent: self.settings.max_concurrent_rolls,
            timeout: self.settings.roll_timeout(),
        };
        let outcomes = rolling::run_rolls(planned, roller, slot.deleted.subscribe(), limits).await;

        let mut encounter = slot.encounter.lock().await;
        if slot.is_deleted() {
            warn!("encounter deleted while rolling; results discarded");
            return Err(EncounterError::Cancelled(encounter_id));
        }
        let before = self.rollback_point(&encounter);
        encounter.apply_roll_outcomes(outcomes, request.overwrite, &mut report);
        self.commit(&mut encounter, before, Uuid::new_v4()).await?;

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "initiative rolled"
        );
        Ok(report)
    }

    /// Rolls (or rerolls) initiative for a single combatant.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::RollFailed` if the roll fails, otherwise see
    /// [`EncounterStore::roll_initiative`].
    pub async fn roll_combatant(
        &self,
        encounter_id: Uuid,
        combatant_id: Uuid,
        formula: Option<String>,
        roller: Arc<dyn InitiativeRoller>,
    ) -> Result<f64, EncounterError> {
        let request = RollRequest {
            ids: vec![combatant_id],
            formula,
            overwrite: true,
        };
        let report = self.roll_initiative(encounter_id, request, roller).await?;

        if let Some(rolled) = report.succeeded.first() {
            return Ok(rolled.initiative);
        }
        let source = report
            .failed
            .into_iter()
            .next()
            .map_or(RollError::UnknownCombatant(combatant_id), |f| f.error);
        Err(EncounterError::RollFailed {
            combatant_id,
            source,
        })
    }

    /// Rolls for every combatant without initiative.
    ///
    /// # Errors
    ///
    /// See [`EncounterStore::roll_initiative`].
    pub async fn roll_all(
        &self,
        encounter_id: Uuid,
        formula: Option<String>,
        roller: Arc<dyn InitiativeRoller>,
    ) -> Result<RollReport, EncounterError> {
        let ids = self.read(encounter_id, Encounter::unrolled_ids).await?;
        let request = RollRequest {
            ids,
            formula,
            overwrite: false,
        };
        self.roll_initiative(encounter_id, request, roller).await
    }

    /// Rolls for every non-player combatant without initiative.
    ///
    /// # Errors
    ///
    /// See [`EncounterStore::roll_initiative`].
    pub async fn roll_npc(
        &self,
        encounter_id: Uuid,
        formula: Option<String>,
        roller: Arc<dyn InitiativeRoller>,
    ) -> Result<RollReport, EncounterError> {
        let ids = self.read(encounter_id, Encounter::unrolled_npc_ids).await?;
        let request = RollRequest {
            ids,
            formula,
            overwrite: false,
        };
        self.roll_initiative(encounter_id, request, roller).await
    }

    // --- internals ---

    async fn insert_slot(&self, encounter: Encounter) -> Arc<EncounterSlot> {
        let (deleted, _) = watch::channel(false);
        let slot = Arc::new(EncounterSlot {
            id: encounter.id,
            scene_ref: encounter.scene_ref().clone(),
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            encounter: Mutex::new(encounter),
            deleted,
        });
        self.encounters
            .write()
            .await
            .insert(slot.id, Arc::clone(&slot));
        slot
    }

    async fn slot(&self, encounter_id: Uuid) -> Result<Arc<EncounterSlot>, EncounterError> {
        self.encounters
            .read()
            .await
            .get(&encounter_id)
            .cloned()
            .ok_or(EncounterError::EncounterNotFound(encounter_id))
    }

    async fn slots_for_scene(&self, scene_ref: &SceneRef) -> Vec<Arc<EncounterSlot>> {
        let mut slots: Vec<Arc<EncounterSlot>> = self
            .encounters
            .read()
            .await
            .values()
            .filter(|slot| &slot.scene_ref == scene_ref)
            .cloned()
            .collect();
        slots.sort_by_key(|slot| slot.sequence);
        slots
    }

    async fn scene_lock(&self, scene_ref: &SceneRef) -> Arc<Mutex<()>> {
        let mut locks = self.scene_locks.lock().await;
        Arc::clone(locks.entry(scene_ref.clone()).or_default())
    }

    /// Counts active encounters of a scene. Callers hold the scene lock.
    async fn count_active(&self, scene_ref: &SceneRef) -> usize {
        let mut active = 0;
        for slot in self.slots_for_scene(scene_ref).await {
            if slot.encounter.lock().await.is_active() {
                active += 1;
            }
        }
        active
    }

    /// Copy of the encounter to roll back to if persisting fails. Without a
    /// persistence hook nothing can fail, so no copy is taken.
    fn rollback_point(&self, encounter: &Encounter) -> Option<Encounter> {
        self.repository.as_ref().map(|_| encounter.clone())
    }

    /// Persists pending changes, restoring `before` if the hook fails.
    async fn commit(
        &self,
        encounter: &mut Encounter,
        before: Option<Encounter>,
        correlation_id: Uuid,
    ) -> Result<(), EncounterError> {
        if let Err(err) = self.persist(encounter, correlation_id).await {
            if let Some(before) = before {
                warn!(encounter_id = %encounter.id, error = %err, "save failed; encounter rolled back");
                *encounter = before;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Reverts a failed activation. Entries of `flipped` from `failed` on
    /// were never saved and get their previous state back; earlier entries
    /// were saved, so their flag is flipped back and saved again.
    async fn undo_activation(
        &self,
        encounters: &mut [MutexGuard<'_, Encounter>],
        flipped: &[(usize, Encounter)],
        failed: usize,
        correlation_id: Uuid,
    ) {
        for (index, before) in &flipped[failed..] {
            *encounters[*index] = before.clone();
        }
        for (index, before) in &flipped[..failed] {
            let encounter = &mut encounters[*index];
            let saved = (**encounter).clone();
            encounter.set_active(before.is_active());
            if let Err(err) = self.persist(encounter, correlation_id).await {
                // Memory follows what the hook last accepted.
                warn!(encounter_id = %saved.id, error = %err, "could not restore activation flag");
                **encounter = saved;
            }
        }
    }

    /// Drains the encounter's changes, wraps them as events and hands them to
    /// the persistence hook together with the new record.
    #[allow(clippy::cast_possible_wrap)]
    async fn persist(
        &self,
        encounter: &mut Encounter,
        correlation_id: Uuid,
    ) -> Result<Vec<StoredEvent>, EncounterError> {
        let changes = encounter.take_uncommitted_changes();
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let first_sequence = encounter.version() - changes.len() as i64 + 1;
        let occurred_at = self.clock.now();
        let events: Vec<StoredEvent> = changes
            .into_iter()
            .enumerate()
            .map(|(offset, kind): (usize, EncounterEventKind)| {
                to_stored_event(&EncounterEvent {
                    metadata: EventMetadata {
                        event_id: Uuid::new_v4(),
                        event_type: kind.event_type().to_owned(),
                        aggregate_id: encounter.id,
                        sequence_number: first_sequence + offset as i64,
                        correlation_id,
                        occurred_at,
                    },
                    kind,
                })
            })
            .collect();

        debug!(
            encounter_id = %encounter.id,
            %correlation_id,
            events = events.len(),
            "encounter changed"
        );

        if let Some(repository) = &self.repository {
            repository.save(&encounter.to_record(), &events).await?;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use initiative_core::refs::{ActorRef, TokenRef};
    use initiative_test_support::{
        FailingEncounterRepository, FixedClock, GatedRoller, PendingRoller,
        RecordingEncounterRepository, ScriptedRoller, SequenceRoller,
    };

    fn fixed_clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()))
    }

    fn store() -> EncounterStore {
        EncounterStore::new(CombatSettings::default(), fixed_clock())
    }

    fn scene(name: &str) -> SceneRef {
        SceneRef::new(name)
    }

    async fn add(store: &EncounterStore, encounter_id: Uuid, name: &str) -> Uuid {
        store
            .update(encounter_id, |e| {
                e.add_combatant(
                    ActorRef::new(format!("actor-{name}")),
                    TokenRef::new(format!("token-{name}")),
                    name,
                )
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_encounter_is_inactive_and_unstarted() {
        let store = store();

        let id = store.create_encounter(scene("s")).await.unwrap();
        let record = store.record(id).await.unwrap();

        assert_eq!(record.scene_ref, scene("s"));
        assert_eq!(record.round, 0);
        assert!(!record.active);
        assert!(record.combatants.is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_encounter_returns_not_found() {
        let store = store();
        let missing = Uuid::new_v4();

        let result = store.update(missing, Encounter::start_combat).await;

        match result.unwrap_err() {
            EncounterError::EncounterNotFound(id) => assert_eq!(id, missing),
            other => panic!("expected EncounterNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_activate_second_encounter_deactivates_first() {
        let store = store();
        let first = store.create_encounter(scene("s")).await.unwrap();
        let second = store.create_encounter(scene("s")).await.unwrap();

        store.activate(first, &scene("s")).await.unwrap();
        store.activate(second, &scene("s")).await.unwrap();

        assert!(!store.record(first).await.unwrap().active);
        assert!(store.record(second).await.unwrap().active);
        let active = store.active_for_scene(&scene("s")).await.unwrap().unwrap();
        assert_eq!(active.id, second);
    }

    #[tokio::test]
    async fn test_activate_leaves_other_scenes_alone() {
        let store = store();
        let here = store.create_encounter(scene("here")).await.unwrap();
        let there = store.create_encounter(scene("there")).await.unwrap();

        store.activate(there, &scene("there")).await.unwrap();
        store.activate(here, &scene("here")).await.unwrap();

        assert!(store.record(there).await.unwrap().active);
        assert!(store.record(here).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_activate_with_wrong_scene_is_rejected() {
        let store = store();
        let id = store.create_encounter(scene("a")).await.unwrap();

        let result = store.activate(id, &scene("b")).await;

        assert!(matches!(result, Err(EncounterError::InvalidValue(_))));
        assert!(!store.record(id).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_insert_second_active_record_is_a_conflict() {
        let store = store();
        let id = store.create_encounter(scene("s")).await.unwrap();
        store.activate(id, &scene("s")).await.unwrap();

        let mut record = Encounter::new(Uuid::new_v4(), scene("s")).to_record();
        record.active = true;

        match store.insert_record(record).await.unwrap_err() {
            EncounterError::ActivationConflict { scene, active } => {
                assert_eq!(scene, "s");
                assert_eq!(active, 2);
            }
            other => panic!("expected ActivationConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_insert_record_with_existing_id_is_rejected() {
        let store = store();
        let id = store.create_encounter(scene("s")).await.unwrap();
        let record = store.record(id).await.unwrap();

        let result = store.insert_record(record).await;

        assert!(matches!(result, Err(EncounterError::InvalidValue(_))));
    }

    #[tokio::test]
    async fn test_combats_for_scene_lists_in_creation_order() {
        let store = store();
        let a = store.create_encounter(scene("s")).await.unwrap();
        store.create_encounter(scene("other")).await.unwrap();
        let b = store.create_encounter(scene("s")).await.unwrap();

        let ids: Vec<Uuid> = store
            .combats_for_scene(&scene("s"))
            .await
            .into_iter()
            .map(|r| r.id)
            .collect();

        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn test_viewed_encounter_is_independent_of_activation() {
        let store = store();
        let viewed = store.create_encounter(scene("s")).await.unwrap();
        let active = store.create_encounter(scene("s")).await.unwrap();
        assert!(store.viewed_encounter().await.is_none());

        store.activate(active, &scene("s")).await.unwrap();
        store.view(viewed).await.unwrap();

        let record = store.viewed_encounter().await.unwrap();
        assert_eq!(record.id, viewed);
        assert!(!record.active);

        store.clear_view().await;
        assert!(store.viewed_encounter().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_clears_view_and_forgets_encounter() {
        let store = store();
        let id = store.create_encounter(scene("s")).await.unwrap();
        store.view(id).await.unwrap();

        store.delete_encounter(id).await.unwrap();

        assert!(store.viewed_encounter().await.is_none());
        assert!(matches!(
            store.record(id).await,
            Err(EncounterError::EncounterNotFound(_))
        ));
        assert!(matches!(
            store.delete_encounter(id).await,
            Err(EncounterError::EncounterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_roll_initiative_applies_results_and_orders_turns() {
        let store = store();
        let id = store.create_encounter(scene("s")).await.unwrap();
        let a = add(&store, id, "A").await;
        let b = add(&store, id, "B").await;
        let roller = Arc::new(ScriptedRoller::new([("A", 4.0), ("B", 19.0)]));

        let report = store
            .roll_initiative(id, RollRequest::for_ids([a, b]), roller)
            .await
            .unwrap();

        assert!(report.is_complete_success());
        let order = store.read(id, |e| e.turn_ids().to_vec()).await.unwrap();
        assert_eq!(order, vec![b, a]);
    }

    #[tokio::test]
    async fn test_roll_all_and_roll_npc_select_unrolled() {
        let store = store();
        let id = store.create_encounter(scene("s")).await.unwrap();
        let npc = add(&store, id, "Ogre").await;
        let pc = store
            .update(id, |e| {
                e.add_combatant_with(
                    crate::domain::combatant::NewCombatant::new(
                        ActorRef::new("hero"),
                        TokenRef::new("hero"),
                        "Hero",
                    )
                    .player_owned(),
                )
            })
            .await
            .unwrap();

        let report = store
            .roll_npc(id, None, Arc::new(SequenceRoller::new([9.0])))
            .await
            .unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].combatant_id, npc);

        let report = store
            .roll_all(id, None, Arc::new(SequenceRoller::new([14.0])))
            .await
            .unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].combatant_id, pc);
    }

    #[tokio::test]
    async fn test_roll_combatant_rerolls_and_reports_failure() {
        let store = store();
        let id = store.create_encounter(scene("s")).await.unwrap();
        let a = add(&store, id, "A").await;
        store.update(id, |e| e.set_initiative(a, 2.0)).await.unwrap();

        let value = store
            .roll_combatant(id, a, None, Arc::new(ScriptedRoller::new([("A", 16.0)])))
            .await
            .unwrap();
        assert_eq!(value, 16.0);

        let result = store
            .roll_combatant(id, a, None, Arc::new(ScriptedRoller::default()))
            .await;
        match result.unwrap_err() {
            EncounterError::RollFailed {
                combatant_id,
                source,
            } => {
                assert_eq!(combatant_id, a);
                assert!(matches!(source, RollError::Roller(_)));
            }
            other => panic!("expected RollFailed, got {other:?}"),
        }
        let record = store.record(id).await.unwrap();
        assert_eq!(record.combatants[0].initiative, Some(16.0));
    }

    #[tokio::test]
    async fn test_delete_mid_roll_cancels_in_flight_rolls() {
        let store = Arc::new(store());
        let id = store.create_encounter(scene("s")).await.unwrap();
        let a = add(&store, id, "A").await;
        let roller = Arc::new(PendingRoller::new());

        let rolling = {
            let store = Arc::clone(&store);
            let roller: Arc<dyn InitiativeRoller> = roller.clone();
            tokio::spawn(async move {
                store
                    .roll_initiative(id, RollRequest::for_ids([a]), roller)
                    .await
            })
        };
        roller.wait_until_started().await;
        store.delete_encounter(id).await.unwrap();

        let result = rolling.await.unwrap();
        assert!(matches!(result, Err(EncounterError::Cancelled(cancelled)) if cancelled == id));
    }

    #[tokio::test]
    async fn test_roll_timeout_is_reported_per_combatant() {
        let settings = CombatSettings {
            roll_timeout_ms: Some(10),
            ..CombatSettings::default()
        };
        let store = EncounterStore::new(settings, fixed_clock());
        let id = store.create_encounter(scene("s")).await.unwrap();
        let a = add(&store, id, "A").await;

        let report = store
            .roll_initiative(id, RollRequest::for_ids([a]), Arc::new(PendingRoller::new()))
            .await
            .unwrap();

        assert_eq!(report.failure_for(a), Some(&RollError::TimedOut(10)));
    }

    #[tokio::test]
    async fn test_persistence_hook_receives_records_and_sequenced_events() {
        let repository = Arc::new(RecordingEncounterRepository::<EncounterRecord>::new());
        let store = store().with_repository(repository.clone());

        let id = store.create_encounter(scene("s")).await.unwrap();
        add(&store, id, "A").await;
        store.update(id, Encounter::start_combat).await.unwrap();

        let saved = repository.saved();
        assert_eq!(saved.len(), 3);
        let (last_record, last_events) = saved.last().unwrap();
        assert_eq!(last_record.round, 1);
        assert_eq!(last_events[0].event_type, "combat.combat_started");

        let sequence: Vec<i64> = saved
            .iter()
            .flat_map(|(_, events)| events.iter().map(|e| e.sequence_number))
            .collect();
        assert_eq!(sequence, (1..=sequence.len() as i64).collect::<Vec<_>>());
        assert!(saved.iter().all(|(_, events)| events.iter().all(|e| e.aggregate_id == id)));
    }

    #[tokio::test]
    async fn test_rejected_operation_persists_nothing() {
        let repository = Arc::new(RecordingEncounterRepository::<EncounterRecord>::new());
        let store = store().with_repository(repository.clone());
        let id = store.create_encounter(scene("s")).await.unwrap();

        let result = store.update(id, Encounter::start_combat).await;

        assert!(matches!(result, Err(EncounterError::EmptyEncounter(_))));
        assert_eq!(repository.saved().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_repository_surfaces_persistence_error() {
        let store = store().with_repository(Arc::new(FailingEncounterRepository));

        let result = store.create_encounter(scene("s")).await;

        assert!(matches!(result, Err(EncounterError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_encounter_behind() {
        let store = store().with_repository(Arc::new(FailingEncounterRepository));

        let result = store.create_encounter(scene("s")).await;

        assert!(matches!(result, Err(EncounterError::Persistence(_))));
        assert!(store.combats_for_scene(&scene("s")).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_rolls_update_back_without_sequence_gap() {
        // Saves: create (1), add (2), initiative (3 fails), initiative again (4).
        let repository = Arc::new(
            RecordingEncounterRepository::<EncounterRecord>::new().failing_on_save(3),
        );
        let store = store().with_repository(repository.clone());
        let id = store.create_encounter(scene("s")).await.unwrap();
        let a = add(&store, id, "A").await;

        let result = store.update(id, |e| e.set_initiative(a, 12.0)).await;

        assert!(matches!(result, Err(EncounterError::Persistence(_))));
        let record = store.record(id).await.unwrap();
        assert_eq!(record.combatants[0].initiative, None);

        store.update(id, |e| e.set_initiative(a, 9.0)).await.unwrap();
        let sequence: Vec<i64> = repository
            .saved()
            .iter()
            .flat_map(|(_, events)| events.iter().map(|e| e.sequence_number))
            .collect();
        assert_eq!(sequence, vec![1, 2, 3]);
        assert_eq!(
            repository.last_record().unwrap().combatants[0].initiative,
            Some(9.0)
        );
    }

    #[tokio::test]
    async fn test_activation_failing_before_any_save_keeps_previous_active() {
        // Saves: create e1 (1), create e2 (2), activate e1 (3), deactivate e1 (4 fails).
        let repository = Arc::new(
            RecordingEncounterRepository::<EncounterRecord>::new().failing_on_save(4),
        );
        let store = store().with_repository(repository.clone());
        let first = store.create_encounter(scene("s")).await.unwrap();
        let second = store.create_encounter(scene("s")).await.unwrap();
        store.activate(first, &scene("s")).await.unwrap();

        let result = store.activate(second, &scene("s")).await;

        assert!(matches!(result, Err(EncounterError::Persistence(_))));
        assert!(store.record(first).await.unwrap().active);
        assert!(!store.record(second).await.unwrap().active);
        let active = store.active_for_scene(&scene("s")).await.unwrap().unwrap();
        assert_eq!(active.id, first);
    }

    #[tokio::test]
    async fn test_activation_failing_on_target_restores_saved_deactivation() {
        // Saves: create e1 (1), create e2 (2), activate e1 (3),
        // deactivate e1 (4), activate e2 (5 fails), reactivate e1 (6).
        let repository = Arc::new(
            RecordingEncounterRepository::<EncounterRecord>::new().failing_on_save(5),
        );
        let store = store().with_repository(repository.clone());
        let first = store.create_encounter(scene("s")).await.unwrap();
        let second = store.create_encounter(scene("s")).await.unwrap();
        store.activate(first, &scene("s")).await.unwrap();

        let result = store.activate(second, &scene("s")).await;

        assert!(matches!(result, Err(EncounterError::Persistence(_))));
        assert!(store.record(first).await.unwrap().active);
        assert!(!store.record(second).await.unwrap().active);
        let (last_saved, _) = repository.saved().last().cloned().unwrap();
        assert_eq!(last_saved.id, first);
        assert!(last_saved.active);
    }

    #[tokio::test]
    async fn test_initiative_set_during_roll_is_not_overwritten() {
        let store = Arc::new(store());
        let id = store.create_encounter(scene("s")).await.unwrap();
        let a = add(&store, id, "A").await;
        let roller = Arc::new(GatedRoller::new(3.0));

        let rolling = {
            let store = Arc::clone(&store);
            let roller: Arc<dyn InitiativeRoller> = roller.clone();
            tokio::spawn(async move {
                store
                    .roll_initiative(id, RollRequest::for_ids([a]), roller)
                    .await
            })
        };
        roller.wait_until_started().await;
        store.update(id, |e| e.set_initiative(a, 20.0)).await.unwrap();
        roller.open();

        let report = rolling.await.unwrap().unwrap();
        assert!(report.succeeded.is_empty());
        assert_eq!(report.skipped, vec![a]);
        let record = store.record(id).await.unwrap();
        assert_eq!(record.combatants[0].initiative, Some(20.0));
    }

    #[tokio::test]
    async fn test_overwriting_roll_replaces_initiative_set_during_roll() {
        let store = Arc::new(store());
        let id = store.create_encounter(scene("s")).await.unwrap();
        let a = add(&store, id, "A").await;
        let roller = Arc::new(GatedRoller::new(3.0));

        let rolling = {
            let store = Arc::clone(&store);
            let roller: Arc<dyn InitiativeRoller> = roller.clone();
            tokio::spawn(async move {
                store
                    .roll_initiative(id, RollRequest::for_ids([a]).overwriting(), roller)
                    .await
            })
        };
        roller.wait_until_started().await;
        store.update(id, |e| e.set_initiative(a, 20.0)).await.unwrap();
        roller.open();

        let report = rolling.await.unwrap().unwrap();
        assert_eq!(report.succeeded.len(), 1);
        let record = store.record(id).await.unwrap();
        assert_eq!(record.combatants[0].initiative, Some(3.0));
    }

    #[tokio::test]
    async fn test_delete_reaches_repository() {
        let repository = Arc::new(RecordingEncounterRepository::<EncounterRecord>::new());
        let store = store().with_repository(repository.clone());
        let id = store.create_encounter(scene("s")).await.unwrap();

        store.delete_encounter(id).await.unwrap();

        assert_eq!(repository.deleted(), vec![id]);
    }
}
