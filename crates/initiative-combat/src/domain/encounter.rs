//! Aggregate root for a combat encounter.

use std::collections::HashSet;

use initiative_core::aggregate::AggregateRoot;
use initiative_core::error::{EncounterError, RollError};
use initiative_core::refs::{ActorRef, SceneRef, TokenRef};
use initiative_core::roller::RollContext;
use uuid::Uuid;

use super::combatant::{Combatant, CombatantUpdate, NewCombatant};
use super::events::{
    ActivationChanged, CombatantAdded, CombatantRemoved, CombatantUpdated, EncounterCreated,
    EncounterEventKind, InitiativeChanged, TurnChanged,
};
use super::record::{CombatantRecord, EncounterRecord};
use super::rolls::{PlannedRoll, RollFailure, RollReport, RollRequest, RolledInitiative};
use super::snapshot::TurnSnapshot;
use super::turn_order;

/// The aggregate root for an encounter.
///
/// Owns its combatants and the derived turn order. Every mutation recomputes
/// the order and keeps the turn with the combatant that held it.
#[derive(Debug, Clone)]
pub struct Encounter {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Scene the encounter takes place in.
    pub(crate) scene_ref: SceneRef,
    /// Round counter; 0 until combat starts.
    pub(crate) round: u32,
    /// Index into `turns`; meaningful once `round >= 1`.
    pub(crate) turn: usize,
    /// Active within its scene.
    pub(crate) active: bool,
    /// Combatants in insertion order.
    pub(crate) combatants: Vec<Combatant>,
    /// Combatant ids in turn order.
    pub(crate) turns: Vec<Uuid>,
    /// Skip defeated combatants when moving the turn pointer.
    pub(crate) skip_defeated: bool,
    /// Number of changes applied.
    pub(crate) version: i64,
    /// Changes not yet drained by the owner.
    uncommitted_changes: Vec<EncounterEventKind>,
}

impl Encounter {
    /// Creates an empty, inactive, unstarted encounter.
    #[must_use]
    pub fn new(id: Uuid, scene_ref: SceneRef) -> Self {
        Self {
            id,
            scene_ref,
            round: 0,
            turn: 0,
            active: false,
            combatants: Vec::new(),
            turns: Vec::new(),
            skip_defeated: false,
            version: 0,
            uncommitted_changes: Vec::new(),
        }
    }

    /// Creates a new encounter and records its creation.
    #[must_use]
    pub fn create(id: Uuid, scene_ref: SceneRef) -> Self {
        let mut encounter = Self::new(id, scene_ref.clone());
        encounter.record(EncounterEventKind::EncounterCreated(EncounterCreated {
            encounter_id: id,
            scene_ref,
        }));
        encounter
    }

    /// Sets whether turn movement skips defeated combatants.
    #[must_use]
    pub fn with_skip_defeated(mut self, skip_defeated: bool) -> Self {
        self.skip_defeated = skip_defeated;
        self
    }

    // --- accessors ---

    /// The scene this encounter belongs to.
    #[must_use]
    pub fn scene_ref(&self) -> &SceneRef {
        &self.scene_ref
    }

    /// Current round; 0 when not started.
    #[must_use]
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Current turn index.
    #[must_use]
    pub fn turn(&self) -> usize {
        self.turn
    }

    /// Whether this is the active encounter of its scene.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether combat is under way.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.round >= 1 && !self.turns.is_empty()
    }

    /// Combatants in insertion order.
    #[must_use]
    pub fn combatants(&self) -> &[Combatant] {
        &self.combatants
    }

    /// Combatants in turn order.
    #[must_use]
    pub fn turns(&self) -> Vec<&Combatant> {
        self.turns.iter().filter_map(|id| self.combatant(*id)).collect()
    }

    /// Combatant ids in turn order.
    #[must_use]
    pub fn turn_ids(&self) -> &[Uuid] {
        &self.turns
    }

    /// Looks up a combatant by id.
    #[must_use]
    pub fn combatant(&self, id: Uuid) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.id == id)
    }

    /// Looks up a combatant by its token.
    #[must_use]
    pub fn combatant_by_token(&self, token_ref: &TokenRef) -> Option<&Combatant> {
        self.combatants.iter().find(|c| &c.token_ref == token_ref)
    }

    /// The combatant whose turn it is, once combat has started.
    #[must_use]
    pub fn current_combatant(&self) -> Option<&Combatant> {
        self.current_id().and_then(|id| self.combatant(id))
    }

    /// Round/turn position and turn holder.
    #[must_use]
    pub fn snapshot(&self) -> TurnSnapshot {
        TurnSnapshot {
            round: self.round,
            turn: self.turn,
            combatant_id: self.current_id(),
        }
    }

    /// Combatants without initiative, in insertion order.
    #[must_use]
    pub fn unrolled_ids(&self) -> Vec<Uuid> {
        self.combatants
            .iter()
            .filter(|c| !c.has_initiative())
            .map(|c| c.id)
            .collect()
    }

    /// Non-player combatants without initiative, in insertion order.
    #[must_use]
    pub fn unrolled_npc_ids(&self) -> Vec<Uuid> {
        self.combatants
            .iter()
            .filter(|c| !c.has_initiative() && !c.player_owned)
            .map(|c| c.id)
            .collect()
    }

    // --- combatant management ---

    /// Adds a combatant with no initiative.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::DuplicateCombatant` if a combatant for the
    /// same token is already present.
    pub fn add_combatant(
        &mut self,
        actor_ref: ActorRef,
        token_ref: TokenRef,
        name: impl Into<String>,
    ) -> Result<Uuid, EncounterError> {
        self.add_combatant_with(NewCombatant::new(actor_ref, token_ref, name))
    }

    /// Adds a combatant described by `new`.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::DuplicateCombatant` if a combatant for the
    /// same token is already present.
    pub fn add_combatant_with(&mut self, new: NewCombatant) -> Result<Uuid, EncounterError> {
        if self.combatant_by_token(&new.token_ref).is_some() {
            return Err(EncounterError::DuplicateCombatant(format!(
                "token {} is already in encounter {}",
                new.token_ref, self.id
            )));
        }

        let before = self.snapshot();
        let holder = self.current_id();

        let id = Uuid::new_v4();
        let mut combatant = Combatant::new(id, new.actor_ref, new.token_ref, new.name);
        combatant.hidden = new.hidden;
        combatant.player_owned = new.player_owned;

        self.record(EncounterEventKind::CombatantAdded(CombatantAdded {
            combatant_id: id,
            actor_ref: combatant.actor_ref.clone(),
            token_ref: combatant.token_ref.clone(),
            name: combatant.name.clone(),
        }));
        self.combatants.push(combatant);

        self.reorder_keeping_turn(holder);
        self.record_turn_if_moved(before);
        Ok(id)
    }

    /// Removes a combatant and returns it.
    ///
    /// If it held the turn, the next combatant in order takes it, wrapping to
    /// the first when the removed one was last.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::CombatantNotFound` if no such combatant exists.
    pub fn remove_combatant(&mut self, id: Uuid) -> Result<Combatant, EncounterError> {
        let index = self.index_of(id)?;
        let before = self.snapshot();
        let holder = self.current_id();

        let removed = self.combatants.remove(index);
        self.record(EncounterEventKind::CombatantRemoved(CombatantRemoved {
            combatant_id: id,
        }));

        self.reorder_keeping_turn(holder);
        self.record_turn_if_moved(before);
        Ok(removed)
    }

    /// Changes a combatant's name or flags.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::CombatantNotFound` if no such combatant exists.
    pub fn update_combatant(
        &mut self,
        id: Uuid,
        update: &CombatantUpdate,
    ) -> Result<(), EncounterError> {
        let index = self.index_of(id)?;
        if update.is_empty() {
            return Ok(());
        }

        let before = self.snapshot();
        let holder = self.current_id();

        let combatant = &mut self.combatants[index];
        update.apply_to(combatant);
        let change = CombatantUpdated {
            combatant_id: id,
            name: combatant.name.clone(),
            hidden: combatant.hidden,
            defeated: combatant.defeated,
            player_owned: combatant.player_owned,
        };
        self.record(EncounterEventKind::CombatantUpdated(change));

        self.reorder_keeping_turn(holder);
        self.record_turn_if_moved(before);
        Ok(())
    }

    // --- initiative ---

    /// Sets a combatant's initiative and recomputes the turn order. The
    /// combatant holding the turn keeps it at its new position.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::CombatantNotFound` if no such combatant exists,
    /// or `EncounterError::InvalidValue` if `value` is not finite.
    pub fn set_initiative(&mut self, id: Uuid, value: f64) -> Result<(), EncounterError> {
        let index = self.index_of(id)?;
        if !value.is_finite() {
            return Err(EncounterError::InvalidValue(format!(
                "initiative must be a finite number, got {value}"
            )));
        }
        self.assign_initiative(index, Some(value));
        Ok(())
    }

    /// Resets a combatant's initiative to unrolled.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::CombatantNotFound` if no such combatant exists.
    pub fn clear_initiative(&mut self, id: Uuid) -> Result<(), EncounterError> {
        let index = self.index_of(id)?;
        self.assign_initiative(index, None);
        Ok(())
    }

    fn assign_initiative(&mut self, index: usize, value: Option<f64>) {
        let before = self.snapshot();
        let holder = self.current_id();

        let combatant = &mut self.combatants[index];
        combatant.initiative = value;
        let combatant_id = combatant.id;
        self.record(EncounterEventKind::InitiativeChanged(InitiativeChanged {
            combatant_id,
            initiative: value,
        }));

        self.reorder_keeping_turn(holder);
        self.record_turn_if_moved(before);
    }

    /// Works out which rolls a request needs.
    ///
    /// Unknown ids go straight into the report as failures; combatants that
    /// already have initiative are skipped unless the request overwrites.
    #[must_use]
    pub fn plan_rolls(
        &self,
        request: &RollRequest,
        default_formula: &str,
    ) -> (Vec<PlannedRoll>, RollReport) {
        let formula = request.formula.as_deref().unwrap_or(default_formula);
        let mut planned = Vec::new();
        let mut report = RollReport::default();
        let mut seen = HashSet::new();

        for &id in &request.ids {
            if !seen.insert(id) {
                continue;
            }
            match self.combatant(id) {
                None => report.failed.push(RollFailure {
                    combatant_id: id,
                    error: RollError::UnknownCombatant(id),
                }),
                Some(combatant) if combatant.has_initiative() && !request.overwrite => {
                    report.skipped.push(id);
                }
                Some(combatant) => planned.push(PlannedRoll {
                    formula: formula.to_owned(),
                    context: combatant.roll_context(self.id),
                }),
            }
        }

        (planned, report)
    }

    /// Applies roll outcomes one by one, recording each in `report`.
    ///
    /// Unless `overwrite` is set, a combatant that gained initiative since the
    /// rolls were planned keeps it and is reported as skipped.
    pub fn apply_roll_outcomes(
        &mut self,
        outcomes: impl IntoIterator<Item = (Uuid, Result<f64, RollError>)>,
        overwrite: bool,
        report: &mut RollReport,
    ) {
        for (combatant_id, outcome) in outcomes {
            if !overwrite
                && self
                    .combatant(combatant_id)
                    .is_some_and(Combatant::has_initiative)
            {
                report.skipped.push(combatant_id);
                continue;
            }
            let applied = outcome.and_then(|value| {
                self.set_initiative(combatant_id, value)
                    .map(|()| value)
                    .map_err(|err| match err {
                        EncounterError::InvalidValue(_) => RollError::NonFinite,
                        _ => RollError::UnknownCombatant(combatant_id),
                    })
            });
            match applied {
                Ok(initiative) => report.succeeded.push(RolledInitiative {
                    combatant_id,
                    initiative,
                }),
                Err(error) => report.failed.push(RollFailure {
                    combatant_id,
                    error,
                }),
            }
        }
    }

    /// Rolls initiative with a synchronous roller. A failed roll is recorded
    /// in the report and does not stop the batch.
    pub fn roll_initiative<F>(
        &mut self,
        request: &RollRequest,
        default_formula: &str,
        mut roll: F,
    ) -> RollReport
    where
        F: FnMut(&str, &RollContext) -> Result<f64, RollError>,
    {
        let (planned, mut report) = self.plan_rolls(request, default_formula);
        let outcomes: Vec<_> = planned
            .iter()
            .map(|p| (p.context.combatant_id, roll(&p.formula, &p.context)))
            .collect();
        self.apply_roll_outcomes(outcomes, request.overwrite, &mut report);
        report
    }

    // --- turn order ---

    /// Recomputes the turn order from the current combatants.
    pub fn setup_turns(&mut self) -> &[Uuid] {
        self.turns = turn_order::order_indices(&self.combatants)
            .into_iter()
            .map(|index| self.combatants[index].id)
            .collect();
        &self.turns
    }

    /// Begins combat at round 1 on the first turn. That is turn 0 unless
    /// `skip_defeated` passes over defeated combatants at the top of the order.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::EmptyEncounter` if there are no combatants.
    pub fn start_combat(&mut self) -> Result<(), EncounterError> {
        if self.combatants.is_empty() {
            return Err(EncounterError::EmptyEncounter(self.id));
        }
        self.setup_turns();
        self.round = 1;
        self.turn = self.first_turn_of_round();
        let change = self.turn_changed();
        self.record(EncounterEventKind::CombatStarted(change));
        Ok(())
    }

    /// Advances to the next turn, moving into the next round past the end.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::NotStarted` if combat has not started.
    pub fn next_turn(&mut self) -> Result<(), EncounterError> {
        self.ensure_started()?;
        let before = self.snapshot();
        let len = self.turns.len();

        match (self.turn + 1..len).find(|&i| self.can_take_turn(i)) {
            Some(next) => self.turn = next,
            None => {
                self.round = self.round.saturating_add(1);
                self.turn = self.first_turn_of_round();
            }
        }

        self.record_turn_if_moved(before);
        Ok(())
    }

    /// Rewinds to the previous turn. At the first turn of round 1 this does
    /// nothing; at the first turn of a later round it goes to the last turn
    /// of the previous round.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::NotStarted` if combat has not started.
    pub fn previous_turn(&mut self) -> Result<(), EncounterError> {
        self.ensure_started()?;
        let before = self.snapshot();
        let len = self.turns.len();

        match (0..self.turn).rev().find(|&i| self.can_take_turn(i)) {
            Some(previous) => self.turn = previous,
            None if self.round <= 1 => {}
            None => {
                self.round -= 1;
                self.turn = (0..len)
                    .rev()
                    .find(|&i| self.can_take_turn(i))
                    .unwrap_or(len - 1);
            }
        }

        self.record_turn_if_moved(before);
        Ok(())
    }

    /// Moves to the first turn of the next round.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::EmptyEncounter` if there are no combatants.
    pub fn next_round(&mut self) -> Result<(), EncounterError> {
        if self.combatants.is_empty() {
            return Err(EncounterError::EmptyEncounter(self.id));
        }
        let before = self.snapshot();
        self.round = self.round.saturating_add(1);
        self.turn = self.first_turn_of_round();
        self.record_turn_if_moved(before);
        Ok(())
    }

    /// Moves to the first turn of the previous round; round 0 is the floor.
    pub fn previous_round(&mut self) {
        let before = self.snapshot();
        self.round = self.round.saturating_sub(1);
        self.turn = if self.round == 0 {
            0
        } else {
            self.first_turn_of_round()
        };
        self.record_turn_if_moved(before);
    }

    /// Ends combat: round and turn back to 0, encounter deactivated.
    /// Combatants are kept.
    pub fn end_combat(&mut self) {
        self.round = 0;
        self.turn = 0;
        self.record(EncounterEventKind::CombatEnded);
        self.set_active(false);
    }

    /// Flips the active flag; returns `true` if it changed.
    pub(crate) fn set_active(&mut self, active: bool) -> bool {
        if self.active == active {
            return false;
        }
        self.active = active;
        self.record(EncounterEventKind::ActivationChanged(ActivationChanged {
            active,
        }));
        true
    }

    // --- persisted shape ---

    /// Rebuilds an encounter from its persisted record.
    ///
    /// # Errors
    ///
    /// Returns `EncounterError::DuplicateCombatant` if two combatants share an
    /// id or a token, and `EncounterError::InvalidValue` if an initiative is
    /// not finite or the round/turn pair does not fit the combatant list.
    pub fn from_record(record: EncounterRecord) -> Result<Self, EncounterError> {
        let mut ids = HashSet::new();
        let mut tokens = HashSet::new();
        for combatant in &record.combatants {
            if !ids.insert(combatant.id) {
                return Err(EncounterError::DuplicateCombatant(format!(
                    "combatant id {} appears twice",
                    combatant.id
                )));
            }
            if !tokens.insert(&combatant.token_ref) {
                return Err(EncounterError::DuplicateCombatant(format!(
                    "token {} is already in encounter {}",
                    combatant.token_ref, record.id
                )));
            }
            if combatant.initiative.is_some_and(|v| !v.is_finite()) {
                return Err(EncounterError::InvalidValue(format!(
                    "combatant {} has a non-finite initiative",
                    combatant.id
                )));
            }
        }
        if record.round == 0 && record.turn != 0 {
            return Err(EncounterError::InvalidValue(format!(
                "turn {} set before combat started",
                record.turn
            )));
        }
        if record.round > 0 && record.turn >= record.combatants.len() {
            return Err(EncounterError::InvalidValue(format!(
                "turn {} out of range for {} combatants",
                record.turn,
                record.combatants.len()
            )));
        }

        let combatants = record
            .combatants
            .into_iter()
            .map(|c| Combatant {
                id: c.id,
                actor_ref: c.actor_ref,
                token_ref: c.token_ref,
                name: c.name,
                initiative: c.initiative,
                hidden: c.hidden,
                defeated: c.defeated,
                player_owned: c.player_owned,
            })
            .collect();

        let mut encounter = Self::new(record.id, record.scene_ref);
        encounter.round = record.round;
        encounter.turn = record.turn;
        encounter.active = record.active;
        encounter.combatants = combatants;
        encounter.setup_turns();
        Ok(encounter)
    }

    /// Returns the persisted record of this encounter.
    #[must_use]
    pub fn to_record(&self) -> EncounterRecord {
        EncounterRecord {
            id: self.id,
            scene_ref: self.scene_ref.clone(),
            round: self.round,
            turn: self.turn,
            active: self.active,
            combatants: self
                .combatants
                .iter()
                .map(|c| CombatantRecord {
                    id: c.id,
                    actor_ref: c.actor_ref.clone(),
                    token_ref: c.token_ref.clone(),
                    name: c.name.clone(),
                    initiative: c.initiative,
                    hidden: c.hidden,
                    defeated: c.defeated,
                    player_owned: c.player_owned,
                })
                .collect(),
        }
    }

    // --- internals ---

    fn index_of(&self, id: Uuid) -> Result<usize, EncounterError> {
        self.combatants
            .iter()
            .position(|c| c.id == id)
            .ok_or(EncounterError::CombatantNotFound(id))
    }

    fn current_id(&self) -> Option<Uuid> {
        if self.round == 0 {
            return None;
        }
        self.turns.get(self.turn).copied()
    }

    fn ensure_started(&self) -> Result<(), EncounterError> {
        if self.is_started() {
            Ok(())
        } else {
            Err(EncounterError::NotStarted(self.id))
        }
    }

    fn can_take_turn(&self, index: usize) -> bool {
        !self.skip_defeated
            || self
                .turns
                .get(index)
                .and_then(|id| self.combatant(*id))
                .is_some_and(|c| !c.defeated)
    }

    fn first_turn_of_round(&self) -> usize {
        (0..self.turns.len())
            .find(|&i| self.can_take_turn(i))
            .unwrap_or(0)
    }

    /// Recomputes the order and points `turn` back at `holder`. When the
    /// holder is gone the slot passes to whoever now occupies it.
    fn reorder_keeping_turn(&mut self, holder: Option<Uuid>) {
        self.setup_turns();
        if self.turns.is_empty() {
            self.round = 0;
            self.turn = 0;
            return;
        }
        if self.round == 0 {
            self.turn = 0;
            return;
        }
        match holder.and_then(|id| self.turns.iter().position(|t| *t == id)) {
            Some(index) => self.turn = index,
            None if self.turn >= self.turns.len() => self.turn = 0,
            None => {}
        }
    }

    fn turn_changed(&self) -> TurnChanged {
        TurnChanged {
            round: self.round,
            turn: self.turn,
            combatant_id: self.current_id(),
        }
    }

    fn record_turn_if_moved(&mut self, before: TurnSnapshot) {
        if self.snapshot() != before {
            let change = self.turn_changed();
            self.record(EncounterEventKind::TurnChanged(change));
        }
    }

    fn record(&mut self, change: EncounterEventKind) {
        self.version += 1;
        self.uncommitted_changes.push(change);
    }
}

impl AggregateRoot for Encounter {
    type Change = EncounterEventKind;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn uncommitted_changes(&self) -> &[Self::Change] {
        &self.uncommitted_changes
    }

    fn take_uncommitted_changes(&mut self) -> Vec<Self::Change> {
        std::mem::take(&mut self.uncommitted_changes)
    }
}
