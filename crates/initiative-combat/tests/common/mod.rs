//! Shared test helpers for combat integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use initiative_combat::application::store::EncounterStore;
use initiative_combat::config::CombatSettings;
use initiative_core::clock::Clock;
use initiative_core::refs::{ActorRef, SceneRef, TokenRef};
use initiative_test_support::FixedClock;
use uuid::Uuid;

/// Fixed timestamp used across all integration tests.
pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    ))
}

/// A store with default settings and no persistence.
pub fn build_store() -> EncounterStore {
    build_store_with(CombatSettings::default())
}

/// A store with custom settings and no persistence.
pub fn build_store_with(settings: CombatSettings) -> EncounterStore {
    initiative_test_support::init_tracing();
    EncounterStore::new(settings, fixed_clock())
}

/// Adds a combatant named `name` whose refs derive from the name.
pub async fn add_named(store: &EncounterStore, encounter_id: Uuid, name: &str) -> Uuid {
    let name = name.to_owned();
    store
        .update(encounter_id, move |e| {
            e.add_combatant(
                ActorRef::new(format!("actor-{name}")),
                TokenRef::new(format!("token-{name}")),
                name,
            )
        })
        .await
        .unwrap()
}

/// Creates an encounter in `scene` holding the named combatants.
pub async fn encounter_with(store: &EncounterStore, scene: &str, names: &[&str]) -> (Uuid, Vec<Uuid>) {
    let id = store.create_encounter(SceneRef::new(scene)).await.unwrap();
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        ids.push(add_named(store, id, name).await);
    }
    (id, ids)
}
