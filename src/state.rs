use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::relay::CompletionRelay;
use crate::store::SettingsStore;

pub struct ActiveGeneration {
    pub stream_id: Uuid,
    pub cancel: CancellationToken,
}

// Tauri state
#[derive(Clone)]
pub struct GlobalState {
    pub settings: Arc<Mutex<SettingsStore>>,
    pub relay: Arc<CompletionRelay>,
    // keyed by database name; doubles as the overlapping-request guard
    pub active_generations: Arc<DashMap<String, ActiveGeneration>>,
}

pub fn create_global_state(settings: SettingsStore) -> GlobalState {
    GlobalState {
        settings: Arc::new(Mutex::new(settings)),
        relay: Arc::new(CompletionRelay::new()),
        active_generations: Arc::new(DashMap::new()),
    }
}

impl GlobalState {
    /// Claim the generation slot for a database. Check and insert go through
    /// one entry so two concurrent claims cannot both win; the loser sees the
    /// occupied slot.
    pub fn try_begin_generation(&self, database: &str) -> Option<(Uuid, CancellationToken)> {
        match self.active_generations.entry(database.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let stream_id = Uuid::new_v4();
                let cancel = CancellationToken::new();
                slot.insert(ActiveGeneration {
                    stream_id,
                    cancel: cancel.clone(),
                });
                Some((stream_id, cancel))
            }
        }
    }

    pub fn finish_generation(&self, database: &str) {
        self.active_generations.remove(database);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn global_state(dir: &TempDir) -> GlobalState {
        create_global_state(SettingsStore::load(dir.path().join("settings.json")))
    }

    #[test]
    fn second_claim_for_the_same_database_is_refused() {
        let dir = TempDir::new().unwrap();
        let state = global_state(&dir);

        let first = state.try_begin_generation("shop");
        assert!(first.is_some());
        assert!(state.try_begin_generation("shop").is_none());
        // the winner's cancel handle stays reachable through the map
        let (stream_id, _cancel) = first.unwrap();
        assert_eq!(
            state.active_generations.get("shop").unwrap().stream_id,
            stream_id
        );

        // other databases are independent
        assert!(state.try_begin_generation("warehouse").is_some());

        state.finish_generation("shop");
        assert!(state.try_begin_generation("shop").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_admit_exactly_one_generation() {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(global_state(&dir));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                state.try_begin_generation("shop").is_some()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(state.active_generations.len(), 1);
    }
}
