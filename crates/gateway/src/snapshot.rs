//! Read-mostly configuration snapshots.
//!
//! Readers grab an `Arc` to the current snapshot and keep working on it
//! for the whole request; writers build a new snapshot and swap the
//! pointer. Nobody ever observes a half-applied edit.

use std::sync::{Arc, RwLock};

use config::Config;

/// Holder of the current configuration snapshot.
pub struct ConfigStore {
    current: RwLock<Arc<Config>>,
}

impl ConfigStore {
    /// Create a store over the initial configuration.
    pub fn new(config: Config) -> Self {
        ConfigStore {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// The current snapshot. Cheap; clones a pointer.
    pub fn current(&self) -> Arc<Config> {
        self.current.read().expect("config store lock").clone()
    }

    /// Apply an edit on a copy of the current snapshot and swap it in.
    pub fn update(&self, edit: impl FnOnce(&mut Config)) {
        let mut guard = self.current.write().expect("config store lock");

        let mut next = (**guard).clone();
        edit(&mut next);

        *guard = Arc::new(next);
    }

    /// Replace the snapshot wholesale (hot reload).
    pub fn replace(&self, config: Config) {
        *self.current.write().expect("config store lock") = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_keep_their_snapshot_across_updates() {
        let store = ConfigStore::new(Config::default());

        let before = store.current();
        assert!(before.providers.is_empty());

        store.update(|config| {
            config.providers.push(
                serde_json::from_value(serde_json::json!({
                    "uuid": uuid::Uuid::new_v4(),
                    "name": "added",
                    "dialect": "openai",
                    "api_base": "https://api.example/v1",
                    "credential": { "api_key": "k" },
                }))
                .unwrap(),
            );
        });

        // The old snapshot is unchanged; the new one sees the edit.
        assert!(before.providers.is_empty());
        assert_eq!(store.current().providers.len(), 1);
    }
}
