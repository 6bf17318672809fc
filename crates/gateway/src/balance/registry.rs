//! Process-wide round-robin cursor registry.
//!
//! Tactics stay stateless objects; their rotation state lives here, keyed
//! by rule UUID, so re-instantiating a tactic after a config edit resumes
//! where the previous instance left off.

use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    position: usize,
    streak_used: u32,
}

/// Keyed registry of round-robin cursors.
#[derive(Debug, Default)]
pub struct RoundRobinRegistry {
    cursors: DashMap<Uuid, Cursor>,
}

impl RoundRobinRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index to use for this call and advance the cursor.
    ///
    /// With a streak of `n`, the same index is returned `n` times before
    /// rotating. The position is reduced modulo the current healthy-set
    /// size, so a shrinking set never indexes out of bounds.
    pub fn next_index(&self, key: Uuid, modulus: usize, streak: u32) -> usize {
        debug_assert!(modulus > 0);

        let streak = streak.max(1);
        let mut cursor = self.cursors.entry(key).or_default();

        let index = cursor.position % modulus;

        cursor.streak_used += 1;
        if cursor.streak_used >= streak {
            cursor.position = (index + 1) % modulus;
            cursor.streak_used = 0;
        }

        index
    }

    /// Forget the cursor of one rule.
    pub fn reset(&self, key: Uuid) {
        self.cursors.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_through_all_indexes() {
        let registry = RoundRobinRegistry::new();
        let key = Uuid::new_v4();

        let picks: Vec<usize> = (0..6).map(|_| registry.next_index(key, 3, 1)).collect();
        assert_eq!(picks, [0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn streak_repeats_each_index() {
        let registry = RoundRobinRegistry::new();
        let key = Uuid::new_v4();

        let picks: Vec<usize> = (0..6).map(|_| registry.next_index(key, 2, 3)).collect();
        assert_eq!(picks, [0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn modulus_shrink_keeps_index_in_bounds() {
        let registry = RoundRobinRegistry::new();
        let key = Uuid::new_v4();

        registry.next_index(key, 5, 1);
        registry.next_index(key, 5, 1);
        registry.next_index(key, 5, 1);

        // The healthy set shrank from 5 to 2.
        assert!(registry.next_index(key, 2, 1) < 2);
    }

    #[test]
    fn keys_are_independent() {
        let registry = RoundRobinRegistry::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(registry.next_index(first, 3, 1), 0);
        assert_eq!(registry.next_index(second, 3, 1), 0);
        assert_eq!(registry.next_index(first, 3, 1), 1);
    }
}
