//! Asset Selection
//!
//! Picks one concrete clip out of a candidate pool. Persona clips (entry,
//! exit, ambient override) are always drawn uniformly at random so repeated
//! activations of the same persona vary. The ambient and overlay pools can
//! instead cycle sequentially.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::persona::{AssetRef, ClipRole, Persona};

/// How a perpetual pool advances on each loop restart
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Uniform random pick each time
    #[default]
    Random,
    /// Walk the pool in order, wrapping around
    Sequential,
}

/// Clip picker with its own RNG and per-pool cursors
#[derive(Debug)]
pub struct AssetSelector {
    rng: StdRng,
    cursors: HashMap<String, usize>,
}

impl Default for AssetSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetSelector {
    /// Selector seeded from OS entropy
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            cursors: HashMap::new(),
        }
    }

    /// Deterministic selector (tests, reproducible demos)
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            cursors: HashMap::new(),
        }
    }

    /// Uniform random pick; `None` for an empty pool
    pub fn pick(&mut self, pool: &[AssetRef]) -> Option<AssetRef> {
        pool.choose(&mut self.rng).cloned()
    }

    /// Next clip of a named pool in order
    pub fn next_in_sequence(&mut self, pool_key: &str, pool: &[AssetRef]) -> Option<AssetRef> {
        if pool.is_empty() {
            return None;
        }
        let cursor = self.cursors.entry(pool_key.to_string()).or_insert(0);
        let asset = pool[*cursor % pool.len()].clone();
        *cursor = (*cursor + 1) % pool.len();
        Some(asset)
    }

    /// Pick a persona clip for a role
    pub fn select(&mut self, persona: &Persona, role: ClipRole) -> Option<AssetRef> {
        self.pick(persona.clips(role))
    }

    /// Pick from a perpetual pool according to a policy
    pub fn select_with_policy(
        &mut self,
        pool_key: &str,
        pool: &[AssetRef],
        policy: SelectionPolicy,
    ) -> Option<AssetRef> {
        match policy {
            SelectionPolicy::Random => self.pick(pool),
            SelectionPolicy::Sequential => self.next_in_sequence(pool_key, pool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pool(names: &[&str]) -> Vec<AssetRef> {
        names.iter().map(|n| AssetRef::from(*n)).collect()
    }

    #[test]
    fn test_empty_pool_selects_nothing() {
        let mut selector = AssetSelector::seeded(1);
        assert!(selector.pick(&[]).is_none());
        assert!(selector.next_in_sequence("ambient", &[]).is_none());
    }

    #[test]
    fn test_random_pick_stays_in_pool() {
        let candidates = pool(&["a.mp4", "b.mp4", "c.mp4"]);
        let mut selector = AssetSelector::seeded(7);
        for _ in 0..50 {
            let picked = selector.pick(&candidates).unwrap();
            assert!(candidates.contains(&picked));
        }
    }

    #[test]
    fn test_random_pick_varies() {
        let candidates = pool(&["a.mp4", "b.mp4", "c.mp4"]);
        let mut selector = AssetSelector::seeded(42);
        let seen: HashSet<_> = (0..100).filter_map(|_| selector.pick(&candidates)).collect();
        assert!(seen.len() > 1, "repeated picks should not always match");
    }

    #[test]
    fn test_sequential_wraps() {
        let candidates = pool(&["a.mp4", "b.mp4"]);
        let mut selector = AssetSelector::seeded(0);
        let picks: Vec<_> = (0..5)
            .filter_map(|_| {
                selector.select_with_policy("ambient", &candidates, SelectionPolicy::Sequential)
            })
            .map(|a| a.0)
            .collect();
        assert_eq!(picks, vec!["a.mp4", "b.mp4", "a.mp4", "b.mp4", "a.mp4"]);
    }

    #[test]
    fn test_sequential_cursors_are_per_pool() {
        let top = pool(&["t1", "t2"]);
        let bottom = pool(&["b1", "b2"]);
        let mut selector = AssetSelector::seeded(0);
        assert_eq!(selector.next_in_sequence("top", &top).unwrap().0, "t1");
        assert_eq!(selector.next_in_sequence("bottom", &bottom).unwrap().0, "b1");
        assert_eq!(selector.next_in_sequence("top", &top).unwrap().0, "t2");
    }

    #[test]
    fn test_select_by_role() {
        let persona = Persona::new("mabel", "cred", vec!["...".into()])
            .with_entry_clips(["mabel_in.mp4"]);
        let mut selector = AssetSelector::seeded(3);
        assert_eq!(
            selector.select(&persona, ClipRole::Entry),
            Some(AssetRef::from("mabel_in.mp4"))
        );
        assert_eq!(selector.select(&persona, ClipRole::Exit), None);
    }
}
