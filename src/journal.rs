// 15.0: key-level undo journal behind every ledger map.
// a transition opens a level; the first write to a key inside that level
// records the key's prior value. discard replays the records backwards,
// commit folds them into the parent level or drops them at the outermost one.
// reads go straight to the inner BTreeMap through Deref.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;

#[derive(Debug, Clone)]
struct Level<K> {
    /// undo length when the level opened
    mark: usize,
    touched: BTreeSet<K>,
}

/** 15.1: ordered map that can roll back the writes of an open level */
#[derive(Debug, Clone)]
pub struct Journaled<K, V> {
    map: BTreeMap<K, V>,
    undo: Vec<(K, Option<V>)>,
    levels: Vec<Level<K>>,
}

impl<K, V> Default for Journaled<K, V> {
    fn default() -> Self {
        Self {
            map: BTreeMap::new(),
            undo: Vec::new(),
            levels: Vec::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> Journaled<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open levels. Writes are only recorded while this is non-zero.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn begin(&mut self) {
        self.levels.push(Level {
            mark: self.undo.len(),
            touched: BTreeSet::new(),
        });
    }

    pub fn commit(&mut self) {
        let Some(level) = self.levels.pop() else { return };
        match self.levels.last_mut() {
            Some(parent) => parent.touched.extend(level.touched),
            None => self.undo.clear(),
        }
    }

    pub fn discard(&mut self) {
        let Some(level) = self.levels.pop() else { return };
        while self.undo.len() > level.mark {
            let Some((key, prior)) = self.undo.pop() else { break };
            match prior {
                Some(value) => {
                    self.map.insert(key, value);
                }
                None => {
                    self.map.remove(&key);
                }
            }
        }
    }

    // 15.2: first touch per level keeps the value the level started from
    fn record(&mut self, key: &K) {
        let Some(level) = self.levels.last_mut() else { return };
        if level.touched.insert(key.clone()) {
            self.undo.push((key.clone(), self.map.get(key).cloned()));
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.map.contains_key(key) {
            return None;
        }
        self.record(key);
        self.map.get_mut(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.record(&key);
        self.map.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.map.contains_key(key) {
            return None;
        }
        self.record(key);
        self.map.remove(key)
    }

    pub fn entry_or_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        self.record(&key);
        self.map.entry(key).or_default()
    }

    /// Drops every entry `keep` rejects, recording each removal.
    pub fn retain(&mut self, keep: impl Fn(&K, &V) -> bool) {
        let gone: Vec<K> = self
            .map
            .iter()
            .filter(|(k, v)| !keep(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in gone {
            self.remove(&key);
        }
    }

    pub fn into_inner(self) -> BTreeMap<K, V> {
        self.map
    }
}

impl<K, V> Deref for Journaled<K, V> {
    type Target = BTreeMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

impl<K, V> From<BTreeMap<K, V>> for Journaled<K, V> {
    fn from(map: BTreeMap<K, V>) -> Self {
        Self {
            map,
            undo: Vec::new(),
            levels: Vec::new(),
        }
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for Journaled<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl<K: Eq, V: Eq> Eq for Journaled<K, V> {}

impl<K: Serialize, V: Serialize> Serialize for Journaled<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.map.serialize(serializer)
    }
}

impl<'de, K, V> Deserialize<'de> for Journaled<K, V>
where
    K: Ord + Deserialize<'de>,
    V: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Journaled<u32, &'static str> {
        let mut map = Journaled::new();
        map.insert(1, "one");
        map.insert(2, "two");
        map
    }

    #[test]
    fn writes_outside_a_level_are_not_recorded() {
        let mut map = seeded();
        map.discard();
        assert_eq!(map.len(), 2);
        assert!(map.undo.is_empty());
    }

    #[test]
    fn discard_restores_inserts_updates_and_removals() {
        let mut map = seeded();
        map.begin();
        map.insert(3, "three");
        if let Some(v) = map.get_mut(&1) {
            *v = "uno";
        }
        map.remove(&2);
        map.insert(2, "dos");
        map.discard();

        assert_eq!(map.get(&1), Some(&"one"));
        assert_eq!(map.get(&2), Some(&"two"));
        assert!(map.get(&3).is_none());
        assert_eq!(map.depth(), 0);
    }

    #[test]
    fn only_the_first_touch_is_recorded() {
        let mut map = seeded();
        map.begin();
        for word in ["a", "b", "c"] {
            map.insert(1, word);
        }
        assert_eq!(map.undo.len(), 1);
        map.commit();
        assert!(map.undo.is_empty());
        assert_eq!(map.get(&1), Some(&"c"));
    }

    #[test]
    fn inner_discard_keeps_outer_writes() {
        let mut map = seeded();
        map.begin();
        map.insert(1, "outer");
        map.begin();
        map.insert(1, "inner");
        map.insert(5, "five");
        map.discard();

        assert_eq!(map.get(&1), Some(&"outer"));
        assert!(map.get(&5).is_none());
        map.commit();
        assert_eq!(map.get(&1), Some(&"outer"));
    }

    #[test]
    fn inner_commit_rolls_back_with_the_outer_level() {
        let mut map = seeded();
        map.begin();
        map.begin();
        map.insert(2, "inner");
        map.commit();
        map.insert(2, "outer again");
        map.discard();
        assert_eq!(map.get(&2), Some(&"two"));
        assert!(map.undo.is_empty());
    }

    #[test]
    fn retain_records_each_removal() {
        let mut map = seeded();
        map.begin();
        map.retain(|k, _| *k != 2);
        assert_eq!(map.len(), 1);
        map.discard();
        assert_eq!(map.len(), 2);
    }
}
