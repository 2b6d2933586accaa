use std::{
    any::Any,
    collections::BTreeMap,
    mem::take,
    rc::Rc,
};

use im::OrdMap;
use parse_display::Display;
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

/// Value held by a map-valued port.
///
/// Entries are `Rc`s so that an entry untouched by a reconcile keeps its identity
/// across versions.
pub type MapValue<K, V> = OrdMap<K, Rc<V>>;

/// Per-key delta recorded on map-valued ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display(style = "snake_case")]
pub enum KeyEffect {
    /// The value at the key must be fetched again from upstream.
    Update,
    /// The key must be removed.
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recorded {
    Changed,
    Unchanged,
    Foreign,
}

/// Pending effects, at most one per key. The last record for a key wins.
#[derive(Debug)]
pub(crate) struct Effects<K>(BTreeMap<K, KeyEffect>);

impl<K: Ord + Clone> Effects<K> {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }
    pub fn record(&mut self, key: &K, effect: KeyEffect) -> Recorded {
        if self.0.get(key) == Some(&effect) {
            return Recorded::Unchanged;
        }
        self.0.insert(key.clone(), effect);
        Recorded::Changed
    }
    pub fn get(&self, key: &K) -> Option<KeyEffect> {
        self.0.get(key).copied()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.0.keys()
    }
    pub fn take(&mut self) -> Vec<(K, KeyEffect)> {
        take(&mut self.0).into_iter().collect()
    }
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Type-erased view of the effects received by a map inlet.
pub(crate) trait KeyLedger {
    fn record(&mut self, key: &dyn Any, effect: KeyEffect) -> Recorded;
    fn clear(&mut self);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<K: Ord + Clone + 'static> KeyLedger for Effects<K> {
    fn record(&mut self, key: &dyn Any, effect: KeyEffect) -> Recorded {
        match key.downcast_ref::<K>() {
            Some(key) => Effects::record(self, key, effect),
            None => Recorded::Foreign,
        }
    }
    fn clear(&mut self) {
        Effects::clear(self)
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) fn new_key_ledger<K: Ord + Clone + 'static>() -> Box<dyn KeyLedger> {
    Box::new(Effects::<K>::new())
}

/// State of a map outlet: the persistent map, the effects waiting to be applied
/// and the outlets projecting single keys.
pub(crate) struct MapState<K, V> {
    pub map: MapValue<K, V>,
    pub pending: Effects<K>,
    pub key_outlets: BTreeMap<K, usize>,
}

impl<K: Ord + Clone, V> MapState<K, V> {
    pub fn new() -> Self {
        Self {
            map: OrdMap::new(),
            pending: Effects::new(),
            key_outlets: BTreeMap::new(),
        }
    }

    /// Stores a fresh value for `key`, or removes the key when `value` is `None`.
    ///
    /// Returns `true` if the map changed.
    pub fn apply(&mut self, key: &K, value: Option<Rc<V>>) -> bool {
        match value {
            Some(value) => {
                if self.map.get(key).is_some_and(|old| Rc::ptr_eq(old, &value)) {
                    return false;
                }
                self.map.insert(key.clone(), value);
                true
            }
            None => self.map.remove(key).is_some(),
        }
    }
}

/// Type-erased view of [`MapState`] used by the propagation protocol.
pub(crate) trait MapCell {
    fn record(&mut self, key: &dyn Any, effect: KeyEffect) -> Recorded;
    /// Keys that are held or pending.
    fn keys(&self) -> Vec<Box<dyn Any>>;
    fn key_outlet(&self, key: &dyn Any) -> Option<usize>;
    fn key_outlets(&self) -> Vec<usize>;
    /// Forgets `key_outlet` if its key is neither held nor pending an `Update`.
    fn release_key_outlet(&mut self, key_outlet: usize) -> bool;
    fn pending_len(&self) -> usize;
    fn clear_pending(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<K: Ord + Clone + 'static, V: 'static> MapCell for MapState<K, V> {
    fn record(&mut self, key: &dyn Any, effect: KeyEffect) -> Recorded {
        match key.downcast_ref::<K>() {
            Some(key) => self.pending.record(key, effect),
            None => Recorded::Foreign,
        }
    }
    fn keys(&self) -> Vec<Box<dyn Any>> {
        let mut keys: Vec<Box<dyn Any>> = Vec::with_capacity(self.map.len());
        for key in self.map.keys() {
            keys.push(Box::new(key.clone()));
        }
        for key in self.pending.keys() {
            if !self.map.contains_key(key) {
                keys.push(Box::new(key.clone()));
            }
        }
        keys
    }
    fn key_outlet(&self, key: &dyn Any) -> Option<usize> {
        self.key_outlets.get(key.downcast_ref::<K>()?).copied()
    }
    fn key_outlets(&self) -> Vec<usize> {
        self.key_outlets.values().copied().collect()
    }
    fn release_key_outlet(&mut self, key_outlet: usize) -> bool {
        let Some(key) = self
            .key_outlets
            .iter()
            .find(|&(_, &o)| o == key_outlet)
            .map(|(key, _)| key.clone())
        else {
            return false;
        };
        if self.map.contains_key(&key) || self.pending.get(&key) == Some(KeyEffect::Update) {
            return false;
        }
        self.key_outlets.remove(&key);
        true
    }
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
    fn clear_pending(&mut self) {
        self.pending.clear();
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) fn new_map_cell<K: Ord + Clone + 'static, V: 'static>() -> Box<dyn MapCell> {
    Box::new(MapState::<K, V>::new())
}
