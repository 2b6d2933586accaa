use std::any::Any;

use tracing::trace;

use super::{Graph, InletOwner, OutletOwner};
use crate::{
    map::{KeyEffect, Recorded},
    port::{InletId, MapOutlet, OutletId},
    streamlet::StreamletId,
};

impl Graph {
    /// Marks a streamlet and everything downstream of it as stale.
    ///
    /// Does nothing if the streamlet is already invalid.
    pub fn invalidate(&mut self, id: impl Into<StreamletId>) {
        self.invalidate_streamlet(id.into().0);
    }
    pub fn invalidate_outlet(&mut self, id: OutletId) {
        self.invalidate_outlet_raw(id.0);
    }
    pub fn invalidate_inlet(&mut self, id: InletId) {
        self.invalidate_inlet_raw(id.0);
    }

    /// Records `effect` for `key` on a map outlet and forwards it downstream.
    ///
    /// The owner of the outlet becomes invalid. Its other map outlets are left untouched.
    pub fn invalidate_output_key<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        outlet: MapOutlet<K, V>,
        key: &K,
        effect: KeyEffect,
    ) {
        let o = outlet.id().0;
        self.invalidate_outlet_key_raw(o, key, effect);
        if let Some(OutletOwner::Streamlet(s)) = self.outlets.get(o).map(|node| node.owner) {
            self.invalidate_streamlet_keyed(s, None);
        }
    }

    /// Marks a streamlet invalid and runs its invalidate hooks.
    ///
    /// Returns `false` if it was already invalid.
    fn begin_invalidate(&mut self, s: usize) -> bool {
        let Some(node) = self.streamlets.get_mut(s) else {
            return false;
        };
        if node.version.is_none() {
            return false;
        }
        trace!(streamlet = node.registry.streamlet(), id = s, "invalidate");
        match node.streamlet.as_mut() {
            Some(streamlet) => {
                streamlet.will_invalidate();
                node.version = None;
                streamlet.on_invalidate();
            }
            None => node.version = None,
        }
        true
    }
    fn end_invalidate(&mut self, s: usize) {
        if let Some(streamlet) = self
            .streamlets
            .get_mut(s)
            .and_then(|node| node.streamlet.as_mut())
        {
            streamlet.did_invalidate();
        }
    }

    pub(crate) fn invalidate_streamlet(&mut self, s: usize) {
        if !self.begin_invalidate(s) {
            return;
        }
        for o in self.owned_outlets(s) {
            self.invalidate_outlet_raw(o);
        }
        self.end_invalidate(s);
    }

    /// Invalidation reaching a streamlet through one key of a map inlet.
    ///
    /// The key is forwarded to every map outlet. Value outlets are invalidated as a whole.
    fn invalidate_streamlet_keyed(&mut self, s: usize, key: Option<(&dyn Any, KeyEffect)>) {
        let transitioned = self.begin_invalidate(s);
        if key.is_some() {
            self.materialize_map_outlets(s);
        }
        for o in self.owned_outlets(s) {
            let is_map = self.outlets.get(o).is_some_and(|node| node.cell.is_some());
            if is_map {
                if let Some((key, effect)) = key {
                    self.invalidate_outlet_key_raw(o, key, effect);
                }
            } else if transitioned {
                self.invalidate_outlet_raw(o);
            }
        }
        if transitioned {
            self.end_invalidate(s);
        }
    }

    pub(crate) fn invalidate_outlet_raw(&mut self, o: usize) {
        let Some(node) = self.outlets.get_mut(o) else {
            return;
        };
        if let Some(cell) = &node.cell {
            // every held or pending key becomes an `Update`
            let keys = cell.keys();
            let key_outlets = cell.key_outlets();
            node.version = None;
            for key in keys {
                self.invalidate_outlet_key_raw(o, &*key, KeyEffect::Update);
            }
            for key_outlet in key_outlets {
                self.invalidate_outlet_raw(key_outlet);
            }
            return;
        }
        if node.version.is_none() {
            return;
        }
        node.version = None;
        trace!(outlet = o, "invalidate outlet");
        let outputs: Vec<usize> = node.outputs.iter().copied().collect();
        for i in outputs {
            self.invalidate_inlet_raw(i);
        }
    }

    pub(crate) fn invalidate_outlet_key_raw(&mut self, o: usize, key: &dyn Any, effect: KeyEffect) {
        let Some(node) = self.outlets.get_mut(o) else {
            return;
        };
        let Some(cell) = node.cell.as_mut() else {
            self.invalidate_outlet_raw(o);
            return;
        };
        match cell.record(key, effect) {
            Recorded::Changed => {}
            Recorded::Unchanged => return,
            Recorded::Foreign => {
                self.invalidate_outlet_raw(o);
                return;
            }
        }
        let key_outlet = cell.key_outlet(key);
        node.version = None;
        trace!(outlet = o, %effect, "invalidate key");
        let outputs: Vec<usize> = node.outputs.iter().copied().collect();
        if let Some(key_outlet) = key_outlet {
            self.invalidate_outlet_raw(key_outlet);
        }
        for i in outputs {
            self.invalidate_inlet_key_raw(i, key, effect);
        }
    }

    pub(crate) fn invalidate_inlet_raw(&mut self, i: usize) {
        let Some(node) = self.inlets.get(i) else {
            return;
        };
        if node.version.is_none() {
            return;
        }
        self.invalidate_inlet_owner(i);
    }

    /// Marks an inlet invalid and invalidates its owner even if the inlet already was.
    pub(crate) fn invalidate_inlet_owner(&mut self, i: usize) {
        let Some(node) = self.inlets.get_mut(i) else {
            return;
        };
        node.version = None;
        match node.owner {
            InletOwner::Streamlet(s) => self.invalidate_streamlet(s),
            InletOwner::Through(o) => self.invalidate_outlet_raw(o),
        }
    }

    pub(crate) fn invalidate_inlet_key_raw(&mut self, i: usize, key: &dyn Any, effect: KeyEffect) {
        let Some(node) = self.inlets.get_mut(i) else {
            return;
        };
        let Some(effects) = node.effects.as_mut() else {
            self.invalidate_inlet_raw(i);
            return;
        };
        match effects.record(key, effect) {
            Recorded::Changed => {}
            Recorded::Unchanged => return,
            Recorded::Foreign => {
                self.invalidate_inlet_owner(i);
                return;
            }
        }
        node.version = None;
        match node.owner {
            InletOwner::Streamlet(s) => self.invalidate_streamlet_keyed(s, Some((key, effect))),
            InletOwner::Through(o) => self.invalidate_outlet_key_raw(o, key, effect),
        }
    }
}
