use tracing::debug;

use super::{Graph, InletOwner, OutletOwner};
use crate::{
    port::{InletId, Inoutlet, OutletId},
    streamlet::{Handle, Streamlet, StreamletId},
};

impl Graph {
    /// Unbinds every inlet of a streamlet.
    ///
    /// An upstream node left with no bound outlet is disconnected from its own inputs in turn.
    pub fn disconnect_inputs(&mut self, id: impl Into<StreamletId>) {
        self.disconnect_streamlet_inputs(id.into().0);
    }
    /// Unbinds every outlet of a streamlet.
    ///
    /// A downstream node left with no bound inlet is disconnected from its own outputs in turn.
    pub fn disconnect_outputs(&mut self, id: impl Into<StreamletId>) {
        self.disconnect_streamlet_outputs(id.into().0);
    }
    pub fn disconnect_inlet_inputs(&mut self, id: InletId) {
        self.disconnect_inlet_raw(id.0);
    }
    pub fn disconnect_outlet_outputs(&mut self, id: OutletId) {
        self.disconnect_outlet_raw(id.0);
    }

    /// Removes a streamlet and its ports, unbinding every edge touching them.
    ///
    /// Returns `None` if the streamlet no longer exists.
    pub fn remove<S: Streamlet>(&mut self, handle: Handle<S>) -> Option<S> {
        let s = handle.id().0;
        if self.streamlets.get(s)?.streamlet.is_none() {
            return None;
        }
        let node = self.streamlets.remove(s)?;
        debug!(graph = %self.config.name, streamlet = node.registry.streamlet(), id = s, "remove");
        for &i in node.inlets.values() {
            self.unbind_inlet(i);
            self.inlets.remove(i);
        }
        for &o in node.outlets.values() {
            self.remove_outlet(o);
        }
        let streamlet = node.streamlet?.into_any().downcast::<S>().ok()?;
        Some(*streamlet)
    }

    /// Removes a port pair created by [`inoutlet`](Self::inoutlet).
    pub fn remove_inoutlet<T>(&mut self, inoutlet: Inoutlet<T>) {
        let i = inoutlet.inlet().id().0;
        self.unbind_inlet(i);
        self.remove_outlet(inoutlet.outlet().id().0);
        self.inlets.remove(i);
    }

    fn remove_outlet(&mut self, o: usize) {
        let Some(node) = self.outlets.get(o) else {
            return;
        };
        let outputs: Vec<usize> = node.outputs.iter().copied().collect();
        let key_outlets = node
            .cell
            .as_ref()
            .map(|cell| cell.key_outlets())
            .unwrap_or_default();
        for i in outputs {
            self.detach_inlet(i);
        }
        for key_outlet in key_outlets {
            self.remove_outlet(key_outlet);
        }
        self.outlets.remove(o);
    }

    fn disconnect_streamlet_inputs(&mut self, s: usize) {
        debug!(graph = %self.config.name, id = s, "disconnect inputs");
        for i in self.owned_inlets(s) {
            self.disconnect_inlet_raw(i);
        }
    }
    fn disconnect_inlet_raw(&mut self, i: usize) {
        if let Some(o) = self.detach_inlet(i) {
            self.disconnect_upstream(o);
            self.release_key_outlet(o);
        }
    }
    fn disconnect_upstream(&mut self, o: usize) {
        if !self.outlet_feeds_nothing(o) {
            return;
        }
        let Some(owner) = self.outlets.get(o).map(|node| node.owner) else {
            return;
        };
        match owner {
            OutletOwner::Streamlet(s) => {
                let idle = self
                    .owned_outlets(s)
                    .into_iter()
                    .all(|o| self.outlet_feeds_nothing(o));
                if idle {
                    self.disconnect_streamlet_inputs(s);
                }
            }
            OutletOwner::Through(i) => self.disconnect_inlet_raw(i),
            OutletOwner::Key(parent) => self.disconnect_upstream(parent),
        }
    }
    fn outlet_feeds_nothing(&self, o: usize) -> bool {
        let Some(node) = self.outlets.get(o) else {
            return true;
        };
        if !node.outputs.is_empty() {
            return false;
        }
        match &node.cell {
            Some(cell) => cell
                .key_outlets()
                .into_iter()
                .all(|key_outlet| self.outlet_feeds_nothing(key_outlet)),
            None => true,
        }
    }

    fn disconnect_streamlet_outputs(&mut self, s: usize) {
        debug!(graph = %self.config.name, id = s, "disconnect outputs");
        for o in self.owned_outlets(s) {
            self.disconnect_outlet_raw(o);
        }
    }
    fn disconnect_outlet_raw(&mut self, o: usize) {
        let Some(node) = self.outlets.get(o) else {
            return;
        };
        let outputs: Vec<usize> = node.outputs.iter().copied().collect();
        let key_outlets = node
            .cell
            .as_ref()
            .map(|cell| cell.key_outlets())
            .unwrap_or_default();
        for i in outputs {
            self.detach_inlet(i);
            self.disconnect_downstream(i);
        }
        for key_outlet in key_outlets {
            self.disconnect_outlet_raw(key_outlet);
        }
        self.release_key_outlet(o);
    }
    fn disconnect_downstream(&mut self, i: usize) {
        let Some(owner) = self.inlets.get(i).map(|node| node.owner) else {
            return;
        };
        match owner {
            InletOwner::Streamlet(s) => {
                let idle = self
                    .owned_inlets(s)
                    .into_iter()
                    .all(|i| self.inlets.get(i).map_or(true, |node| node.input.is_none()));
                if idle {
                    self.disconnect_streamlet_outputs(s);
                }
            }
            InletOwner::Through(o) => self.disconnect_outlet_raw(o),
        }
    }
}
