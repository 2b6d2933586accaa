use tracing::{debug_span, trace, warn};

use super::{Graph, InletOwner, OutletOwner, Version};
use crate::{
    error::ReconcileError,
    port::{InletId, OutletId},
    streamlet::{DynStreamlet, ReconcileContext, StreamletId},
};

impl Graph {
    /// Brings a streamlet up to `version`.
    ///
    /// Upstream nodes are reconciled first. Afterwards every inlet fed by a settled outlet
    /// is reconciled too, so the whole downstream cone ends up at `version`.
    /// Reconciling a node that is already at `version` does nothing.
    pub fn reconcile(
        &mut self,
        id: impl Into<StreamletId>,
        version: Version,
    ) -> Result<(), ReconcileError> {
        let _span = debug_span!("reconcile", graph = %self.config.name, %version).entered();
        let result = self.pull_streamlet(id.into().0, version);
        self.finish_reconcile(result, version)
    }
    pub fn reconcile_outlet(&mut self, id: OutletId, version: Version) -> Result<(), ReconcileError> {
        let _span = debug_span!("reconcile", graph = %self.config.name, %version).entered();
        let result = self.pull_outlet(id.0, version);
        self.finish_reconcile(result, version)
    }
    pub fn reconcile_inlet(&mut self, id: InletId, version: Version) -> Result<(), ReconcileError> {
        let _span = debug_span!("reconcile", graph = %self.config.name, %version).entered();
        let result = self.push_inlet(id.0, version);
        self.finish_reconcile(result, version)
    }

    fn finish_reconcile(
        &mut self,
        result: Result<(), ReconcileError>,
        version: Version,
    ) -> Result<(), ReconcileError> {
        let result = result.and_then(|()| self.drain_pushes(version));
        if let Err(e) = &result {
            self.abort_reconcile(e);
        }
        result
    }

    fn drain_pushes(&mut self, version: Version) -> Result<(), ReconcileError> {
        while let Some(i) = self.pushes.pop_front() {
            self.push_inlet(i, version)?;
        }
        Ok(())
    }

    /// Runs after the pull has unwound, with every streamlet back in its slot.
    /// Streamlets that were mid-pull when the error surfaced keep their state.
    fn abort_reconcile(&mut self, e: &ReconcileError) {
        self.pushes.clear();
        self.invalidate_streamlet(e.id().0);
    }

    fn pull_streamlet(&mut self, s: usize, version: Version) -> Result<(), ReconcileError> {
        let Some(node) = self.streamlets.get_mut(s) else {
            return Ok(());
        };
        if node.version == Some(version) {
            return Ok(());
        }
        let Some(mut streamlet) = node.streamlet.take() else {
            // reached again through a cycle: the outlets keep their previous values
            trace!(streamlet = node.registry.streamlet(), id = s, "skip reentrant reconcile");
            return Ok(());
        };
        let name = node.registry.streamlet();
        let result = self.run_reconcile(s, name, streamlet.as_mut(), version);
        if let Some(node) = self.streamlets.get_mut(s) {
            node.streamlet = Some(streamlet);
        }
        result
    }

    fn run_reconcile(
        &mut self,
        s: usize,
        name: &'static str,
        streamlet: &mut dyn DynStreamlet,
        version: Version,
    ) -> Result<(), ReconcileError> {
        trace!(streamlet = name, id = s, "reconcile");
        streamlet.will_reconcile(version);
        for i in self.owned_inlets(s) {
            self.pull_inlet(i, version)?;
        }
        let mut cx = ReconcileContext::new(self, StreamletId(s), version);
        if let Err(source) = streamlet.on_reconcile(&mut cx) {
            warn!(streamlet = name, id = s, %version, error = %source, "reconcile failed");
            return Err(ReconcileError::new(StreamletId(s), name, version, source));
        }
        self.settle_streamlet(s, version);
        streamlet.did_reconcile(version);
        Ok(())
    }

    fn settle_streamlet(&mut self, s: usize, version: Version) {
        let Some(node) = self.streamlets.get_mut(s) else {
            return;
        };
        node.version = Some(version);
        let inlets: Vec<usize> = node.inlets.values().copied().collect();
        let outlets: Vec<usize> = node.outlets.values().copied().collect();
        for i in inlets {
            if let Some(inlet) = self.inlets.get_mut(i) {
                inlet.version = Some(version);
                if let Some(effects) = inlet.effects.as_mut() {
                    effects.clear();
                }
            }
        }
        for o in outlets {
            self.settle_outlet(o, version);
        }
    }

    fn settle_outlet(&mut self, o: usize, version: Version) {
        let Some(node) = self.outlets.get_mut(o) else {
            return;
        };
        node.version = Some(version);
        let mut key_outlets = Vec::new();
        if let Some(cell) = node.cell.as_mut() {
            if cell.pending_len() != 0 {
                warn!(outlet = o, pending = cell.pending_len(), "discard unapplied key effects");
                cell.clear_pending();
            }
            key_outlets = cell.key_outlets();
        }
        self.pushes.extend(node.outputs.iter().copied());
        for key_outlet in key_outlets {
            self.settle_outlet(key_outlet, version);
        }
    }

    fn pull_inlet(&mut self, i: usize, version: Version) -> Result<(), ReconcileError> {
        let Some(node) = self.inlets.get(i) else {
            return Ok(());
        };
        if node.version == Some(version) {
            return Ok(());
        }
        if let Some(o) = node.input {
            self.pull_outlet(o, version)?;
        }
        if let Some(node) = self.inlets.get_mut(i) {
            node.version = Some(version);
        }
        Ok(())
    }

    fn pull_outlet(&mut self, o: usize, version: Version) -> Result<(), ReconcileError> {
        let Some(node) = self.outlets.get_mut(o) else {
            return Ok(());
        };
        if node.version == Some(version) || node.busy {
            return Ok(());
        }
        match node.owner {
            OutletOwner::Streamlet(s) => self.pull_streamlet(s, version),
            OutletOwner::Through(i) => {
                node.busy = true;
                let result = self.pull_inlet(i, version);
                let value = self.upstream_value(i);
                if let Some(node) = self.outlets.get_mut(o) {
                    node.busy = false;
                    if result.is_ok() {
                        node.value = value;
                    }
                }
                result?;
                self.settle_outlet(o, version);
                Ok(())
            }
            OutletOwner::Key(parent) => {
                self.pull_outlet(parent, version)?;
                if self
                    .outlets
                    .get(o)
                    .is_some_and(|node| node.version != Some(version))
                {
                    self.settle_outlet(o, version);
                }
                Ok(())
            }
        }
    }

    /// Reconciles an inlet and then its owner.
    fn push_inlet(&mut self, i: usize, version: Version) -> Result<(), ReconcileError> {
        self.pull_inlet(i, version)?;
        match self.inlets.get(i).map(|node| node.owner) {
            Some(InletOwner::Streamlet(s)) => self.pull_streamlet(s, version),
            Some(InletOwner::Through(o)) => self.pull_outlet(o, version),
            None => Ok(()),
        }
    }
}
