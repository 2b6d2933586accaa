use std::{
    any::{type_name, Any, TypeId},
    fmt,
    marker::PhantomData,
    rc::Rc,
};

use derive_ex::derive_ex;
use im::OrdMap;
use parse_display::Display;

use crate::{
    core::{Graph, Version},
    error::{BoxError, PortError},
    map::{KeyEffect, MapValue},
    port::{PortDecl, PortKind},
    utils::downcast_rc,
};

#[cfg(test)]
mod tests;

/// A node of the dataflow graph: a bundle of named ports with a recompute routine.
///
/// Ports are declared statically in [`PORTS`](Self::PORTS) and created on first request
/// through [`Graph::inlet`], [`Graph::outlet`], [`Graph::map_inlet`] and [`Graph::map_outlet`].
///
/// The `will_*`, `on_*` and `did_*` hooks are called in that order around each
/// transition. All of them except [`on_reconcile`](Self::on_reconcile) default to doing nothing.
pub trait Streamlet: 'static {
    const PORTS: &'static [PortDecl];

    fn will_invalidate(&mut self) {}
    /// Called when the streamlet becomes invalid. Drop cached derived state here.
    fn on_invalidate(&mut self) {}
    fn did_invalidate(&mut self) {}

    fn will_reconcile(&mut self, version: Version) {
        let _ = version;
    }

    /// Recomputes the outlets from the inlets.
    ///
    /// Every inlet has already been reconciled to `cx.version()` when this is called.
    /// Returning an error leaves the streamlet invalid.
    fn on_reconcile(&mut self, cx: &mut ReconcileContext<'_>) -> Result<(), BoxError> {
        let _ = cx;
        Ok(())
    }

    fn did_reconcile(&mut self, version: Version) {
        let _ = version;
    }
}

pub(crate) trait DynStreamlet: 'static {
    fn will_invalidate(&mut self);
    fn on_invalidate(&mut self);
    fn did_invalidate(&mut self);
    fn will_reconcile(&mut self, version: Version);
    fn on_reconcile(&mut self, cx: &mut ReconcileContext<'_>) -> Result<(), BoxError>;
    fn did_reconcile(&mut self, version: Version);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<S: Streamlet> DynStreamlet for S {
    fn will_invalidate(&mut self) {
        Streamlet::will_invalidate(self)
    }
    fn on_invalidate(&mut self) {
        Streamlet::on_invalidate(self)
    }
    fn did_invalidate(&mut self) {
        Streamlet::did_invalidate(self)
    }
    fn will_reconcile(&mut self, version: Version) {
        Streamlet::will_reconcile(self, version)
    }
    fn on_reconcile(&mut self, cx: &mut ReconcileContext<'_>) -> Result<(), BoxError> {
        Streamlet::on_reconcile(self, cx)
    }
    fn did_reconcile(&mut self, version: Version) {
        Streamlet::did_reconcile(self, version)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Untyped id of a streamlet in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("#{0}")]
pub struct StreamletId(pub(crate) usize);

/// Typed id of a streamlet of type `S` in a [`Graph`].
#[derive_ex(Clone, Copy, PartialEq, Eq, Hash, bound())]
pub struct Handle<S: 'static> {
    id: StreamletId,
    _phantom: PhantomData<fn() -> S>,
}

impl<S> Handle<S> {
    pub(crate) fn new(id: StreamletId) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }
    pub fn id(self) -> StreamletId {
        self.id
    }
}
impl<S> From<Handle<S>> for StreamletId {
    fn from(value: Handle<S>) -> Self {
        value.id
    }
}
impl<S> fmt::Debug for Handle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({})", type_name::<S>(), self.id)
    }
}

/// Access to the ports of the streamlet being reconciled.
pub struct ReconcileContext<'a> {
    graph: &'a mut Graph,
    streamlet: StreamletId,
    version: Version,
}

impl<'a> ReconcileContext<'a> {
    pub(crate) fn new(graph: &'a mut Graph, streamlet: StreamletId, version: Version) -> Self {
        Self {
            graph,
            streamlet,
            version,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }
    pub fn streamlet(&self) -> StreamletId {
        self.streamlet
    }
    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    fn port<T: 'static>(&mut self, name: &str, kind: PortKind) -> Result<usize, PortError> {
        self.graph
            .port(self.streamlet, name, kind, TypeId::of::<T>(), type_name::<T>())
    }

    /// Value of the outlet bound to inlet `name`, `None` if the inlet is unbound or the outlet is empty.
    pub fn input<T: 'static>(&mut self, name: &str) -> Result<Option<Rc<T>>, PortError> {
        let inlet = self.port::<T>(name, PortKind::Inlet)?;
        Ok(self.graph.upstream_value(inlet).and_then(downcast_rc))
    }

    /// Value this streamlet last wrote to outlet `name`.
    pub fn output<T: 'static>(&mut self, name: &str) -> Result<Option<Rc<T>>, PortError> {
        let outlet = self.port::<T>(name, PortKind::Outlet)?;
        Ok(self.graph.outlet_value(outlet).and_then(downcast_rc))
    }
    pub fn set_output<T: 'static>(
        &mut self,
        name: &str,
        value: Option<Rc<T>>,
    ) -> Result<(), PortError> {
        let outlet = self.port::<T>(name, PortKind::Outlet)?;
        self.graph
            .set_outlet_value(outlet, value.map(|value| value as Rc<dyn Any>));
        Ok(())
    }

    /// Map of the outlet bound to map inlet `name`, `None` if the inlet is unbound.
    pub fn input_map<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        name: &str,
    ) -> Result<Option<MapValue<K, V>>, PortError> {
        let inlet = self.port::<MapValue<K, V>>(name, PortKind::MapInlet)?;
        Ok(self
            .graph
            .upstream_map_state::<K, V>(inlet)
            .map(|state| state.map.clone()))
    }
    pub fn input_key<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        name: &str,
        key: &K,
    ) -> Result<Option<Rc<V>>, PortError> {
        let inlet = self.port::<MapValue<K, V>>(name, PortKind::MapInlet)?;
        Ok(self
            .graph
            .upstream_map_state::<K, V>(inlet)
            .and_then(|state| state.map.get(key).cloned()))
    }

    /// Drains the key effects received by map inlet `name` since the last reconcile.
    pub fn take_input_effects<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        name: &str,
    ) -> Result<Vec<(K, KeyEffect)>, PortError> {
        let inlet = self.port::<MapValue<K, V>>(name, PortKind::MapInlet)?;
        Ok(self.graph.take_inlet_effects::<K>(inlet))
    }

    pub fn output_map<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        name: &str,
    ) -> Result<MapValue<K, V>, PortError> {
        let outlet = self.port::<MapValue<K, V>>(name, PortKind::MapOutlet)?;
        Ok(self
            .graph
            .map_state::<K, V>(outlet)
            .map(|state| state.map.clone())
            .unwrap_or_else(OrdMap::new))
    }

    /// Applies the pending key effects of map outlet `name`.
    ///
    /// `f` is called once per key pending an `Update` and returns the fresh value,
    /// or `None` to remove the key. Keys pending a `Remove` are removed without calling `f`.
    /// If `f` fails, the keys not processed yet stay pending.
    ///
    /// Returns the number of keys processed.
    pub fn reconcile_output_keys<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        name: &str,
        mut f: impl FnMut(&mut Self, &K) -> Result<Option<Rc<V>>, BoxError>,
    ) -> Result<usize, BoxError> {
        let outlet = self.port::<MapValue<K, V>>(name, PortKind::MapOutlet)?;
        let pending = self.graph.take_pending::<K, V>(outlet);
        let count = pending.len();
        let mut pending = pending.into_iter();
        while let Some((key, effect)) = pending.next() {
            let value = match effect {
                KeyEffect::Update => match f(self, &key) {
                    Ok(value) => value,
                    Err(e) => {
                        let rest = [(key, effect)].into_iter().chain(pending);
                        self.graph.restore_pending::<K, V>(outlet, rest);
                        return Err(e);
                    }
                },
                KeyEffect::Remove => None,
            };
            self.graph.apply_key(outlet, &key, value);
        }
        Ok(count)
    }
}
