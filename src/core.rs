use std::{
    any::{type_name, Any, TypeId},
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use derive_ex::derive_ex;
use im::OrdMap;
use indexmap::{IndexMap, IndexSet};
use parse_display::Display;
use serde::{Deserialize, Serialize};
use slabmap::SlabMap;
use tracing::debug;

use crate::{
    config::GraphConfig,
    error::PortError,
    map::{Effects, KeyEffect, KeyLedger, MapCell, MapState, MapValue},
    port::{
        Inlet, InletId, Inoutlet, KeyOutlet, MapInlet, MapOutlet, Outlet, OutletId, PortDecl,
        PortKind, PortRegistry,
    },
    streamlet::{DynStreamlet, Handle, Streamlet, StreamletId},
    utils::downcast_rc,
};

mod invalidate;
mod reconcile;
mod teardown;


/// Logical epoch a graph is reconciled to.
///
/// The counter is owned by the caller (a frame number, a message sequence number, ...)
/// and must increase monotonically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("v{0}")]
pub struct Version(pub u64);

impl Version {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
    pub const fn get(self) -> u64 {
        self.0
    }
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

struct StreamletNode {
    registry: Rc<PortRegistry>,
    streamlet: Option<Box<dyn DynStreamlet>>,
    version: Option<Version>,
    inlets: IndexMap<&'static str, usize>,
    outlets: IndexMap<&'static str, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InletOwner {
    Streamlet(usize),
    Through(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutletOwner {
    Streamlet(usize),
    Through(usize),
    Key(usize),
}

struct InletNode {
    owner: InletOwner,
    input: Option<usize>,
    version: Option<Version>,
    effects: Option<Box<dyn KeyLedger>>,
}

struct OutletNode {
    owner: OutletOwner,
    value: Option<Rc<dyn Any>>,
    cell: Option<Box<dyn MapCell>>,
    version: Option<Version>,
    outputs: IndexSet<usize>,
    busy: bool,
}

impl OutletNode {
    fn new(owner: OutletOwner, cell: Option<Box<dyn MapCell>>, version: Option<Version>) -> Self {
        Self {
            owner,
            value: None,
            cell,
            version,
            outputs: IndexSet::new(),
            busy: false,
        }
    }
}

/// Arena owning every streamlet and port of one dataflow graph.
///
/// Edges are pairs of integer handles, so the graph holds no reference cycles.
/// Handles of removed streamlets and ports must not be reused: the arena recycles their slots.
///
/// Invalidation and reconciliation recurse along the dependency chain.
/// Very deep chains can exhaust the stack.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Graph {
    config: GraphConfig,
    streamlets: SlabMap<StreamletNode>,
    inlets: SlabMap<InletNode>,
    outlets: SlabMap<OutletNode>,
    registries: HashMap<TypeId, Rc<PortRegistry>>,
    pushes: VecDeque<usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::with_config(GraphConfig::new())
    }
    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            config,
            streamlets: SlabMap::new(),
            inlets: SlabMap::new(),
            outlets: SlabMap::new(),
            registries: HashMap::new(),
            pushes: VecDeque::new(),
        }
    }
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Adds a streamlet to the graph.
    ///
    /// Fails if the port table of `S` declares the same name twice.
    pub fn insert<S: Streamlet>(&mut self, streamlet: S) -> Result<Handle<S>, PortError> {
        let registry = self.registry::<S>()?;
        let name = registry.streamlet();
        let key = self.streamlets.insert(StreamletNode {
            registry,
            streamlet: Some(Box::new(streamlet)),
            version: None,
            inlets: IndexMap::new(),
            outlets: IndexMap::new(),
        });
        debug!(graph = %self.config.name, streamlet = name, id = key, "insert");
        Ok(Handle::new(StreamletId(key)))
    }

    fn registry<S: Streamlet>(&mut self) -> Result<Rc<PortRegistry>, PortError> {
        let type_id = TypeId::of::<S>();
        if let Some(registry) = self.registries.get(&type_id) {
            return Ok(registry.clone());
        }
        let registry = Rc::new(PortRegistry::new(type_name::<S>(), S::PORTS)?);
        self.registries.insert(type_id, registry.clone());
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.streamlets.len()
    }
    pub fn is_empty(&self) -> bool {
        self.streamlets.is_empty()
    }
    pub fn contains(&self, id: impl Into<StreamletId>) -> bool {
        self.streamlets.contains_key(id.into().0)
    }

    /// Returns the streamlet, or `None` if it was removed or is being reconciled.
    pub fn streamlet<S: Streamlet>(&self, handle: Handle<S>) -> Option<&S> {
        self.streamlets
            .get(handle.id().0)?
            .streamlet
            .as_ref()?
            .as_any()
            .downcast_ref()
    }
    pub fn streamlet_mut<S: Streamlet>(&mut self, handle: Handle<S>) -> Option<&mut S> {
        self.streamlets
            .get_mut(handle.id().0)?
            .streamlet
            .as_mut()?
            .as_any_mut()
            .downcast_mut()
    }

    /// Version of the last successful reconcile, or `None` while the streamlet is invalid.
    pub fn version(&self, id: impl Into<StreamletId>) -> Option<Version> {
        self.streamlets.get(id.into().0)?.version
    }
    pub fn is_valid(&self, id: impl Into<StreamletId>) -> bool {
        self.version(id).is_some()
    }

    pub fn inlet<T: 'static>(
        &mut self,
        id: impl Into<StreamletId>,
        name: &str,
    ) -> Result<Inlet<T>, PortError> {
        let key = self.port(id.into(), name, PortKind::Inlet, TypeId::of::<T>(), type_name::<T>())?;
        Ok(Inlet::new(InletId(key)))
    }
    pub fn outlet<T: 'static>(
        &mut self,
        id: impl Into<StreamletId>,
        name: &str,
    ) -> Result<Outlet<T>, PortError> {
        let key = self.port(id.into(), name, PortKind::Outlet, TypeId::of::<T>(), type_name::<T>())?;
        Ok(Outlet::new(OutletId(key)))
    }
    pub fn map_inlet<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        id: impl Into<StreamletId>,
        name: &str,
    ) -> Result<MapInlet<K, V>, PortError> {
        let key = self.port(
            id.into(),
            name,
            PortKind::MapInlet,
            TypeId::of::<MapValue<K, V>>(),
            type_name::<MapValue<K, V>>(),
        )?;
        Ok(MapInlet::new(InletId(key)))
    }
    pub fn map_outlet<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        id: impl Into<StreamletId>,
        name: &str,
    ) -> Result<MapOutlet<K, V>, PortError> {
        let key = self.port(
            id.into(),
            name,
            PortKind::MapOutlet,
            TypeId::of::<MapValue<K, V>>(),
            type_name::<MapValue<K, V>>(),
        )?;
        Ok(MapOutlet::new(OutletId(key)))
    }

    /// Names and ids of the inlets created so far.
    pub fn inlets(&self, id: impl Into<StreamletId>) -> Vec<(&'static str, InletId)> {
        match self.streamlets.get(id.into().0) {
            Some(node) => node
                .inlets
                .iter()
                .map(|(&name, &key)| (name, InletId(key)))
                .collect(),
            None => Vec::new(),
        }
    }
    /// Names and ids of the outlets created so far.
    pub fn outlets(&self, id: impl Into<StreamletId>) -> Vec<(&'static str, OutletId)> {
        match self.streamlets.get(id.into().0) {
            Some(node) => node
                .outlets
                .iter()
                .map(|(&name, &key)| (name, OutletId(key)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn port(
        &mut self,
        id: StreamletId,
        name: &str,
        kind: PortKind,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<usize, PortError> {
        let Some(node) = self.streamlets.get(id.0) else {
            return Err(PortError::StreamletNotFound(id));
        };
        let decl = node.registry.find(name, kind, type_id, type_name)?;
        Ok(self.materialize(id.0, decl))
    }

    fn materialize(&mut self, s: usize, decl: &'static PortDecl) -> usize {
        let node = &self.streamlets[s];
        let is_inlet = decl.kind().is_inlet();
        let ports = if is_inlet { &node.inlets } else { &node.outlets };
        if let Some(&key) = ports.get(decl.name()) {
            return key;
        }
        let version = node.version;
        let key = if is_inlet {
            self.inlets.insert(InletNode {
                owner: InletOwner::Streamlet(s),
                input: None,
                version,
                effects: decl.new_ledger(),
            })
        } else {
            self.outlets.insert(OutletNode::new(
                OutletOwner::Streamlet(s),
                decl.new_cell(),
                version,
            ))
        };
        let node = &mut self.streamlets[s];
        if is_inlet {
            node.inlets.insert(decl.name(), key);
        } else {
            node.outlets.insert(decl.name(), key);
        }
        key
    }

    fn materialize_map_outlets(&mut self, s: usize) {
        let Some(node) = self.streamlets.get(s) else {
            return;
        };
        for decl in node.registry.decls() {
            if decl.kind() == PortKind::MapOutlet {
                self.materialize(s, decl);
            }
        }
    }

    /// Creates a free-standing port pair passing its input through to its output.
    pub fn inoutlet<T: 'static>(&mut self) -> Inoutlet<T> {
        let outlet = self
            .outlets
            .insert(OutletNode::new(OutletOwner::Through(usize::MAX), None, None));
        let inlet = self.inlets.insert(InletNode {
            owner: InletOwner::Through(outlet),
            input: None,
            version: None,
            effects: None,
        });
        self.outlets[outlet].owner = OutletOwner::Through(inlet);
        Inoutlet::new(InletId(inlet), OutletId(outlet))
    }

    /// Returns the outlet projecting `key` of a map outlet, creating it on first request.
    pub fn key_outlet<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        outlet: MapOutlet<K, V>,
        key: K,
    ) -> Option<KeyOutlet<K, V>> {
        let parent = outlet.id().0;
        let node = self.outlets.get(parent)?;
        let state = node.cell.as_ref()?.as_any().downcast_ref::<MapState<K, V>>()?;
        if let Some(&key_outlet) = state.key_outlets.get(&key) {
            return Some(KeyOutlet::new(OutletId(key_outlet), outlet.id()));
        }
        let value = state.map.get(&key).map(|value| value.clone() as Rc<dyn Any>);
        let mut key_node = OutletNode::new(OutletOwner::Key(parent), None, node.version);
        key_node.value = value;
        let key_outlet = self.outlets.insert(key_node);
        self.map_state_mut::<K, V>(parent)?
            .key_outlets
            .insert(key, key_outlet);
        Some(KeyOutlet::new(OutletId(key_outlet), outlet.id()))
    }

    pub fn bind_output<T>(&mut self, outlet: Outlet<T>, inlet: Inlet<T>) {
        self.bind_raw(outlet.id().0, inlet.id().0);
    }
    pub fn bind_input<T>(&mut self, inlet: Inlet<T>, outlet: Outlet<T>) {
        self.bind_raw(outlet.id().0, inlet.id().0);
    }
    pub fn unbind_output<T>(&mut self, outlet: Outlet<T>, inlet: Inlet<T>) {
        if self.input_id(inlet.id()) == Some(outlet.id()) {
            self.unbind_inlet(inlet.id().0);
        }
    }
    pub fn unbind_input<T>(&mut self, inlet: Inlet<T>) {
        self.unbind_inlet(inlet.id().0);
    }

    /// Binds a map inlet. The inlet receives an `Update` for every key the outlet holds or has pending.
    pub fn bind_map_output<K, V>(&mut self, outlet: MapOutlet<K, V>, inlet: MapInlet<K, V>) {
        self.bind_raw(outlet.id().0, inlet.id().0);
    }
    pub fn bind_map_input<K, V>(&mut self, inlet: MapInlet<K, V>, outlet: MapOutlet<K, V>) {
        self.bind_raw(outlet.id().0, inlet.id().0);
    }
    /// Unbinds a map inlet. The inlet receives a `Remove` for every key the outlet holds or has pending.
    pub fn unbind_map_output<K, V>(&mut self, outlet: MapOutlet<K, V>, inlet: MapInlet<K, V>) {
        if self.input_id(inlet.id()) == Some(outlet.id()) {
            self.unbind_inlet(inlet.id().0);
        }
    }
    pub fn unbind_map_input<K, V>(&mut self, inlet: MapInlet<K, V>) {
        self.unbind_inlet(inlet.id().0);
    }

    /// Inserts `streamlet` and binds its `"input"` inlet to `upstream`.
    pub fn chain<T: 'static, S: Streamlet>(
        &mut self,
        upstream: Outlet<T>,
        streamlet: S,
    ) -> Result<Handle<S>, PortError> {
        let handle = self.insert(streamlet)?;
        match self.inlet::<T>(handle, "input") {
            Ok(inlet) => {
                self.bind_input(inlet, upstream);
                Ok(handle)
            }
            Err(e) => {
                self.remove(handle);
                Err(e)
            }
        }
    }
    /// Inserts `streamlet` and binds its `"input"` map inlet to `upstream`.
    pub fn chain_map<K: Ord + Clone + 'static, V: 'static, S: Streamlet>(
        &mut self,
        upstream: MapOutlet<K, V>,
        streamlet: S,
    ) -> Result<Handle<S>, PortError> {
        let handle = self.insert(streamlet)?;
        match self.map_inlet::<K, V>(handle, "input") {
            Ok(inlet) => {
                self.bind_map_input(inlet, upstream);
                Ok(handle)
            }
            Err(e) => {
                self.remove(handle);
                Err(e)
            }
        }
    }

    fn bind_raw(&mut self, o: usize, i: usize) {
        let Some(inlet) = self.inlets.get(i) else {
            return;
        };
        if inlet.input == Some(o) || !self.outlets.contains_key(o) {
            return;
        }
        if inlet.input.is_some() {
            self.unbind_inlet(i);
        }
        self.inlets[i].input = Some(o);
        self.outlets[o].outputs.insert(i);
        debug!(graph = %self.config.name, outlet = o, inlet = i, "bind");

        if self.inlets[i].effects.is_some() {
            let keys = self.outlets[o]
                .cell
                .as_ref()
                .map(|cell| cell.keys())
                .unwrap_or_default();
            for key in keys {
                self.invalidate_inlet_key_raw(i, &*key, KeyEffect::Update);
            }
        }
        self.invalidate_inlet_owner(i);
    }

    /// Severs the edge of inlet `i` and returns the outlet it was bound to.
    fn detach_inlet(&mut self, i: usize) -> Option<usize> {
        let o = self.inlets.get_mut(i)?.input.take()?;
        let mut keys = Vec::new();
        if let Some(outlet) = self.outlets.get_mut(o) {
            outlet.outputs.swap_remove(&i);
            if let Some(cell) = &outlet.cell {
                keys = cell.keys();
            }
        }
        debug!(graph = %self.config.name, outlet = o, inlet = i, "unbind");

        if self.inlets[i].effects.is_some() {
            for key in keys {
                self.invalidate_inlet_key_raw(i, &*key, KeyEffect::Remove);
            }
        }
        self.invalidate_inlet_owner(i);
        Some(o)
    }

    fn unbind_inlet(&mut self, i: usize) -> Option<usize> {
        let o = self.detach_inlet(i)?;
        self.release_key_outlet(o);
        Some(o)
    }

    /// Discards a key outlet left with no output once its key is gone from the parent map.
    fn release_key_outlet(&mut self, o: usize) {
        if !self.config.discard_removed_keys {
            return;
        }
        let Some(node) = self.outlets.get(o) else {
            return;
        };
        let OutletOwner::Key(parent) = node.owner else {
            return;
        };
        if !node.outputs.is_empty() {
            return;
        }
        let released = self
            .outlets
            .get_mut(parent)
            .and_then(|node| node.cell.as_mut())
            .is_some_and(|cell| cell.release_key_outlet(o));
        if released {
            self.outlets.remove(o);
            debug!(graph = %self.config.name, outlet = o, "discard key outlet");
        }
    }

    pub fn input_of<T>(&self, inlet: Inlet<T>) -> Option<Outlet<T>> {
        Some(Outlet::new(self.input_id(inlet.id())?))
    }
    pub fn input_id(&self, inlet: InletId) -> Option<OutletId> {
        Some(OutletId(self.inlets.get(inlet.0)?.input?))
    }
    pub fn outputs_of(&self, outlet: OutletId) -> Vec<InletId> {
        match self.outlets.get(outlet.0) {
            Some(node) => node.outputs.iter().map(|&i| InletId(i)).collect(),
            None => Vec::new(),
        }
    }

    /// Value held by an outlet.
    ///
    /// A stale outlet keeps returning the value of its last successful reconcile.
    /// An outlet that was never reconciled returns `None`.
    pub fn get<T: 'static>(&self, outlet: Outlet<T>) -> Option<Rc<T>> {
        downcast_rc(self.outlet_value(outlet.id().0)?)
    }
    /// Value of the outlet bound to `inlet`, `None` if the inlet is unbound.
    pub fn get_input<T: 'static>(&self, inlet: Inlet<T>) -> Option<Rc<T>> {
        downcast_rc(self.upstream_value(inlet.id().0)?)
    }
    /// Map held by a map outlet. A map outlet that was never reconciled holds the empty map.
    pub fn get_map<K: Ord + Clone + 'static, V: 'static>(
        &self,
        outlet: MapOutlet<K, V>,
    ) -> MapValue<K, V> {
        self.map_state::<K, V>(outlet.id().0)
            .map(|state| state.map.clone())
            .unwrap_or_else(OrdMap::new)
    }
    pub fn get_key<K: Ord + Clone + 'static, V: 'static>(
        &self,
        outlet: MapOutlet<K, V>,
        key: &K,
    ) -> Option<Rc<V>> {
        self.map_state::<K, V>(outlet.id().0)?.map.get(key).cloned()
    }
    /// Map of the outlet bound to `inlet`, `None` if the inlet is unbound.
    pub fn get_input_map<K: Ord + Clone + 'static, V: 'static>(
        &self,
        inlet: MapInlet<K, V>,
    ) -> Option<MapValue<K, V>> {
        Some(self.upstream_map_state::<K, V>(inlet.id().0)?.map.clone())
    }

    pub fn outlet_version(&self, outlet: OutletId) -> Option<Version> {
        self.outlets.get(outlet.0)?.version
    }
    pub fn inlet_version(&self, inlet: InletId) -> Option<Version> {
        self.inlets.get(inlet.0)?.version
    }
    pub fn is_outlet_valid(&self, outlet: OutletId) -> bool {
        self.outlet_version(outlet).is_some()
    }
    pub fn contains_outlet(&self, outlet: OutletId) -> bool {
        self.outlets.contains_key(outlet.0)
    }
    /// Number of key effects recorded on a map outlet and not applied yet.
    pub fn pending_keys(&self, outlet: OutletId) -> usize {
        self.outlets
            .get(outlet.0)
            .and_then(|node| node.cell.as_ref())
            .map_or(0, |cell| cell.pending_len())
    }

    fn owned_inlets(&self, s: usize) -> Vec<usize> {
        match self.streamlets.get(s) {
            Some(node) => node.inlets.values().copied().collect(),
            None => Vec::new(),
        }
    }
    fn owned_outlets(&self, s: usize) -> Vec<usize> {
        match self.streamlets.get(s) {
            Some(node) => node.outlets.values().copied().collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn outlet_value(&self, o: usize) -> Option<Rc<dyn Any>> {
        self.outlets.get(o)?.value.clone()
    }
    pub(crate) fn set_outlet_value(&mut self, o: usize, value: Option<Rc<dyn Any>>) {
        if let Some(node) = self.outlets.get_mut(o) {
            node.value = value;
        }
    }
    pub(crate) fn upstream_value(&self, i: usize) -> Option<Rc<dyn Any>> {
        self.outlet_value(self.inlets.get(i)?.input?)
    }

    pub(crate) fn map_state<K: Ord + Clone + 'static, V: 'static>(
        &self,
        o: usize,
    ) -> Option<&MapState<K, V>> {
        self.outlets.get(o)?.cell.as_ref()?.as_any().downcast_ref()
    }
    pub(crate) fn map_state_mut<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        o: usize,
    ) -> Option<&mut MapState<K, V>> {
        self.outlets
            .get_mut(o)?
            .cell
            .as_mut()?
            .as_any_mut()
            .downcast_mut()
    }
    pub(crate) fn upstream_map_state<K: Ord + Clone + 'static, V: 'static>(
        &self,
        i: usize,
    ) -> Option<&MapState<K, V>> {
        self.map_state(self.inlets.get(i)?.input?)
    }

    pub(crate) fn take_inlet_effects<K: Ord + Clone + 'static>(
        &mut self,
        i: usize,
    ) -> Vec<(K, KeyEffect)> {
        self.inlets
            .get_mut(i)
            .and_then(|node| node.effects.as_mut())
            .and_then(|effects| effects.as_any_mut().downcast_mut::<Effects<K>>())
            .map(|effects| effects.take())
            .unwrap_or_default()
    }

    pub(crate) fn take_pending<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        o: usize,
    ) -> Vec<(K, KeyEffect)> {
        self.map_state_mut::<K, V>(o)
            .map(|state| state.pending.take())
            .unwrap_or_default()
    }
    pub(crate) fn restore_pending<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        o: usize,
        pending: impl IntoIterator<Item = (K, KeyEffect)>,
    ) {
        if let Some(state) = self.map_state_mut::<K, V>(o) {
            for (key, effect) in pending {
                state.pending.record(&key, effect);
            }
        }
    }

    /// Stores the fresh value of `key` in a map outlet and in its key outlet, if any.
    pub(crate) fn apply_key<K: Ord + Clone + 'static, V: 'static>(
        &mut self,
        o: usize,
        key: &K,
        value: Option<Rc<V>>,
    ) {
        let discard = self.config.discard_removed_keys;
        let Some(state) = self.map_state_mut::<K, V>(o) else {
            return;
        };
        state.apply(key, value.clone());
        let Some(key_outlet) = state.key_outlets.get(key).copied() else {
            return;
        };
        let Some(node) = self.outlets.get_mut(key_outlet) else {
            return;
        };
        let is_removed = value.is_none();
        node.value = value.map(|value| value as Rc<dyn Any>);
        if is_removed && discard && node.outputs.is_empty() {
            self.outlets.remove(key_outlet);
            if let Some(state) = self.map_state_mut::<K, V>(o) {
                state.key_outlets.remove(key);
            }
            debug!(graph = %self.config.name, outlet = key_outlet, "discard key outlet");
        }
    }
}
