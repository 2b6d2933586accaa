use std::rc::Rc;

use im::OrdMap;

use crate::{
    core::Graph,
    error::{BoxError, PortError},
    map::{KeyEffect, MapValue},
    port::{Inlet, MapInlet, MapOutlet, Outlet, PortDecl},
    streamlet::{Handle, ReconcileContext, Streamlet},
};


/// Source streamlet exposing an externally set value on outlet `"output"`.
pub struct ValueInput<T> {
    value: Option<Rc<T>>,
}

impl<T: 'static> ValueInput<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Some(Rc::new(value)),
        }
    }
    pub fn empty() -> Self {
        Self { value: None }
    }
}

impl<T: 'static> Streamlet for ValueInput<T> {
    const PORTS: &'static [PortDecl] = &[PortDecl::outlet::<T>("output")];

    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        cx.set_output("output", self.value.clone())?;
        Ok(())
    }
}

impl<T: 'static> Handle<ValueInput<T>> {
    pub fn set(self, value: T, graph: &mut Graph) {
        self.store(Some(Rc::new(value)), graph);
    }
    pub fn clear(self, graph: &mut Graph) {
        self.store(None, graph);
    }
    fn store(self, value: Option<Rc<T>>, graph: &mut Graph) {
        if let Some(input) = graph.streamlet_mut(self) {
            input.value = value;
            graph.invalidate(self);
        }
    }

    /// The value last set, whether or not it was reconciled yet.
    pub fn get(self, graph: &Graph) -> Option<Rc<T>> {
        graph.streamlet(self)?.value.clone()
    }
    pub fn output(self, graph: &mut Graph) -> Result<Outlet<T>, PortError> {
        graph.outlet(self, "output")
    }
}

/// Sink streamlet keeping the value its inlet `"input"` read at the last reconcile.
pub struct ValueOutput<T> {
    value: Option<Rc<T>>,
}

impl<T: 'static> ValueOutput<T> {
    pub fn new() -> Self {
        Self { value: None }
    }
}
impl<T: 'static> Default for ValueOutput<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Streamlet for ValueOutput<T> {
    const PORTS: &'static [PortDecl] = &[PortDecl::inlet::<T>("input")];

    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        self.value = cx.input("input")?;
        Ok(())
    }
}

impl<T: 'static> Handle<ValueOutput<T>> {
    pub fn get(self, graph: &Graph) -> Option<Rc<T>> {
        graph.streamlet(self)?.value.clone()
    }
    pub fn input(self, graph: &mut Graph) -> Result<Inlet<T>, PortError> {
        graph.inlet(self, "input")
    }
}

/// Source streamlet exposing an externally edited map on map outlet `"output"`.
///
/// Each edit records a key effect, so downstream streamlets only revisit the edited keys.
pub struct MapInput<K, V> {
    source: MapValue<K, V>,
}

impl<K: Ord + Clone + 'static, V: 'static> MapInput<K, V> {
    pub fn new() -> Self {
        Self {
            source: OrdMap::new(),
        }
    }
}
impl<K: Ord + Clone + 'static, V: 'static> Default for MapInput<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
impl<K: Ord + Clone + 'static, V: 'static> Streamlet for MapInput<K, V> {
    const PORTS: &'static [PortDecl] = &[PortDecl::map_outlet::<K, V>("output")];

    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        let source = &self.source;
        cx.reconcile_output_keys::<K, V>("output", |_, key| Ok(source.get(key).cloned()))?;
        Ok(())
    }
}

impl<K: Ord + Clone + 'static, V: 'static> Handle<MapInput<K, V>> {
    pub fn insert(self, key: K, value: V, graph: &mut Graph) {
        let Some(input) = graph.streamlet_mut(self) else {
            return;
        };
        input.source.insert(key.clone(), Rc::new(value));
        self.notify(&key, KeyEffect::Update, graph);
    }
    pub fn remove(self, key: &K, graph: &mut Graph) {
        let Some(input) = graph.streamlet_mut(self) else {
            return;
        };
        if input.source.remove(key).is_some() {
            self.notify(key, KeyEffect::Remove, graph);
        }
    }
    pub fn clear(self, graph: &mut Graph) {
        let Some(input) = graph.streamlet_mut(self) else {
            return;
        };
        let keys: Vec<K> = input.source.keys().cloned().collect();
        input.source.clear();
        for key in keys {
            self.notify(&key, KeyEffect::Remove, graph);
        }
    }
    fn notify(self, key: &K, effect: KeyEffect, graph: &mut Graph) {
        if let Ok(outlet) = self.output(graph) {
            graph.invalidate_output_key(outlet, key, effect);
        }
    }

    /// The source map, including edits not reconciled yet.
    pub fn source(self, graph: &Graph) -> MapValue<K, V> {
        graph
            .streamlet(self)
            .map(|input| input.source.clone())
            .unwrap_or_else(OrdMap::new)
    }
    pub fn output(self, graph: &mut Graph) -> Result<MapOutlet<K, V>, PortError> {
        graph.map_outlet(self, "output")
    }
}

/// Sink streamlet keeping the map its inlet `"input"` read at the last reconcile,
/// along with the key effects that led to it.
pub struct MapOutput<K, V> {
    map: MapValue<K, V>,
    changes: Vec<(K, KeyEffect)>,
}

impl<K: Ord + Clone + 'static, V: 'static> MapOutput<K, V> {
    pub fn new() -> Self {
        Self {
            map: OrdMap::new(),
            changes: Vec::new(),
        }
    }
}
impl<K: Ord + Clone + 'static, V: 'static> Default for MapOutput<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone + 'static, V: 'static> Streamlet for MapOutput<K, V> {
    const PORTS: &'static [PortDecl] = &[PortDecl::map_inlet::<K, V>("input")];

    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        self.changes = cx.take_input_effects::<K, V>("input")?;
        self.map = cx.input_map("input")?.unwrap_or_else(OrdMap::new);
        Ok(())
    }
}

impl<K: Ord + Clone + 'static, V: 'static> Handle<MapOutput<K, V>> {
    pub fn get(self, graph: &Graph) -> MapValue<K, V> {
        graph
            .streamlet(self)
            .map(|output| output.map.clone())
            .unwrap_or_else(OrdMap::new)
    }
    pub fn get_key(self, key: &K, graph: &Graph) -> Option<Rc<V>> {
        graph.streamlet(self)?.map.get(key).cloned()
    }
    /// Key effects received between the last two reconciles, ordered by key.
    pub fn changes(self, graph: &Graph) -> Vec<(K, KeyEffect)> {
        graph
            .streamlet(self)
            .map(|output| output.changes.clone())
            .unwrap_or_default()
    }
    pub fn input(self, graph: &mut Graph) -> Result<MapInlet<K, V>, PortError> {
        graph.map_inlet(self, "input")
    }
}
