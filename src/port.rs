use std::{
    any::{type_name, TypeId},
    collections::HashMap,
    fmt,
    marker::PhantomData,
};

use derive_ex::derive_ex;
use parse_display::Display;

use crate::{
    error::PortError,
    map::{new_key_ledger, new_map_cell, KeyLedger, MapCell, MapValue},
};


/// Kind of a declared port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(style = "snake_case")]
pub enum PortKind {
    Inlet,
    Outlet,
    MapInlet,
    MapOutlet,
}

impl PortKind {
    pub fn is_inlet(self) -> bool {
        matches!(self, PortKind::Inlet | PortKind::MapInlet)
    }
    pub fn is_map(self) -> bool {
        matches!(self, PortKind::MapInlet | PortKind::MapOutlet)
    }
}

/// One entry of a streamlet's static port table.
///
/// ```ignore
/// impl Streamlet for Adder {
///     const PORTS: &'static [PortDecl] = &[
///         PortDecl::inlet::<i32>("lhs"),
///         PortDecl::inlet::<i32>("rhs"),
///         PortDecl::outlet::<i32>("sum"),
///     ];
/// }
/// ```
#[derive(Clone, Copy)]
pub struct PortDecl {
    name: &'static str,
    kind: PortKind,
    type_id: fn() -> TypeId,
    type_name: fn() -> &'static str,
    new_ledger: Option<fn() -> Box<dyn KeyLedger>>,
    new_cell: Option<fn() -> Box<dyn MapCell>>,
}

impl PortDecl {
    pub const fn inlet<T: 'static>(name: &'static str) -> Self {
        Self {
            name,
            kind: PortKind::Inlet,
            type_id: TypeId::of::<T>,
            type_name: type_name::<T>,
            new_ledger: None,
            new_cell: None,
        }
    }
    pub const fn outlet<T: 'static>(name: &'static str) -> Self {
        Self {
            name,
            kind: PortKind::Outlet,
            type_id: TypeId::of::<T>,
            type_name: type_name::<T>,
            new_ledger: None,
            new_cell: None,
        }
    }
    pub const fn map_inlet<K: Ord + Clone + 'static, V: 'static>(name: &'static str) -> Self {
        Self {
            name,
            kind: PortKind::MapInlet,
            type_id: TypeId::of::<MapValue<K, V>>,
            type_name: type_name::<MapValue<K, V>>,
            new_ledger: Some(new_key_ledger::<K>),
            new_cell: None,
        }
    }
    pub const fn map_outlet<K: Ord + Clone + 'static, V: 'static>(name: &'static str) -> Self {
        Self {
            name,
            kind: PortKind::MapOutlet,
            type_id: TypeId::of::<MapValue<K, V>>,
            type_name: type_name::<MapValue<K, V>>,
            new_ledger: None,
            new_cell: Some(new_map_cell::<K, V>),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn kind(&self) -> PortKind {
        self.kind
    }
    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }
    pub fn type_name(&self) -> &'static str {
        (self.type_name)()
    }
    pub(crate) fn new_ledger(&self) -> Option<Box<dyn KeyLedger>> {
        self.new_ledger.map(|f| f())
    }
    pub(crate) fn new_cell(&self) -> Option<Box<dyn MapCell>> {
        self.new_cell.map(|f| f())
    }
}

impl fmt::Debug for PortDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortDecl")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("type", &self.type_name())
            .finish()
    }
}

/// Hashed index over a static port table, built once per streamlet type.
#[derive(Debug)]
pub struct PortRegistry {
    streamlet: &'static str,
    decls: &'static [PortDecl],
    index: HashMap<&'static str, usize>,
}

impl PortRegistry {
    pub fn new(streamlet: &'static str, decls: &'static [PortDecl]) -> Result<Self, PortError> {
        let mut index = HashMap::with_capacity(decls.len());
        for (i, decl) in decls.iter().enumerate() {
            if index.insert(decl.name, i).is_some() {
                return Err(PortError::DuplicatePort {
                    streamlet,
                    name: decl.name,
                });
            }
        }
        Ok(Self {
            streamlet,
            decls,
            index,
        })
    }

    pub fn streamlet(&self) -> &'static str {
        self.streamlet
    }
    pub fn decls(&self) -> &'static [PortDecl] {
        self.decls
    }
    pub fn get(&self, name: &str) -> Option<&'static PortDecl> {
        let decls = self.decls;
        self.index.get(name).map(|&i| &decls[i])
    }

    /// Finds the declaration of `name` and checks that it has the requested kind and element type.
    pub fn find(
        &self,
        name: &str,
        kind: PortKind,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<&'static PortDecl, PortError> {
        let Some(decl) = self.get(name) else {
            return Err(PortError::PortNotFound {
                streamlet: self.streamlet,
                name: name.to_string(),
            });
        };
        if decl.kind != kind {
            return Err(PortError::PortKindMismatch {
                streamlet: self.streamlet,
                name: name.to_string(),
                declared: decl.kind,
                requested: kind,
            });
        }
        if decl.type_id() != type_id {
            return Err(PortError::PortTypeMismatch {
                streamlet: self.streamlet,
                name: name.to_string(),
                declared: decl.type_name(),
                requested: type_name,
            });
        }
        Ok(decl)
    }
}

/// Untyped id of an inlet in a [`Graph`](crate::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("inlet#{0}")]
pub struct InletId(pub(crate) usize);

/// Untyped id of an outlet in a [`Graph`](crate::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("outlet#{0}")]
pub struct OutletId(pub(crate) usize);

/// Input port reading one upstream [`Outlet<T>`].
#[derive_ex(Clone, Copy, bound())]
pub struct Inlet<T: 'static> {
    id: InletId,
    _phantom: PhantomData<fn(T)>,
}

impl<T> Inlet<T> {
    pub(crate) fn new(id: InletId) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }
    pub fn id(self) -> InletId {
        self.id
    }
}
impl<T> fmt::Debug for Inlet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Inlet<{}>({})", type_name::<T>(), self.id)
    }
}

/// Output port fanning a value of type `T` out to any number of inlets.
#[derive_ex(Clone, Copy, bound())]
pub struct Outlet<T: 'static> {
    id: OutletId,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Outlet<T> {
    pub(crate) fn new(id: OutletId) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }
    pub fn id(self) -> OutletId {
        self.id
    }
}
impl<T> fmt::Debug for Outlet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Outlet<{}>({})", type_name::<T>(), self.id)
    }
}

/// A port that is both an inlet and an outlet: it exposes downstream whatever its inlet reads.
#[derive_ex(Clone, Copy, bound())]
pub struct Inoutlet<T: 'static> {
    inlet: InletId,
    outlet: OutletId,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<T> Inoutlet<T> {
    pub(crate) fn new(inlet: InletId, outlet: OutletId) -> Self {
        Self {
            inlet,
            outlet,
            _phantom: PhantomData,
        }
    }
    pub fn inlet(self) -> Inlet<T> {
        Inlet::new(self.inlet)
    }
    pub fn outlet(self) -> Outlet<T> {
        Outlet::new(self.outlet)
    }
}
impl<T> fmt::Debug for Inoutlet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Inoutlet<{}>({}, {})",
            type_name::<T>(),
            self.inlet,
            self.outlet
        )
    }
}

/// Map-valued input port. Receives per-key effects from its upstream [`MapOutlet`].
#[derive_ex(Clone, Copy, bound())]
pub struct MapInlet<K: 'static, V: 'static> {
    id: InletId,
    _phantom: PhantomData<fn(K, V)>,
}

impl<K, V> MapInlet<K, V> {
    pub(crate) fn new(id: InletId) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }
    pub fn id(self) -> InletId {
        self.id
    }
}
impl<K, V> fmt::Debug for MapInlet<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MapInlet<{}, {}>({})",
            type_name::<K>(),
            type_name::<V>(),
            self.id
        )
    }
}

/// Map-valued output port holding a persistent [`MapValue`].
#[derive_ex(Clone, Copy, bound())]
pub struct MapOutlet<K: 'static, V: 'static> {
    id: OutletId,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V> MapOutlet<K, V> {
    pub(crate) fn new(id: OutletId) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }
    pub fn id(self) -> OutletId {
        self.id
    }
}
impl<K, V> fmt::Debug for MapOutlet<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MapOutlet<{}, {}>({})",
            type_name::<K>(),
            type_name::<V>(),
            self.id
        )
    }
}

/// Projection of one key of a [`MapOutlet`]. Binds to any [`Inlet<V>`] through [`as_outlet`](Self::as_outlet).
#[derive_ex(Clone, Copy, bound())]
pub struct KeyOutlet<K: 'static, V: 'static> {
    id: OutletId,
    parent: OutletId,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V> KeyOutlet<K, V> {
    pub(crate) fn new(id: OutletId, parent: OutletId) -> Self {
        Self {
            id,
            parent,
            _phantom: PhantomData,
        }
    }
    pub fn id(self) -> OutletId {
        self.id
    }
    pub fn parent(self) -> MapOutlet<K, V> {
        MapOutlet::new(self.parent)
    }
    pub fn as_outlet(self) -> Outlet<V> {
        Outlet::new(self.id)
    }
}
impl<K, V> From<KeyOutlet<K, V>> for Outlet<V> {
    fn from(value: KeyOutlet<K, V>) -> Self {
        value.as_outlet()
    }
}
impl<K, V> fmt::Debug for KeyOutlet<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KeyOutlet<{}, {}>({} of {})",
            type_name::<K>(),
            type_name::<V>(),
            self.id,
            self.parent
        )
    }
}
