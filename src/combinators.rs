use std::{marker::PhantomData, rc::Rc};

use crate::{
    error::BoxError,
    port::PortDecl,
    streamlet::{ReconcileContext, Streamlet},
};

#[cfg(test)]
mod tests;

/// Streamlet computing `output = f(input)` on every reconcile.
///
/// An absent input yields an absent output without calling `f`.
pub struct Map<I, O, F> {
    f: F,
    _phantom: PhantomData<fn(&I) -> O>,
}

pub fn map<I, O, F>(f: F) -> Map<I, O, F>
where
    I: 'static,
    O: 'static,
    F: FnMut(&I) -> O + 'static,
{
    Map {
        f,
        _phantom: PhantomData,
    }
}

impl<I, O, F> Streamlet for Map<I, O, F>
where
    I: 'static,
    O: 'static,
    F: FnMut(&I) -> O + 'static,
{
    const PORTS: &'static [PortDecl] = &[
        PortDecl::inlet::<I>("input"),
        PortDecl::outlet::<O>("output"),
    ];

    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        let output = cx.input::<I>("input")?.map(|input| Rc::new((self.f)(&input)));
        cx.set_output("output", output)?;
        Ok(())
    }
}

/// Like [`Map`], but the result is kept until the streamlet is invalidated.
///
/// `f` runs at most once between two invalidations,
/// however many versions the streamlet is reconciled to.
pub struct Memoize<I, O, F> {
    f: F,
    cache: Option<Option<Rc<O>>>,
    _phantom: PhantomData<fn(&I)>,
}

pub fn memoize<I, O, F>(f: F) -> Memoize<I, O, F>
where
    I: 'static,
    O: 'static,
    F: FnMut(&I) -> O + 'static,
{
    Memoize {
        f,
        cache: None,
        _phantom: PhantomData,
    }
}

impl<I, O, F> Memoize<I, O, F> {
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }
}

impl<I, O, F> Streamlet for Memoize<I, O, F>
where
    I: 'static,
    O: 'static,
    F: FnMut(&I) -> O + 'static,
{
    const PORTS: &'static [PortDecl] = &[
        PortDecl::inlet::<I>("input"),
        PortDecl::outlet::<O>("output"),
    ];

    fn on_invalidate(&mut self) {
        self.cache = None;
    }
    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        let output = match &self.cache {
            Some(output) => output.clone(),
            None => {
                let output = cx.input::<I>("input")?.map(|input| Rc::new((self.f)(&input)));
                self.cache = Some(output.clone());
                output
            }
        };
        cx.set_output("output", output)?;
        Ok(())
    }
}

/// Pass-through streamlet calling an observer each time a reconcile yields a new value.
///
/// Values are compared with `PartialEq`. The observer receives `None` when the input
/// becomes absent.
pub struct Watch<T, F> {
    f: F,
    last: Option<Rc<T>>,
}

pub fn watch<T, F>(f: F) -> Watch<T, F>
where
    T: PartialEq + 'static,
    F: FnMut(Option<&T>) + 'static,
{
    Watch { f, last: None }
}

impl<T, F> Streamlet for Watch<T, F>
where
    T: PartialEq + 'static,
    F: FnMut(Option<&T>) + 'static,
{
    const PORTS: &'static [PortDecl] = &[
        PortDecl::inlet::<T>("input"),
        PortDecl::outlet::<T>("output"),
    ];

    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        let value = cx.input::<T>("input")?;
        if self.last.as_deref() != value.as_deref() {
            (self.f)(value.as_deref());
        }
        self.last = value.clone();
        cx.set_output("output", value)?;
        Ok(())
    }
}

/// Per-key map combinator: `output[k] = f(k, input[k])`.
///
/// Only the keys named by the effects received since the last reconcile are recomputed.
pub struct MapValues<K, V, U, F> {
    f: F,
    _phantom: PhantomData<fn(&K, &V) -> U>,
}

pub fn map_values<K, V, U, F>(f: F) -> MapValues<K, V, U, F>
where
    K: Ord + Clone + 'static,
    V: 'static,
    U: 'static,
    F: FnMut(&K, &V) -> U + 'static,
{
    MapValues {
        f,
        _phantom: PhantomData,
    }
}

impl<K, V, U, F> Streamlet for MapValues<K, V, U, F>
where
    K: Ord + Clone + 'static,
    V: 'static,
    U: 'static,
    F: FnMut(&K, &V) -> U + 'static,
{
    const PORTS: &'static [PortDecl] = &[
        PortDecl::map_inlet::<K, V>("input"),
        PortDecl::map_outlet::<K, U>("output"),
    ];

    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        let f = &mut self.f;
        cx.reconcile_output_keys::<K, U>("output", |cx, key| {
            let value = cx.input_key::<K, V>("input", key)?;
            Ok(value.map(|value| Rc::new(f(key, &value))))
        })?;
        Ok(())
    }
}
