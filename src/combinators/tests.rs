use std::rc::Rc;

use assert_call::{call, CallRecorder};

use super::*;
use crate::{
    core::{Graph, Version},
    terminal::{MapInput, MapOutput, ValueInput, ValueOutput},
};

#[test]
fn map_applies_function() {
    let mut g = Graph::new();
    let src = g.insert(ValueInput::new(3)).unwrap();
    let src_out = src.output(&mut g).unwrap();
    let m = g.chain(src_out, map(|x: &i32| x * 2)).unwrap();
    let m_out = g.outlet::<i32>(m, "output").unwrap();
    let out = g.chain(m_out, ValueOutput::<i32>::new()).unwrap();

    g.reconcile(out, Version(1)).unwrap();
    assert_eq!(out.get(&g).as_deref(), Some(&6));

    src.set(10, &mut g);
    g.reconcile(out, Version(2)).unwrap();
    assert_eq!(out.get(&g).as_deref(), Some(&20));
}

#[test]
fn map_skips_absent_input() {
    let mut g = Graph::new();
    let mut cr = CallRecorder::new();
    let src = g.insert(ValueInput::<i32>::empty()).unwrap();
    let src_out = src.output(&mut g).unwrap();
    let m = g
        .chain(
            src_out,
            map(|x: &i32| {
                call!("map {x}");
                x.to_string()
            }),
        )
        .unwrap();
    let m_out = g.outlet::<String>(m, "output").unwrap();
    let out = g.chain(m_out, ValueOutput::<String>::new()).unwrap();

    g.reconcile(out, Version(1)).unwrap();
    cr.verify(());
    assert_eq!(out.get(&g), None);

    src.set(1, &mut g);
    g.reconcile(out, Version(2)).unwrap();
    cr.verify("map 1");
    assert_eq!(out.get(&g).as_deref().map(|s| s.as_str()), Some("1"));

    src.clear(&mut g);
    g.reconcile(out, Version(3)).unwrap();
    cr.verify(());
    assert_eq!(out.get(&g), None);
}

#[test]
fn memoize_runs_once_between_invalidations() {
    let mut g = Graph::new();
    let mut cr = CallRecorder::new();
    let src = g.insert(ValueInput::new(2)).unwrap();
    let src_out = src.output(&mut g).unwrap();
    let m = g
        .chain(
            src_out,
            memoize(|x: &i32| {
                call!("compute {x}");
                x + 1
            }),
        )
        .unwrap();
    let m_out = g.outlet::<i32>(m, "output").unwrap();
    let out = g.chain(m_out, ValueOutput::<i32>::new()).unwrap();

    g.reconcile(out, Version(1)).unwrap();
    cr.verify("compute 2");
    g.reconcile(out, Version(2)).unwrap();
    g.reconcile(out, Version(3)).unwrap();
    cr.verify(());
    assert_eq!(out.get(&g).as_deref(), Some(&3));
    assert!(g.streamlet(m).unwrap().is_cached());

    src.set(5, &mut g);
    assert!(!g.streamlet(m).unwrap().is_cached());
    g.reconcile(out, Version(4)).unwrap();
    cr.verify("compute 5");
    assert_eq!(out.get(&g).as_deref(), Some(&6));
}

#[test]
fn watch_notifies_on_change_only() {
    let mut g = Graph::new();
    let mut cr = CallRecorder::new();
    let src = g.insert(ValueInput::new(1)).unwrap();
    let src_out = src.output(&mut g).unwrap();
    let w = g
        .chain(
            src_out,
            watch(|x: Option<&i32>| match x {
                Some(x) => call!("changed {x}"),
                None => call!("cleared"),
            }),
        )
        .unwrap();
    let w_out = g.outlet::<i32>(w, "output").unwrap();
    let out = g.chain(w_out, ValueOutput::<i32>::new()).unwrap();

    g.reconcile(out, Version(1)).unwrap();
    cr.verify("changed 1");

    src.set(1, &mut g);
    g.reconcile(out, Version(2)).unwrap();
    cr.verify(());
    assert_eq!(out.get(&g).as_deref(), Some(&1));

    src.set(2, &mut g);
    g.reconcile(out, Version(3)).unwrap();
    cr.verify("changed 2");
    assert_eq!(out.get(&g).as_deref(), Some(&2));
}

#[test]
fn watch_notifies_when_value_becomes_absent() {
    let mut g = Graph::new();
    let mut cr = CallRecorder::new();
    let src = g.insert(ValueInput::<i32>::empty()).unwrap();
    let src_out = src.output(&mut g).unwrap();
    let w = g
        .chain(
            src_out,
            watch(|x: Option<&i32>| match x {
                Some(x) => call!("changed {x}"),
                None => call!("cleared"),
            }),
        )
        .unwrap();

    g.reconcile(w, Version(1)).unwrap();
    cr.verify(());

    src.set(5, &mut g);
    g.reconcile(w, Version(2)).unwrap();
    cr.verify("changed 5");

    src.clear(&mut g);
    g.reconcile(w, Version(3)).unwrap();
    cr.verify("cleared");

    src.clear(&mut g);
    g.reconcile(w, Version(4)).unwrap();
    cr.verify(());
}

#[test]
fn map_values_recomputes_edited_keys_only() {
    let mut g = Graph::new();
    let mut cr = CallRecorder::new();
    let src = g.insert(MapInput::<&str, i32>::new()).unwrap();
    let src_out = src.output(&mut g).unwrap();
    let mv = g
        .chain_map(
            src_out,
            map_values::<&str, i32, i32, _>(|k, v| {
                call!("map {k}");
                v * 10
            }),
        )
        .unwrap();
    let mv_out = g.map_outlet::<&str, i32>(mv, "output").unwrap();
    let out = g.chain_map(mv_out, MapOutput::<&str, i32>::new()).unwrap();

    src.insert("a", 1, &mut g);
    src.insert("b", 2, &mut g);
    g.reconcile(out, Version(1)).unwrap();
    cr.verify(["map a", "map b"]);
    let a1 = g.get_key(mv_out, &"a").unwrap();
    assert_eq!(*a1, 10);

    src.insert("b", 3, &mut g);
    g.reconcile(out, Version(2)).unwrap();
    cr.verify("map b");
    let a2 = g.get_key(mv_out, &"a").unwrap();
    assert!(Rc::ptr_eq(&a1, &a2));
    assert_eq!(out.get_key(&"b", &g).as_deref(), Some(&30));

    src.remove(&"a", &mut g);
    g.reconcile(out, Version(3)).unwrap();
    cr.verify(());
    let keys: Vec<&str> = out.get(&g).keys().copied().collect();
    assert_eq!(keys, vec!["b"]);
}
