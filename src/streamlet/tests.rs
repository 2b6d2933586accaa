use std::rc::Rc;

use super::*;
use crate::terminal::{MapInput, ValueInput};

struct Counter;

impl Streamlet for Counter {
    const PORTS: &'static [PortDecl] = &[PortDecl::outlet::<i32>("count")];

    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        let count = cx.output::<i32>("count")?.map_or(0, |c| *c);
        cx.set_output("count", Some(Rc::new(count + 1)))?;
        Ok(())
    }
}

#[test]
fn output_reads_previous_value() {
    let mut g = Graph::new();
    let c = g.insert(Counter).unwrap();
    let count = g.outlet::<i32>(c, "count").unwrap();

    g.reconcile(c, Version(1)).unwrap();
    g.reconcile(c, Version(2)).unwrap();
    g.reconcile(c, Version(2)).unwrap();
    assert_eq!(g.get(count).as_deref(), Some(&2));
}

struct Misnamed;

impl Streamlet for Misnamed {
    const PORTS: &'static [PortDecl] = &[PortDecl::inlet::<i32>("input")];

    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        cx.input::<i32>("inptu")?;
        Ok(())
    }
}

#[test]
fn port_error_inside_reconcile_is_the_source() {
    let mut g = Graph::new();
    let m = g.insert(Misnamed).unwrap();
    let e = g.reconcile(m, Version(1)).unwrap_err();
    let source = e.into_source().downcast::<PortError>().unwrap();
    assert!(matches!(*source, PortError::PortNotFound { .. }));
    assert_eq!(g.version(m), None);
}

struct Picky {
    fail: bool,
}

impl Streamlet for Picky {
    const PORTS: &'static [PortDecl] = &[
        PortDecl::map_inlet::<u32, u32>("input"),
        PortDecl::map_outlet::<u32, u32>("output"),
    ];

    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        let fail = self.fail;
        cx.reconcile_output_keys::<u32, u32>("output", |cx, key| {
            if fail && *key == 2 {
                return Err("key 2 refused".into());
            }
            Ok(cx.input_key::<u32, u32>("input", key)?)
        })?;
        Ok(())
    }
}

#[test]
fn failed_key_stays_pending() {
    let mut g = Graph::new();
    let src = g.insert(MapInput::<u32, u32>::new()).unwrap();
    let src_out = src.output(&mut g).unwrap();
    let p = g.chain_map(src_out, Picky { fail: true }).unwrap();
    let p_out = g.map_outlet::<u32, u32>(p, "output").unwrap();

    for key in 1..=3 {
        src.insert(key, key * 100, &mut g);
    }
    assert!(g.reconcile(p, Version(1)).is_err());
    assert_eq!(g.pending_keys(p_out.id()), 2);
    assert_eq!(g.get_map(p_out).len(), 1);
    assert_eq!(g.version(p), None);

    g.streamlet_mut(p).unwrap().fail = false;
    g.reconcile(p, Version(1)).unwrap();
    assert_eq!(g.pending_keys(p_out.id()), 0);
    let values: Vec<u32> = g.get_map(p_out).values().map(|v| **v).collect();
    assert_eq!(values, vec![100, 200, 300]);
}

#[test]
fn handle_debug_names_the_type() {
    let mut g = Graph::new();
    let h = g.insert(ValueInput::new(0)).unwrap();
    let text = format!("{:?}", h);
    assert!(text.starts_with("Handle<"));
    assert!(text.contains("ValueInput<i32>"));
    assert!(text.ends_with("(#0)"));
    assert_eq!(StreamletId::from(h), h.id());
}
