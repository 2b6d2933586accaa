use streamlet::*;

struct Chains {
    g: Graph,
    src: Handle<ValueInput<i32>>,
    m1: Handle<Map<i32, i32, fn(&i32) -> i32>>,
    out1: Handle<ValueOutput<i32>>,
    m2: Handle<Map<i32, i32, fn(&i32) -> i32>>,
    out2: Handle<ValueOutput<i32>>,
}

fn inc(x: &i32) -> i32 {
    x + 1
}

/// `src -> m1 -> out1` and `src -> m2 -> out2`
fn chains() -> Chains {
    let mut g = Graph::new();
    let src = g.insert(ValueInput::new(1)).unwrap();
    let src_out = src.output(&mut g).unwrap();

    let m1 = g.chain(src_out, map(inc as fn(&i32) -> i32)).unwrap();
    let m1_out = g.outlet::<i32>(m1, "output").unwrap();
    let out1 = g.chain(m1_out, ValueOutput::<i32>::new()).unwrap();

    let m2 = g.chain(src_out, map(inc as fn(&i32) -> i32)).unwrap();
    let m2_out = g.outlet::<i32>(m2, "output").unwrap();
    let out2 = g.chain(m2_out, ValueOutput::<i32>::new()).unwrap();

    Chains {
        g,
        src,
        m1,
        out1,
        m2,
        out2,
    }
}

fn bound_inputs(g: &Graph, id: StreamletId) -> usize {
    g.inlets(id)
        .into_iter()
        .filter(|(_, inlet)| g.input_id(*inlet).is_some())
        .count()
}

fn bound_outputs(g: &Graph, id: StreamletId) -> usize {
    g.outlets(id)
        .into_iter()
        .map(|(_, outlet)| g.outputs_of(outlet).len())
        .sum()
}

#[test]
fn disconnect_inputs_stops_at_shared_source() {
    let mut c = chains();
    c.g.reconcile(c.out1, Version(1)).unwrap();

    c.g.disconnect_inputs(c.out1);
    assert_eq!(bound_inputs(&c.g, c.out1.id()), 0);
    assert_eq!(bound_inputs(&c.g, c.m1.id()), 0);
    assert_eq!(bound_outputs(&c.g, c.m1.id()), 0);

    assert_eq!(bound_outputs(&c.g, c.src.id()), 1);
    assert_eq!(bound_inputs(&c.g, c.m2.id()), 1);
    assert_eq!(bound_inputs(&c.g, c.out2.id()), 1);

    c.g.reconcile(c.out2, Version(2)).unwrap();
    assert_eq!(c.out2.get(&c.g).as_deref(), Some(&2));
}

#[test]
fn disconnect_outputs_closes_the_graph() {
    let mut c = chains();
    c.g.reconcile(c.out1, Version(1)).unwrap();

    c.g.disconnect_outputs(c.src);
    for id in [
        c.src.id(),
        c.m1.id(),
        c.out1.id(),
        c.m2.id(),
        c.out2.id(),
    ] {
        assert_eq!(bound_inputs(&c.g, id), 0);
        assert_eq!(bound_outputs(&c.g, id), 0);
    }

    c.g.reconcile(c.out1, Version(2)).unwrap();
    assert_eq!(c.out1.get(&c.g), None);
}

#[test]
fn disconnect_single_ports() {
    let mut c = chains();
    let m1_out = c.g.outlet::<i32>(c.m1, "output").unwrap();
    c.g.disconnect_outlet_outputs(m1_out.id());
    assert_eq!(bound_inputs(&c.g, c.out1.id()), 0);
    assert_eq!(bound_inputs(&c.g, c.m1.id()), 1);

    let m2_in = c.g.inlet::<i32>(c.m2, "input").unwrap();
    c.g.disconnect_inlet_inputs(m2_in.id());
    assert_eq!(bound_inputs(&c.g, c.m2.id()), 0);
    assert_eq!(bound_outputs(&c.g, c.src.id()), 1);
}

#[test]
fn map_teardown_removes_keys_downstream() {
    let mut g = Graph::new();
    let src = g.insert(MapInput::<u8, u8>::new()).unwrap();
    let src_out = src.output(&mut g).unwrap();
    let sink = g.chain_map(src_out, MapOutput::<u8, u8>::new()).unwrap();
    src.insert(1, 10, &mut g);
    src.insert(2, 20, &mut g);
    g.reconcile(sink, Version(1)).unwrap();
    assert_eq!(sink.get(&g).len(), 2);

    g.disconnect_outputs(src);
    g.reconcile(sink, Version(2)).unwrap();
    assert!(sink.get(&g).is_empty());
    assert_eq!(
        sink.changes(&g),
        vec![(1, KeyEffect::Remove), (2, KeyEffect::Remove)]
    );
}

#[test]
fn remove_unbinds_neighbours() {
    let mut c = chains();
    c.g.reconcile(c.out2, Version(1)).unwrap();

    assert!(c.g.remove(c.m2).is_some());
    assert!(!c.g.contains(c.m2));
    assert_eq!(bound_inputs(&c.g, c.out2.id()), 0);
    assert_eq!(bound_outputs(&c.g, c.src.id()), 1);
    assert_eq!(c.g.len(), 4);

    c.g.reconcile(c.out2, Version(2)).unwrap();
    assert_eq!(c.out2.get(&c.g), None);
}
