use std::rc::Rc;

use assert_call::call;

use crate::{BoxError, PortDecl, ReconcileContext, Streamlet};

/// Sums inlets `a` and `b` into outlet `out`, reporting each hook through `call!`.
pub struct Probe {
    pub name: &'static str,
    pub runs: usize,
}

impl Probe {
    pub fn new(name: &'static str) -> Self {
        Self { name, runs: 0 }
    }
}

impl Streamlet for Probe {
    const PORTS: &'static [PortDecl] = &[
        PortDecl::inlet::<i32>("a"),
        PortDecl::inlet::<i32>("b"),
        PortDecl::outlet::<i32>("out"),
    ];

    fn on_invalidate(&mut self) {
        call!("{} invalidate", self.name);
    }
    fn on_reconcile(&mut self, cx: &mut ReconcileContext) -> Result<(), BoxError> {
        call!("{} reconcile {}", self.name, cx.version());
        self.runs += 1;
        let a = cx.input::<i32>("a")?.map_or(0, |a| *a);
        let b = cx.input::<i32>("b")?.map_or(0, |b| *b);
        cx.set_output("out", Some(Rc::new(a + b)))?;
        Ok(())
    }
}
