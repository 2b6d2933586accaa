//! Incremental dataflow graphs of streamlets.
//!
//! A [`Graph`] owns streamlets wired together through typed ports.
//! Changes are pushed downstream with [`Graph::invalidate`], and values are pulled
//! up to date with [`Graph::reconcile`], which recomputes each stale node at most once per [`Version`].
//! Map-valued ports carry per-key [`KeyEffect`]s so that only the edited keys are recomputed.

mod combinators;
mod config;
mod core;
mod error;
mod map;
mod port;
mod streamlet;
mod terminal;
mod utils;

pub use combinators::*;
pub use config::*;
pub use crate::core::{Graph, Version};
pub use error::*;
pub use map::{KeyEffect, MapValue};
pub use port::*;
pub use streamlet::{Handle, ReconcileContext, Streamlet, StreamletId};
pub use terminal::*;
