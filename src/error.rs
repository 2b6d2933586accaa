use std::error::Error;

use parse_display::Display;

use crate::{core::Version, port::PortKind, streamlet::StreamletId};


/// Error type returned by recompute routines.
pub type BoxError = Box<dyn Error>;

/// Structural error raised when looking up or declaring ports.
#[non_exhaustive]
#[derive(Display, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[display("streamlet {0} does not exist")]
    StreamletNotFound(StreamletId),

    #[display("`{streamlet}` does not declare a port named `{name}`")]
    PortNotFound {
        streamlet: &'static str,
        name: String,
    },

    #[display("port `{name}` of `{streamlet}` is a {declared}, not a {requested}")]
    PortKindMismatch {
        streamlet: &'static str,
        name: String,
        declared: PortKind,
        requested: PortKind,
    },

    #[display("port `{name}` of `{streamlet}` carries `{declared}`, not `{requested}`")]
    PortTypeMismatch {
        streamlet: &'static str,
        name: String,
        declared: &'static str,
        requested: &'static str,
    },

    #[display("`{streamlet}` declares port `{name}` more than once")]
    DuplicatePort {
        streamlet: &'static str,
        name: &'static str,
    },
}

impl Error for PortError {}

/// A recompute routine failed while reconciling a streamlet.
///
/// The streamlet is left invalid. Reconciling it again retries the recompute.
#[derive(Display, Debug)]
#[display("`{streamlet}` failed to reconcile to {version}: {source}")]
pub struct ReconcileError {
    id: StreamletId,
    streamlet: &'static str,
    version: Version,
    source: BoxError,
}

impl ReconcileError {
    pub(crate) fn new(
        id: StreamletId,
        streamlet: &'static str,
        version: Version,
        source: BoxError,
    ) -> Self {
        Self {
            id,
            streamlet,
            version,
            source,
        }
    }
    pub fn id(&self) -> StreamletId {
        self.id
    }
    pub fn streamlet(&self) -> &'static str {
        self.streamlet
    }
    pub fn version(&self) -> Version {
        self.version
    }
    pub fn into_source(self) -> BoxError {
        self.source
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}
