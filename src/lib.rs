//! Serializes in-memory object graphs to human-readable, re-executable
//! source code. An `Archive` renders a named collection of values to one
//! source artifact; a `DataSet` composes many single-item archives under
//! one directory with shared metadata and an advisory lock.

pub mod archive;
pub mod dataset;
pub mod emit;
pub mod error;
pub mod graph;
pub mod identifier;
pub mod package;
pub mod reduce;
pub mod registry;
pub mod sidecar;
pub mod value;

pub use archive::{Archive, Config, Rendered};
pub use dataset::DataSet;
pub use error::{Error, Result};
pub use registry::{BuildEnv, Import, RepTriple, Representer};
pub use sidecar::Backend;
pub use value::{ArrayValue, ClassRef, Dtype, Value};
