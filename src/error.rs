use std::fmt;

use colored::Colorize;

use crate::value::ClassRef;

/// Errors surfaced by the archive engine. Hand-rolled, in the teacher's
/// style (a plain enum, manual `Display`, no `thiserror`) — see
/// `spec.md` §7 for the contract each variant implements.
#[derive(Debug, Clone)]
pub enum Error {
    /// No registered representer accepted a value.
    NotRepresentable { class: Option<ClassRef> },
    /// A cycle was detected among user objects (graph build or post-
    /// reduction recheck).
    Cyclic,
    /// User-supplied top-level names clashed with each other or with a
    /// reserved identifier.
    NameCollision { name: String },
    /// A rendered expression references a name nothing in the emission
    /// plan defines — a representer bug, not a user error.
    UnboundFreeIdentifier { name: String, in_expr: String },
    /// A DataSet-level lock could not be acquired before `lock_timeout`
    /// elapsed.
    Busy { key: String },
    /// The sidecar and the rendered source disagree on which array keys
    /// exist.
    CorruptArchive { detail: String },
    /// I/O failure at the packager/sidecar boundary.
    Io(String),
}

impl Error {
    pub fn not_representable(class: Option<ClassRef>) -> Self {
        Error::NotRepresentable { class }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotRepresentable { class } => match class {
                Some(c) => write!(
                    f,
                    "{}: no representer accepted a value of type {}",
                    "NotRepresentable".red().bold(),
                    format!("{}.{}", c.module, c.qualname).bold()
                ),
                None => write!(
                    f,
                    "{}: no representer accepted this value",
                    "NotRepresentable".red().bold()
                ),
            },
            Error::Cyclic => write!(
                f,
                "{}: the object graph contains a cycle; the archive requires a DAG",
                "Cyclic".red().bold()
            ),
            Error::NameCollision { name } => write!(
                f,
                "{}: the name {} is already in use",
                "NameCollision".red().bold(),
                name.bold()
            ),
            Error::UnboundFreeIdentifier { name, in_expr } => write!(
                f,
                "{}: identifier {} in expression `{in_expr}` is not bound by anything earlier in the emission plan",
                "UnboundFreeIdentifier".red().bold(),
                name.bold()
            ),
            Error::Busy { key } => write!(
                f,
                "{}: timed out acquiring the lock for {}",
                "Busy".yellow().bold(),
                key.bold()
            ),
            Error::CorruptArchive { detail } => write!(
                f,
                "{}: {detail}",
                "CorruptArchive".red().bold()
            ),
            Error::Io(detail) => write!(f, "io error: {detail}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Io(format!("malformed metadata: {value}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
