pub mod handlers;

use indexmap::IndexMap;

use crate::archive::Config;
use crate::sidecar::ArraySidecar;
use crate::value::Value;

/// A symbol import required by some rendered `expr`: `from module_path
/// import qualified_name as local_alias`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Import {
    pub module_path: String,
    pub qualified_name: String,
    pub local_alias: String,
}

impl Import {
    pub fn new(
        module_path: impl Into<String>,
        qualified_name: impl Into<String>,
        local_alias: impl Into<String>,
    ) -> Self {
        Self {
            module_path: module_path.into(),
            qualified_name: qualified_name.into(),
            local_alias: local_alias.into(),
        }
    }

    pub fn render(&self) -> String {
        if self.qualified_name == self.local_alias {
            format!("from {} import {}", self.module_path, self.qualified_name)
        } else {
            format!(
                "from {} import {} as {}",
                self.module_path, self.qualified_name, self.local_alias
            )
        }
    }
}

/// The rep triple from `spec.md` §3: an expression, its free-identifier ->
/// sub-object edges, and the imports it needs.
///
/// `post_stmts` is an addition for the pickle-protocol handler (`spec.md`
/// §4.A.1): state restoration is a *statement* following the node's primary
/// assignment (`obj.__setstate__(...)`, `obj.append(x)`, ...), not part of
/// the value-producing expression itself. Each template may reference the
/// literal placeholder `{self}`, substituted with the node's finalized name
/// during emission (`crate::emit`).
#[derive(Debug, Clone)]
pub struct RepTriple {
    pub expr: String,
    pub args: IndexMap<String, Value>,
    pub imports: Vec<Import>,
    pub post_stmts: Vec<String>,
    /// Whether `expr` (and `post_stmts`) are free of side effects other
    /// than constructing this value — gates eligibility for flat-mode
    /// inlining (`spec.md` §4.C).
    pub pure: bool,
    /// Non-empty iff this is a set/frozenset literal: the emitter ignores
    /// `expr` entirely and rebuilds the literal from `args`, sorted by each
    /// argument's finalized node name (`spec.md` §4.A step 4).
    pub set_kind: Option<handlers::SetKind>,
    /// `(name, initializer)` pairs for the one case where a free identifier
    /// crosses into the emitted scope from within a representer itself —
    /// non-finite float helpers (`spec.md` §4.A step 1). Hoisted once per
    /// distinct name by the emitter.
    pub helpers: Vec<(String, String)>,
}

impl RepTriple {
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            args: IndexMap::new(),
            imports: Vec::new(),
            post_stmts: Vec::new(),
            pure: true,
            set_kind: None,
            helpers: Vec::new(),
        }
    }

    pub fn with_arg(mut self, ident: impl Into<String>, value: Value) -> Self {
        self.args.insert(ident.into(), value);
        self
    }

    pub fn with_import(mut self, import: Import) -> Self {
        self.imports.push(import);
        self
    }

    pub fn with_post_stmt(mut self, stmt: impl Into<String>) -> Self {
        self.post_stmts.push(stmt.into());
        self.pure = false;
        self
    }

    pub fn impure(mut self) -> Self {
        self.pure = false;
        self
    }
}

/// Per-build context threaded through every `Representer::represent` call:
/// the active configuration and the array sidecar handle, so a handler
/// that needs to partition a large array (`spec.md` §4.A step 6) can do so
/// without a global.
pub struct BuildEnv<'a> {
    pub config: &'a Config,
    pub sidecar: &'a mut ArraySidecar,
    /// Monotonic counter for generated identifiers (`_gN`), seeded once
    /// per archive and shared by the builder and reducer.
    pub name_counter: &'a mut usize,
}

impl<'a> BuildEnv<'a> {
    pub fn fresh_name(&mut self) -> String {
        let name = format!("_g{}", self.name_counter);
        *self.name_counter += 1;
        name
    }
}

/// Component A: a single handler in the representation-registry chain.
/// `spec.md` §4.A: "returns the first successful triple" or a sentinel
/// meaning not-representable — here, `None`.
pub trait Representer: std::fmt::Debug {
    fn represent(&self, value: &Value, env: &mut BuildEnv) -> Option<RepTriple>;
}

/// Chains handlers in priority order exactly as enumerated in `spec.md`
/// §4.A (1–10), with one extension point: user-registered custom
/// representers are queried at the position `spec.md` step 8 names
/// ("objects with an explicit custom representer method").
pub struct Registry {
    before_custom: Vec<Box<dyn Representer>>,
    custom: Vec<Box<dyn Representer>>,
    after_custom: Vec<Box<dyn Representer>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("before_custom", &self.before_custom.len())
            .field("custom", &self.custom.len())
            .field("after_custom", &self.after_custom.len())
            .finish()
    }
}

impl Registry {
    pub fn with_builtins() -> Self {
        Self {
            before_custom: vec![
                Box::new(handlers::Primitives),
                Box::new(handlers::Sequences),
                Box::new(handlers::Mappings),
                Box::new(handlers::Sets),
                Box::new(handlers::Ranges),
                Box::new(handlers::Arrays),
                Box::new(handlers::ClassRefs),
            ],
            custom: Vec::new(),
            after_custom: vec![Box::new(handlers::PickleProtocol), Box::new(handlers::AttributeFallback)],
        }
    }

    /// Registers a representer ahead of the pickle-protocol/fallback
    /// handlers but after all built-ins, per `spec.md` §4.A step 8.
    pub fn register_custom(&mut self, representer: Box<dyn Representer>) {
        self.custom.push(representer);
    }

    pub fn represent(&self, value: &Value, env: &mut BuildEnv) -> Option<RepTriple> {
        self.before_custom
            .iter()
            .chain(self.custom.iter())
            .chain(self.after_custom.iter())
            .find_map(|handler| handler.represent(value, env))
    }
}
