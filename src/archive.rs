use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::emit::{self, EmitOptions};
use crate::error::{Error, Result};
use crate::graph::GraphBuilder;
use crate::identifier;
use crate::reduce::{self, ReducedPlan};
use crate::registry::{BuildEnv, Registry, Representer};
use crate::sidecar::{ArraySidecar, Backend};
use crate::value::Value;

/// Mirrors `spec.md` §4.F's option table field-for-field; the teacher's
/// `Model` carries its tunables the same way — a plain struct with a
/// `Default` matching the documented defaults, built via `with_*` chaining
/// rather than a derive-macro builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scoped: bool,
    pub array_threshold: usize,
    pub data_name: String,
    pub robust_replace: bool,
    pub single_item_mode: bool,
    pub check_on_insert: bool,
    pub allowed_name_pattern: String,
    pub backend: Backend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scoped: true,
            array_threshold: usize::MAX,
            data_name: "_arrays".to_string(),
            robust_replace: false,
            single_item_mode: false,
            check_on_insert: false,
            allowed_name_pattern: r"^[A-Za-z_][A-Za-z0-9_]*$".to_string(),
            backend: Backend::Npy,
        }
    }
}

impl Config {
    pub fn with_scoped(mut self, scoped: bool) -> Self {
        self.scoped = scoped;
        self
    }

    pub fn with_array_threshold(mut self, threshold: usize) -> Self {
        self.array_threshold = threshold;
        self
    }

    pub fn with_data_name(mut self, name: impl Into<String>) -> Self {
        self.data_name = name.into();
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_single_item_mode(mut self, single_item_mode: bool) -> Self {
        self.single_item_mode = single_item_mode;
        self
    }
}

/// The result of `Archive::render`: the rendered source plus the sidecar
/// populated while building it, so `save`/`save_data` do not need to
/// re-walk the graph (`spec.md` §3, "Archives are... idempotent across
/// repeated renders").
pub struct Rendered {
    pub source: String,
    pub sidecar: ArraySidecar,
}

/// Component F: the public façade. Owns the insertion-ordered name table,
/// the active configuration, and the representer registry (built-ins plus
/// any the caller registered).
pub struct Archive {
    entries: IndexMap<String, Value>,
    config: Config,
    registry: Registry,
}

impl Archive {
    pub fn new(config: Config) -> Self {
        Self {
            entries: IndexMap::new(),
            config,
            registry: Registry::with_builtins(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Attaches a representer ahead of the pickle-protocol/fallback
    /// handlers (`spec.md` §4.A step 8).
    pub fn register_representer(&mut self, representer: Box<dyn Representer>) {
        self.registry.register_custom(representer);
    }

    /// `insert_as(name, value)` (`spec.md` §4.F).
    pub fn insert_as(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        let name = name.into();
        identifier::validate(&name, &self.config.allowed_name_pattern)?;
        if self.entries.contains_key(&name) {
            return Err(Error::NameCollision { name });
        }
        if self.config.check_on_insert {
            self.check_representable(&value)?;
        }
        self.entries.insert(name, value);
        Ok(())
    }

    /// `insert(**named_values)` (`spec.md` §4.F) — Rust has no keyword
    /// splat, so callers pass the pairs explicitly; insertion order is
    /// preserved exactly as given.
    pub fn insert(&mut self, named_values: Vec<(String, Value)>) -> Result<()> {
        for (name, value) in named_values {
            self.insert_as(name, value)?;
        }
        Ok(())
    }

    fn check_representable(&self, value: &Value) -> Result<()> {
        let mut sidecar = ArraySidecar::new();
        let mut counter = 0;
        let env = BuildEnv {
            config: &self.config,
            sidecar: &mut sidecar,
            name_counter: &mut counter,
        };
        let mut builder = GraphBuilder::new(&self.registry, env);
        builder.visit(value)?;
        Ok(())
    }

    /// `render()` (`spec.md` §4.F): runs B -> C -> D and returns source
    /// text plus the sidecar populated along the way. Idempotent — the
    /// archive's own state (`entries`, `config`) is read-only here.
    pub fn render(&self) -> Result<Rendered> {
        let mut sidecar = ArraySidecar::new();
        let mut counter = 0usize;
        let env = BuildEnv {
            config: &self.config,
            sidecar: &mut sidecar,
            name_counter: &mut counter,
        };
        let mut builder = GraphBuilder::new(&self.registry, env);

        let mut top_level_order = Vec::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            let id = builder.visit(value)?;
            builder.mark_top_level(id, name.clone());
            top_level_order.push(id);
        }

        let (arena, name_seed) = builder.finish();
        let inline = !self.config.scoped;
        let plan: ReducedPlan = reduce::reduce(
            arena,
            &top_level_order,
            inline,
            self.config.robust_replace,
            name_seed,
        )?;

        let opts = EmitOptions {
            scoped: self.config.scoped,
            robust_replace: self.config.robust_replace,
            data_name: &self.config.data_name,
            single_item_mode: self.config.single_item_mode,
        };
        let source = emit::render(&plan, &opts);

        log::info!(
            "rendered archive: {} top-level binding(s), {} sidecarred array(s)",
            self.entries.len(),
            sidecar.len()
        );

        Ok(Rendered { source, sidecar })
    }

    /// `save(dirname, name, package, single_item)` (`spec.md` §4.F),
    /// delegating layout to `crate::package` (component G).
    pub fn save(&self, dir: &std::path::Path, name: &str, package: bool) -> Result<()> {
        let rendered = self.render()?;
        if package {
            crate::package::save_package(dir, name, &rendered, &self.config)
        } else {
            crate::package::save_single_module(dir, name, &rendered, &self.config)
        }
    }

    /// `save_data(datafile)` (`spec.md` §4.F): renders (to populate the
    /// sidecar) but writes only the array store.
    pub fn save_data(&self, datafile: &std::path::Path) -> Result<()> {
        let rendered = self.render()?;
        rendered.sidecar.save(datafile, self.config.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_top_level_name_is_rejected() {
        let mut archive = Archive::new(Config::default());
        archive.insert_as("x", Value::Int(1)).unwrap();
        let err = archive.insert_as("x", Value::Int(2)).unwrap_err();
        assert!(matches!(err, Error::NameCollision { .. }));
    }

    #[test]
    fn reserved_prefix_name_is_rejected() {
        let mut archive = Archive::new(Config::default());
        let err = archive.insert_as("_private", Value::Int(1)).unwrap_err();
        assert!(matches!(err, Error::NameCollision { .. }));
    }

    #[test]
    fn render_is_idempotent() {
        let mut archive = Archive::new(Config::default().with_scoped(false));
        archive.insert_as("a", Value::Int(1)).unwrap();
        archive
            .insert_as("b", Value::list(vec![Value::Int(1), Value::Int(2)]))
            .unwrap();
        let first = archive.render().unwrap().source;
        let second = archive.render().unwrap().source;
        assert_eq!(first, second);
    }

    #[test]
    fn shared_list_elements_render_once() {
        let mut archive = Archive::new(Config::default().with_scoped(false));
        let x = Value::str("shared");
        archive
            .insert_as("b", Value::list(vec![x.clone(), x.clone(), x]))
            .unwrap();
        let rendered = archive.render().unwrap();
        let literal_count = rendered.source.matches("'shared'").count();
        assert_eq!(literal_count, 1);
    }

    #[test]
    fn self_referential_value_is_rejected() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut archive = Archive::new(Config::default());
        let cell = Rc::new(RefCell::new(Vec::new()));
        let list = Value::List(cell.clone());
        cell.borrow_mut().push(list.clone());
        archive.insert_as("a", list).unwrap();
        let err = archive.render().unwrap_err();
        assert!(matches!(err, Error::Cyclic));
    }

    #[test]
    fn array_below_threshold_is_inlined_above_is_sidecarred() {
        let mut archive = Archive::new(Config::default().with_array_threshold(5));
        let small = crate::value::ArrayValue {
            shape: vec![4],
            dtype: crate::value::Dtype::I32,
            little_endian: true,
            data: std::rc::Rc::new((0..4i32).flat_map(|v| v.to_le_bytes()).collect()),
        };
        let large = crate::value::ArrayValue {
            shape: vec![10],
            dtype: crate::value::Dtype::I32,
            little_endian: true,
            data: std::rc::Rc::new((0..10i32).flat_map(|v| v.to_le_bytes()).collect()),
        };
        archive.insert_as("x", Value::Array(std::rc::Rc::new(small))).unwrap();
        archive.insert_as("y", Value::Array(std::rc::Rc::new(large))).unwrap();
        let rendered = archive.render().unwrap();
        assert!(rendered.source.contains("array(["));
        assert!(rendered.source.contains("_arrays['array_0']"));
        assert_eq!(rendered.sidecar.len(), 1);
    }

    #[test]
    fn getnewargs_with_getstate_applies_state_after_construction() {
        use crate::value::object::{ObjectValue, ReduceProtocol};
        use crate::value::ClassRef;

        let obj = ObjectValue::new(ClassRef::new("widgets", "Widget"))
            .with_protocol(ReduceProtocol::NewArgs {
                args: vec![Value::str("a"), Value::Int(3)],
            });
        let mut obj = obj;
        obj.get_state = Some(Box::new(Value::dict(IndexMap::from([(
            Value::str("x"),
            Value::Int(1),
        )]))));
        obj.set_state_method = Some("__setstate__".to_string());

        let mut archive = Archive::new(Config::default().with_scoped(false));
        archive
            .insert_as("w", Value::Object(std::rc::Rc::new(std::cell::RefCell::new(obj))))
            .unwrap();
        let rendered = archive.render().unwrap();
        assert!(rendered.source.contains("Widget.__new__(Widget, 'a', 3)"));
        assert!(rendered.source.contains("__setstate__({'x': 1})"));
    }
}
