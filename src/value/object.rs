use indexmap::IndexMap;

use super::{ClassRef, Value};

/// The pickle-compatible reconstitution protocol from `spec.md` §4.A.1,
/// paraphrased as a target-native capability set rather than the hooks of
/// any specific runtime (`spec.md` §9's "Pickle-protocol compatibility"
/// design note).
///
/// Exactly one variant applies to a given object; `ObjectValue::protocol`
/// holds it. The representer (`crate::registry::handlers::pickle`) matches
/// on it to decide which call-form to synthesize.
#[derive(Debug, Clone)]
pub enum ReduceProtocol {
    /// `__reduce__`/`__reduce_ex__`-equivalent: a constructor callable, its
    /// positional arguments, and the full state-restoration sequence.
    Reduce {
        callable: ClassRef,
        args: Vec<Value>,
        state: Option<Value>,
        listitems: Vec<Value>,
        dictitems: Vec<(Value, Value)>,
    },
    /// `__getnewargs_ex__`-equivalent: `Cls.__new__(Cls, *args, **kwargs)`.
    NewArgsEx {
        args: Vec<Value>,
        kwargs: IndexMap<String, Value>,
    },
    /// `__getnewargs__`-equivalent: `Cls.__new__(Cls, *args)`.
    NewArgs { args: Vec<Value> },
    /// No constructor hooks: `Cls.__new__(Cls)`, state applied directly.
    /// This is also the terminal case other variants fall through to for
    /// their own state application step.
    PlainNew,
}

/// A user-defined object: its class, its attribute state, and (optionally)
/// the non-default reconstitution protocol it implements. An object with no
/// `protocol` and no `set_state` override falls back to `spec.md` §4.A step
/// 10: `Cls.__new__(Cls)` followed by bulk attribute assignment from
/// `attributes`.
#[derive(Debug, Clone)]
pub struct ObjectValue {
    pub class: ClassRef,
    pub attributes: IndexMap<String, Value>,
    pub protocol: Option<ReduceProtocol>,
    /// Present iff the object defines a custom `__setstate__`-equivalent;
    /// when `Some`, state is restored via a call to this method name
    /// instead of bulk attribute assignment (`spec.md` §4.A.1, last
    /// paragraph).
    pub set_state_method: Option<String>,
    /// Present iff the object defines a custom `__getstate__`-equivalent
    /// that should be preferred over `attributes` when building the state
    /// payload passed to `Reduce`/`set_state_method`.
    pub get_state: Option<Box<Value>>,
}

impl ObjectValue {
    pub fn new(class: ClassRef) -> Self {
        Self {
            class,
            attributes: IndexMap::new(),
            protocol: None,
            set_state_method: None,
            get_state: None,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_protocol(mut self, protocol: ReduceProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// The effective state payload passed during restoration: `get_state`
    /// if present, otherwise the attribute dictionary, per `spec.md`
    /// §4.A.1 ("State is obtained via `__getstate__` if present...").
    pub fn effective_state(&self) -> Value {
        if let Some(state) = &self.get_state {
            (**state).clone()
        } else {
            Value::dict(
                self.attributes
                    .iter()
                    .map(|(k, v)| (Value::str(k.as_str()), v.clone()))
                    .collect(),
            )
        }
    }
}
