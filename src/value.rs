pub mod object;

use std::cell::RefCell;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

pub use object::{ObjectValue, ReduceProtocol};

/// A reference to a class or function reachable by module path, e.g. the
/// target of `from collections import OrderedDict as OrderedDict`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassRef {
    pub module: String,
    pub qualname: String,
}

impl ClassRef {
    pub fn new(module: impl Into<String>, qualname: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            qualname: qualname.into(),
        }
    }
}

/// Canonical metadata for a bulk numeric array, independent of any specific
/// array library. Only shape, dtype, and raw little-endian element bytes
/// are modeled; this is the minimum the sidecar (`crate::sidecar`) needs to
/// round-trip through `.npy`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub shape: Vec<usize>,
    pub dtype: Dtype,
    pub little_endian: bool,
    pub data: Rc<Vec<u8>>,
}

impl ArrayValue {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
}

impl Dtype {
    pub fn itemsize(self) -> usize {
        match self {
            Dtype::I8 | Dtype::U8 | Dtype::Bool => 1,
            Dtype::I16 | Dtype::U16 => 2,
            Dtype::I32 | Dtype::U32 | Dtype::F32 => 4,
            Dtype::I64 | Dtype::U64 | Dtype::F64 => 8,
        }
    }

    /// The NumPy `.npy` `descr` token for this dtype, little-endian.
    pub fn descr(self) -> &'static str {
        match self {
            Dtype::I8 => "|i1",
            Dtype::U8 => "|u1",
            Dtype::Bool => "|b1",
            Dtype::I16 => "<i2",
            Dtype::U16 => "<u2",
            Dtype::I32 => "<i4",
            Dtype::U32 => "<u4",
            Dtype::F32 => "<f4",
            Dtype::I64 => "<i8",
            Dtype::U64 => "<u8",
            Dtype::F64 => "<f8",
        }
    }
}

/// The in-memory stand-in for "an arbitrary Python object": everything the
/// representation registry (`crate::registry`) knows how to dispatch on.
///
/// Containers (`List`, `Dict`, `Set`, `Array`, `Object`) carry `Rc` so that
/// shared references in the input graph are observable as pointer identity
/// during the graph build (`crate::graph`), matching `spec.md`'s identity-key
/// rule.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Complex(f64, f64),
    Bytes(Rc<Vec<u8>>),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<IndexMap<Value, Value>>>),
    Set(Rc<RefCell<IndexSet<Value>>>),
    FrozenSet(Rc<IndexSet<Value>>),
    Range { start: i128, stop: i128, step: i128 },
    Array(Rc<ArrayValue>),
    ClassRef(Rc<ClassRef>),
    Object(Rc<RefCell<ObjectValue>>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(items: IndexMap<Value, Value>) -> Self {
        Value::Dict(Rc::new(RefCell::new(items)))
    }

    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    /// Leaves are atoms with no sub-values to recurse into during the graph
    /// build; everything else is a container.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Value::None
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Float(_)
                | Value::Complex(..)
                | Value::Bytes(_)
                | Value::Str(_)
                | Value::Range { .. }
                | Value::ClassRef(_)
        )
    }

    /// A tuple whose elements are all leaves (recursively) is treated as an
    /// identity-unstable atom, per `spec.md` §3: equal tuples-of-leaves
    /// collapse into a single node even if they are distinct Rc allocations.
    fn is_atom_tuple(&self) -> bool {
        match self {
            Value::Tuple(items) => items.iter().all(|v| v.is_leaf() || v.is_atom_tuple()),
            _ => false,
        }
    }
}

/// Rich comparisons only used for `Dict`/`Set` keys and for the atom-tuple
/// value-equality rule; this is *not* the identity-key used for graph
/// dedup (see `IdentityKey`).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (None, None) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Complex(ar, ai), Complex(br, bi)) => ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits(),
            (Bytes(a), Bytes(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Range { start: s1, stop: e1, step: p1 }, Range { start: s2, stop: e2, step: p2 }) => {
                s1 == s2 && e1 == e2 && p1 == p2
            }
            (ClassRef(a), ClassRef(b)) => a == b,
            (Tuple(a), Tuple(b)) => Rc::ptr_eq(a, b) || a.as_slice() == b.as_slice(),
            (List(a), List(b)) => Rc::ptr_eq(a, b),
            (Dict(a), Dict(b)) => Rc::ptr_eq(a, b),
            (Set(a), Set(b)) => Rc::ptr_eq(a, b),
            (FrozenSet(a), FrozenSet(b)) => Rc::ptr_eq(a, b),
            (Array(a), Array(b)) => Rc::ptr_eq(a, b),
            (Object(a), Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use Value::*;
        std::mem::discriminant(self).hash(state);
        match self {
            None => {}
            Bool(b) => b.hash(state),
            Int(i) => i.hash(state),
            Float(f) => f.to_bits().hash(state),
            Complex(r, i) => {
                r.to_bits().hash(state);
                i.to_bits().hash(state);
            }
            Bytes(b) => b.hash(state),
            Str(s) => s.hash(state),
            Range { start, stop, step } => {
                start.hash(state);
                stop.hash(state);
                step.hash(state);
            }
            ClassRef(c) => c.hash(state),
            Tuple(items) => {
                for item in items.iter() {
                    item.hash(state);
                }
            }
            List(rc) => (Rc::as_ptr(rc) as usize).hash(state),
            Dict(rc) => (Rc::as_ptr(rc) as usize).hash(state),
            Set(rc) => (Rc::as_ptr(rc) as usize).hash(state),
            FrozenSet(rc) => (Rc::as_ptr(rc) as usize).hash(state),
            Array(rc) => (Rc::as_ptr(rc) as usize).hash(state),
            Object(rc) => (Rc::as_ptr(rc) as usize).hash(state),
        }
    }
}

/// Tag distinguishing which `Rc` family a pointer-identity key came from, so
/// two different container kinds can never collide even if an allocator
/// happens to reuse an address across them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContainerTag {
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    Array,
    Object,
}

/// The key used by the graph builder (`crate::graph`) to decide whether two
/// encountered values collapse to one node. See `spec.md` §3, "Identity
/// key".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Ptr(ContainerTag, usize),
    Atom(Value),
}

impl PartialOrd for IdentityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdentityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Only used to produce a deterministic tie-break when two keys must
        // be ordered but carry no other ordering (e.g. set-literal element
        // order, which is actually keyed on assigned node name downstream —
        // this exists so `IdentityKey` can live in a `BTreeSet` if ever
        // needed without panicking).
        format!("{self:?}").cmp(&format!("{other:?}"))
    }
}

pub fn identity_key(value: &Value) -> IdentityKey {
    match value {
        Value::List(rc) => IdentityKey::Ptr(ContainerTag::List, Rc::as_ptr(rc) as usize),
        Value::Dict(rc) => IdentityKey::Ptr(ContainerTag::Dict, Rc::as_ptr(rc) as usize),
        Value::Set(rc) => IdentityKey::Ptr(ContainerTag::Set, Rc::as_ptr(rc) as usize),
        Value::FrozenSet(rc) => IdentityKey::Ptr(ContainerTag::FrozenSet, Rc::as_ptr(rc) as usize),
        Value::Array(rc) => IdentityKey::Ptr(ContainerTag::Array, Rc::as_ptr(rc) as usize),
        Value::Object(rc) => IdentityKey::Ptr(ContainerTag::Object, Rc::as_ptr(rc) as usize),
        Value::Tuple(rc) if !value.is_atom_tuple() => {
            // A tuple holding containers still matters by identity: whether
            // two such tuples are *the same* tuple is observable (its
            // elements might be mutated through other references).
            IdentityKey::Ptr(ContainerTag::Tuple, Rc::as_ptr(rc) as usize)
        }
        other => IdentityKey::Atom(other.clone()),
    }
}
