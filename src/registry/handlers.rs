use crate::registry::{BuildEnv, Import, RepTriple, Representer};
use crate::value::object::ReduceProtocol;
use crate::value::{ClassRef, Dtype, Value};

/// Which literal form a set-like value renders as; its element order is
/// resolved at emission time from sorted final node names, not insertion
/// order (`spec.md` §4.A step 4), so the handler only needs to say which
/// shape the emitter should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    Set,
    Frozen,
}

/// §4.A step 1: `None`, booleans, integers, floats, complex, bytes, text.
#[derive(Debug)]
pub struct Primitives;

fn render_str_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn render_bytes_literal(b: &[u8]) -> String {
    let mut out = String::from("b'");
    for byte in b {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(*byte as char),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push('\'');
    out
}

fn render_float(f: f64) -> RepTriple {
    if f.is_nan() {
        let mut t = RepTriple::new("nan");
        t.helpers.push(("nan".into(), "float(\"nan\")".into()));
        t
    } else if f.is_infinite() {
        if f > 0.0 {
            let mut t = RepTriple::new("inf");
            t.helpers.push(("inf".into(), "float(\"inf\")".into()));
            t
        } else {
            let mut t = RepTriple::new("neg_inf");
            t.helpers.push(("neg_inf".into(), "float(\"-inf\")".into()));
            t
        }
    } else {
        RepTriple::new(format_finite_float(f))
    }
}

fn format_finite_float(f: f64) -> String {
    if f == f.trunc() && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

impl Representer for Primitives {
    fn represent(&self, value: &Value, _env: &mut BuildEnv) -> Option<RepTriple> {
        match value {
            Value::None => Some(RepTriple::new("None")),
            Value::Bool(b) => Some(RepTriple::new(if *b { "True" } else { "False" })),
            Value::Int(i) => Some(RepTriple::new(i.to_string())),
            Value::Float(f) => Some(render_float(*f)),
            Value::Complex(re, im) => Some(RepTriple::new(format!(
                "complex({}, {})",
                format_finite_float(*re),
                format_finite_float(*im)
            ))),
            Value::Bytes(b) => Some(RepTriple::new(render_bytes_literal(b))),
            Value::Str(s) => Some(RepTriple::new(render_str_literal(s))),
            _ => None,
        }
    }
}

/// §4.A step 2: ordered sequences.
#[derive(Debug)]
pub struct Sequences;

impl Representer for Sequences {
    fn represent(&self, value: &Value, _env: &mut BuildEnv) -> Option<RepTriple> {
        match value {
            Value::List(rc) => {
                let items = rc.borrow();
                let mut triple = RepTriple::new(String::new());
                let idents: Vec<String> = (0..items.len()).map(|i| format!("a{i}")).collect();
                for (ident, item) in idents.iter().zip(items.iter()) {
                    triple.args.insert(ident.clone(), item.clone());
                }
                triple.expr = format!("[{}]", idents.join(", "));
                Some(triple)
            }
            Value::Tuple(items) => {
                let mut triple = RepTriple::new(String::new());
                let idents: Vec<String> = (0..items.len()).map(|i| format!("a{i}")).collect();
                for (ident, item) in idents.iter().zip(items.iter()) {
                    triple.args.insert(ident.clone(), item.clone());
                }
                triple.expr = match idents.len() {
                    0 => "()".to_string(),
                    1 => format!("({},)", idents[0]),
                    _ => format!("({})", idents.join(", ")),
                };
                Some(triple)
            }
            _ => None,
        }
    }
}

/// §4.A step 3: mappings, preserving insertion order.
#[derive(Debug)]
pub struct Mappings;

impl Representer for Mappings {
    fn represent(&self, value: &Value, _env: &mut BuildEnv) -> Option<RepTriple> {
        let Value::Dict(rc) = value else { return None };
        let map = rc.borrow();
        let mut triple = RepTriple::new(String::new());
        let mut parts = Vec::with_capacity(map.len());
        for (i, (k, v)) in map.iter().enumerate() {
            let kident = format!("k{i}");
            let vident = format!("v{i}");
            triple.args.insert(kident.clone(), k.clone());
            triple.args.insert(vident.clone(), v.clone());
            parts.push(format!("{kident}: {vident}"));
        }
        triple.expr = format!("{{{}}}", parts.join(", "));
        Some(triple)
    }
}

/// §4.A step 4: unordered and frozen sets. Element order in the rendered
/// literal is resolved at emission time (`crate::emit`), not here.
#[derive(Debug)]
pub struct Sets;

impl Representer for Sets {
    fn represent(&self, value: &Value, _env: &mut BuildEnv) -> Option<RepTriple> {
        let (items, frozen): (Vec<Value>, bool) = match value {
            Value::Set(rc) => (rc.borrow().iter().cloned().collect(), false),
            Value::FrozenSet(rc) => (rc.iter().cloned().collect(), true),
            _ => return None,
        };
        let mut triple = RepTriple::new(String::new());
        for (i, item) in items.into_iter().enumerate() {
            triple.args.insert(format!("e{i}"), item);
        }
        triple.set_kind = Some(if frozen { SetKind::Frozen } else { SetKind::Set });
        if frozen {
            triple.imports.push(Import::new("builtins", "frozenset", "frozenset"));
        }
        Some(triple)
    }
}

/// §4.A step 5: range-like objects, reconstructed via the public
/// constructor. Bounds are plain integers, so they are inlined literally
/// rather than spun into their own nodes.
#[derive(Debug)]
pub struct Ranges;

impl Representer for Ranges {
    fn represent(&self, value: &Value, _env: &mut BuildEnv) -> Option<RepTriple> {
        let Value::Range { start, stop, step } = value else {
            return None;
        };
        let expr = if *step == 1 {
            format!("range({start}, {stop})")
        } else {
            format!("range({start}, {stop}, {step})")
        };
        Some(RepTriple::new(expr))
    }
}

/// §4.A step 6: large numeric arrays are sidecarred; small ones are
/// rendered as a literal reconstruction.
#[derive(Debug)]
pub struct Arrays;

fn literal_elements(array: &crate::value::ArrayValue) -> Vec<String> {
    let n = array.element_count();
    let bytes = &array.data;
    (0..n)
        .map(|i| {
            let off = i * array.dtype.itemsize();
            match array.dtype {
                Dtype::I8 => (bytes[off] as i8).to_string(),
                Dtype::U8 => bytes[off].to_string(),
                Dtype::Bool => (bytes[off] != 0).to_string(),
                Dtype::I16 => i16::from_le_bytes([bytes[off], bytes[off + 1]]).to_string(),
                Dtype::U16 => u16::from_le_bytes([bytes[off], bytes[off + 1]]).to_string(),
                Dtype::I32 => {
                    i32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()).to_string()
                }
                Dtype::U32 => {
                    u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()).to_string()
                }
                Dtype::F32 => {
                    format_finite_float(f32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as f64)
                }
                Dtype::I64 => {
                    i64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()).to_string()
                }
                Dtype::U64 => {
                    u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()).to_string()
                }
                Dtype::F64 => {
                    format_finite_float(f64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()))
                }
            }
        })
        .collect()
}

fn dtype_name(dtype: Dtype) -> &'static str {
    match dtype {
        Dtype::I8 => "int8",
        Dtype::I16 => "int16",
        Dtype::I32 => "int32",
        Dtype::I64 => "int64",
        Dtype::U8 => "uint8",
        Dtype::U16 => "uint16",
        Dtype::U32 => "uint32",
        Dtype::U64 => "uint64",
        Dtype::F32 => "float32",
        Dtype::F64 => "float64",
        Dtype::Bool => "bool",
    }
}

impl Representer for Arrays {
    fn represent(&self, value: &Value, env: &mut BuildEnv) -> Option<RepTriple> {
        let Value::Array(array) = value else { return None };
        if array.element_count() >= env.config.array_threshold {
            let key = env.sidecar.put(array.clone());
            Some(RepTriple::new(format!(
                "{}['{}']",
                env.config.data_name, key
            )))
        } else {
            let elems = literal_elements(array).join(", ");
            let mut triple = RepTriple::new(format!(
                "array([{elems}], dtype='{}')",
                dtype_name(array.dtype)
            ));
            triple
                .imports
                .push(Import::new("numpy", "array", "array"));
            Some(triple)
        }
    }
}

/// §4.A step 7: classes and functions referenced by module path.
#[derive(Debug)]
pub struct ClassRefs;

impl Representer for ClassRefs {
    fn represent(&self, value: &Value, _env: &mut BuildEnv) -> Option<RepTriple> {
        let Value::ClassRef(c) = value else { return None };
        Some(class_ref_triple(c))
    }
}

fn class_ref_triple(c: &ClassRef) -> RepTriple {
    let mut triple = RepTriple::new(c.qualname.clone());
    triple
        .imports
        .push(Import::new(c.module.clone(), c.qualname.clone(), c.qualname.clone()));
    triple
}

/// §4.A step 9 and §4.A.1: the pickle-compatible reconstitution protocol.
/// Only fires for objects that declared a non-default protocol; plain
/// attribute-bag objects fall through to `AttributeFallback`.
#[derive(Debug)]
pub struct PickleProtocol;

impl Representer for PickleProtocol {
    fn represent(&self, value: &Value, _env: &mut BuildEnv) -> Option<RepTriple> {
        let Value::Object(rc) = value else { return None };
        let obj = rc.borrow();
        let protocol = obj.protocol.as_ref()?;

        let class_triple = class_ref_triple(&obj.class);
        let class_alias = class_triple.expr.clone();

        let mut triple = RepTriple::new(String::new());
        triple.imports.extend(class_triple.imports);

        match protocol {
            ReduceProtocol::Reduce {
                callable,
                args,
                state,
                listitems,
                dictitems,
            } => {
                let callable_triple = class_ref_triple(callable);
                triple.imports.extend(callable_triple.imports.clone());
                let arg_idents = bind_args(&mut triple, args);
                triple.expr = format!("{}({})", callable_triple.expr, arg_idents.join(", "));

                if let Some(state) = state {
                    push_state_application(&mut triple, &obj, state);
                }
                for item in listitems {
                    let ident = bind_one(&mut triple, item.clone());
                    triple.post_stmts.push(format!("{{self}}.append({ident})"));
                }
                for (k, v) in dictitems {
                    let kident = bind_one(&mut triple, k.clone());
                    let vident = bind_one(&mut triple, v.clone());
                    triple
                        .post_stmts
                        .push(format!("{{self}}[{kident}] = {vident}"));
                }
                triple.pure = triple.post_stmts.is_empty();
            }
            ReduceProtocol::NewArgsEx { args, kwargs } => {
                let arg_idents = bind_args(&mut triple, args);
                let mut parts = arg_idents.clone();
                for (k, v) in kwargs {
                    let ident = bind_one(&mut triple, v.clone());
                    parts.push(format!("{k}={ident}"));
                }
                triple.expr = format!("{class_alias}.__new__({class_alias}, {})", parts.join(", "));
                let state = obj.effective_state();
                push_state_application(&mut triple, &obj, &state);
                triple.pure = triple.post_stmts.is_empty();
            }
            ReduceProtocol::NewArgs { args } => {
                let arg_idents = bind_args(&mut triple, args);
                let mut parts = vec![class_alias.clone()];
                parts.extend(arg_idents);
                triple.expr = format!("{class_alias}.__new__({})", parts.join(", "));
                let state = obj.effective_state();
                push_state_application(&mut triple, &obj, &state);
                triple.pure = triple.post_stmts.is_empty();
            }
            ReduceProtocol::PlainNew => {
                triple.expr = format!("{class_alias}.__new__({class_alias})");
                let state = obj.effective_state();
                push_state_application(&mut triple, &obj, &state);
                triple.pure = triple.post_stmts.is_empty();
            }
        }

        Some(triple)
    }
}

fn bind_args(triple: &mut RepTriple, args: &[Value]) -> Vec<String> {
    args.iter().map(|a| bind_one(triple, a.clone())).collect()
}

fn bind_one(triple: &mut RepTriple, value: Value) -> String {
    let ident = format!("p{}", triple.args.len());
    triple.args.insert(ident.clone(), value);
    ident
}

fn push_state_application(
    triple: &mut RepTriple,
    obj: &crate::value::ObjectValue,
    state: &Value,
) {
    let ident = bind_one(triple, state.clone());
    if let Some(method) = &obj.set_state_method {
        triple
            .post_stmts
            .push(format!("{{self}}.{method}({ident})"));
    } else {
        triple
            .post_stmts
            .push(format!("{{self}}.__dict__.update({ident})"));
    }
}

/// §4.A step 10: the terminal fallback for user objects with an accessible
/// attribute dictionary and no reduce/getnewargs protocol. If this also
/// fails to apply (i.e. the value is not an object at all), the registry
/// as a whole reports `NotRepresentable`.
#[derive(Debug)]
pub struct AttributeFallback;

impl Representer for AttributeFallback {
    fn represent(&self, value: &Value, _env: &mut BuildEnv) -> Option<RepTriple> {
        let Value::Object(rc) = value else { return None };
        let obj = rc.borrow();
        if obj.protocol.is_some() {
            // handled by `PickleProtocol`
            return None;
        }

        let class_triple = class_ref_triple(&obj.class);
        let class_alias = class_triple.expr.clone();
        let mut triple = RepTriple::new(format!("{class_alias}.__new__({class_alias})"));
        triple.imports.extend(class_triple.imports);

        let state = obj.effective_state();
        push_state_application(&mut triple, &obj, &state);
        triple.pure = triple.post_stmts.is_empty();
        Some(triple)
    }
}
