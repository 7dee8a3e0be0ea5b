use indexmap::{IndexMap, IndexSet};

use crate::graph::{Classification, Node, NodeId};
use crate::reduce::{substitute, ReducedPlan};
use crate::registry::handlers::SetKind;
use crate::registry::Import;

/// Component D: renders a reduced emission plan to source text, in either
/// of the two layouts `spec.md` §4.D names.
pub struct EmitOptions<'a> {
    pub scoped: bool,
    pub robust_replace: bool,
    pub data_name: &'a str,
    pub single_item_mode: bool,
}

pub fn render(plan: &ReducedPlan, opts: &EmitOptions) -> String {
    if opts.scoped {
        render_scoped(plan, opts)
    } else {
        render_flat(plan, opts)
    }
}

fn name_of(node: &Node) -> &str {
    node.name.as_deref().expect("reduced nodes are always named")
}

/// Resolves a node's value-producing expression and its post-assignment
/// statements, with `{self}` and every placeholder identifier in `args`
/// rewritten to final names (flat mode) or left as bare identifiers bound
/// by a wrapping function's default parameters (scoped mode).
fn resolve(node: &Node, nodes: &IndexMap<NodeId, Node>, self_name: &str, robust: bool, via_substitution: bool) -> (String, Vec<String>) {
    let mapping: IndexMap<String, String> = node
        .args
        .iter()
        .map(|(ident, id)| (ident.clone(), name_of(nodes.get(id).expect("arg must be live")).to_string()))
        .collect();

    let value_expr = if let Some(kind) = node.set_kind {
        set_literal(node, nodes, kind, via_substitution)
    } else if via_substitution {
        substitute(&node.expr, &mapping, robust)
    } else {
        node.expr.clone()
    };

    let post = node
        .post_stmts
        .iter()
        .map(|stmt| {
            let stmt = stmt.replace("{self}", self_name);
            if via_substitution {
                substitute(&stmt, &mapping, robust)
            } else {
                stmt
            }
        })
        .collect();

    (value_expr, post)
}

/// Builds the set/frozenset literal, element order sorted by each element's
/// final name (`spec.md` §4.A step 4 / §4.C, "element order is the sort
/// order of their internal names"). In scoped mode the element *tokens*
/// printed are the local parameter identifiers, not the final names
/// themselves, but the sort key is always the final name.
fn set_literal(node: &Node, nodes: &IndexMap<NodeId, Node>, kind: SetKind, via_substitution: bool) -> String {
    let mut elements: Vec<(String, String)> = node
        .args
        .iter()
        .map(|(ident, id)| {
            let final_name = name_of(nodes.get(id).expect("arg must be live")).to_string();
            let token = if via_substitution { final_name.clone() } else { ident.clone() };
            (final_name, token)
        })
        .collect();
    elements.sort_by(|a, b| a.0.cmp(&b.0));
    let tokens: Vec<String> = elements.into_iter().map(|(_, token)| token).collect();

    match kind {
        SetKind::Set => {
            if tokens.is_empty() {
                "set()".to_string()
            } else {
                format!("{{{}}}", tokens.join(", "))
            }
        }
        SetKind::Frozen => {
            if tokens.is_empty() {
                "frozenset()".to_string()
            } else {
                format!("frozenset({{{}}})", tokens.join(", "))
            }
        }
    }
}

/// Imports in first-occurrence order along `order`, deduplicated.
fn collect_imports(plan: &ReducedPlan) -> Vec<Import> {
    let mut seen: IndexSet<Import> = IndexSet::new();
    for id in &plan.order {
        let node = &plan.nodes[id];
        for import in &node.imports {
            seen.insert(import.clone());
        }
    }
    seen.into_iter().collect()
}

/// `(name, initializer)` pairs in first-occurrence order, deduplicated by
/// name — the non-finite-float helpers are the one case a representer
/// introduces a free identifier directly into the emitted scope
/// (`spec.md` §4.A step 1).
fn collect_helpers(plan: &ReducedPlan) -> Vec<(String, String)> {
    let mut seen: IndexMap<String, String> = IndexMap::new();
    for id in &plan.order {
        let node = &plan.nodes[id];
        for (name, init) in &node.helpers {
            seen.entry(name.clone()).or_insert_with(|| init.clone());
        }
    }
    seen.into_iter().collect()
}

/// Final names of every live node that is not itself a top-level binding —
/// the `_gN` names flat mode binds along the way to build up a top-level
/// expression. These leak into the consumer's namespace unless explicitly
/// deleted (`spec.md` §4.D, "Intermediate names... are explicitly `del`-ed
/// after the final top-level assignment").
fn intermediate_names(plan: &ReducedPlan) -> Vec<String> {
    plan.order
        .iter()
        .filter(|id| plan.nodes[*id].classification != Classification::TopLevel)
        .map(|id| name_of(&plan.nodes[id]).to_string())
        .collect()
}

fn top_level_names(plan: &ReducedPlan) -> Vec<String> {
    let mut names = Vec::new();
    for id in &plan.order {
        let node = &plan.nodes[id];
        if node.classification == Classification::TopLevel {
            names.push(node.name.clone().expect("top-level node must be named"));
            names.extend(node.aliases.iter().cloned());
        }
    }
    names
}

fn single_item_tail(plan: &ReducedPlan, imports: &mut Vec<Import>, opts: &EmitOptions) -> Option<String> {
    if !opts.single_item_mode {
        return None;
    }
    let names = top_level_names(plan);
    if names.len() != 1 {
        return None;
    }
    imports.push(Import::new("sys", "sys", "sys"));
    Some(format!("sys.modules[__name__] = {}", names[0]))
}

fn cleanup_lines(data_name: &str) -> String {
    let mut out = String::from("try: del __builtins__, _arrays\nexcept NameError: pass\n");
    if data_name != "_arrays" {
        out.push_str(&format!("try: del {data_name}\nexcept NameError: pass\n"));
    }
    out
}

fn render_flat(plan: &ReducedPlan, opts: &EmitOptions) -> String {
    let mut imports = collect_imports(plan);
    let helpers = collect_helpers(plan);
    let tail = single_item_tail(plan, &mut imports, opts);

    let mut out = String::new();
    for import in &imports {
        out.push_str(&import.render());
        out.push('\n');
    }
    if !imports.is_empty() {
        out.push('\n');
    }
    for (name, init) in &helpers {
        out.push_str(&format!("{name} = {init}\n"));
    }
    if !helpers.is_empty() {
        out.push('\n');
    }

    for id in &plan.order {
        let node = &plan.nodes[id];
        let self_name = name_of(node).to_string();
        let (value_expr, post) = resolve(node, &plan.nodes, &self_name, opts.robust_replace, true);
        out.push_str(&format!("{self_name} = {value_expr}\n"));
        for alias in &node.aliases {
            out.push_str(&format!("{alias} = {self_name}\n"));
        }
        for stmt in post {
            out.push_str(&stmt);
            out.push('\n');
        }
    }

    let intermediates = intermediate_names(plan);
    if !intermediates.is_empty() {
        out.push_str(&format!("del {}\n", intermediates.join(", ")));
    }

    out.push('\n');
    out.push_str(&cleanup_lines(opts.data_name));

    if let Some(tail) = tail {
        out.push('\n');
        out.push_str(&tail);
        out.push('\n');
    }

    out
}

/// Each node becomes a nullary function whose defaulted parameters capture
/// its dependencies at definition time, then is immediately invoked and
/// rebound to the node's own name. No renaming or substitution is needed —
/// a node's own `expr` already uses the placeholder identifiers that the
/// function's defaulted parameters bind (`spec.md` §4.D, "Scoped mode").
fn render_scoped(plan: &ReducedPlan, opts: &EmitOptions) -> String {
    let mut imports = collect_imports(plan);
    let helpers = collect_helpers(plan);
    let tail = single_item_tail(plan, &mut imports, opts);

    let mut out = String::new();
    for import in &imports {
        out.push_str(&import.render());
        out.push('\n');
    }
    if !imports.is_empty() {
        out.push('\n');
    }
    for (name, init) in &helpers {
        out.push_str(&format!("{name} = {init}\n"));
    }
    if !helpers.is_empty() {
        out.push('\n');
    }

    for id in &plan.order {
        let node = &plan.nodes[id];
        let self_name = name_of(node).to_string();
        let (value_expr, post) = resolve(node, &plan.nodes, "value", opts.robust_replace, false);

        if node.args.is_empty() && node.post_stmts.is_empty() {
            // no dependencies to capture and nothing to run after — a bare
            // assignment reads the same and skips a pointless wrapper.
            out.push_str(&format!("{self_name} = {value_expr}\n"));
        } else {
            let fn_name = format!("_make_{self_name}");
            let params: Vec<String> = node
                .args
                .iter()
                .map(|(ident, child)| {
                    format!("{ident}={}", name_of(&plan.nodes[child]))
                })
                .collect();
            out.push_str(&format!("def {fn_name}({}):\n", params.join(", ")));
            out.push_str(&format!("    value = {value_expr}\n"));
            for stmt in &post {
                out.push_str(&format!("    {stmt}\n"));
            }
            out.push_str("    return value\n");
            out.push_str(&format!("{self_name} = {fn_name}()\n"));
            out.push_str(&format!("del {fn_name}\n"));
        }

        for alias in &node.aliases {
            out.push_str(&format!("{alias} = {self_name}\n"));
        }
    }

    out.push('\n');
    out.push_str(&cleanup_lines(opts.data_name));

    if let Some(tail) = tail {
        out.push('\n');
        out.push_str(&tail);
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Classification;
    use crate::value::IdentityKey;

    fn leaf(id: usize, name: &str, expr: &str) -> Node {
        Node {
            id: NodeId(id),
            identity: IdentityKey::Atom(crate::value::Value::Int(id as i128)),
            expr: expr.to_string(),
            args: IndexMap::new(),
            imports: Vec::new(),
            post_stmts: Vec::new(),
            pure: true,
            set_kind: None,
            helpers: Vec::new(),
            name: Some(name.to_string()),
            aliases: Vec::new(),
            parents: indexmap::IndexSet::new(),
            ref_count: 1,
            classification: Classification::TopLevel,
            inlined: false,
        }
    }

    #[test]
    fn flat_render_ends_with_cleanup() {
        let node = leaf(0, "a", "1");
        let mut nodes = IndexMap::new();
        nodes.insert(NodeId(0), node);
        let plan = ReducedPlan {
            nodes,
            order: vec![NodeId(0)],
        };
        let opts = EmitOptions {
            scoped: false,
            robust_replace: false,
            data_name: "_arrays",
            single_item_mode: false,
        };
        let text = render(&plan, &opts);
        assert!(text.contains("a = 1\n"));
        assert!(text.ends_with("except NameError: pass\n"));
    }

    #[test]
    fn flat_render_deletes_intermediate_names() {
        let mut shared = leaf(0, "_g0", "1");
        shared.classification = Classification::Container;
        shared.ref_count = 2;
        let mut top = leaf(1, "a", "[a0, a1]");
        top.args.insert("a0".to_string(), NodeId(0));
        top.args.insert("a1".to_string(), NodeId(0));

        let mut nodes = IndexMap::new();
        nodes.insert(NodeId(0), shared);
        nodes.insert(NodeId(1), top);
        let plan = ReducedPlan {
            nodes,
            order: vec![NodeId(0), NodeId(1)],
        };
        let opts = EmitOptions {
            scoped: false,
            robust_replace: false,
            data_name: "_arrays",
            single_item_mode: false,
        };
        let text = render(&plan, &opts);
        assert!(text.contains("_g0 = 1\n"));
        assert!(text.contains("a = [_g0, _g0]\n"));
        assert!(text.contains("del _g0\n"));
    }

    #[test]
    fn scoped_render_skips_wrapper_for_dependency_free_node() {
        let node = leaf(0, "a", "1");
        let mut nodes = IndexMap::new();
        nodes.insert(NodeId(0), node);
        let plan = ReducedPlan {
            nodes,
            order: vec![NodeId(0)],
        };
        let opts = EmitOptions {
            scoped: true,
            robust_replace: false,
            data_name: "_arrays",
            single_item_mode: false,
        };
        let text = render(&plan, &opts);
        assert!(text.contains("a = 1\n"));
        assert!(!text.contains("_make_a"));
    }
}
