use indexmap::{IndexMap, IndexSet};
use regex::Regex;

use crate::error::{Error, Result};
use crate::graph::{Classification, Node, NodeId};

/// Component C: the graph reducer. Consumes the node arena the builder
/// produced and computes an emission plan — final names, an inlined node
/// set, and a topological emission order (`spec.md` §4.C).
pub struct ReducedPlan {
    pub nodes: IndexMap<NodeId, Node>,
    pub order: Vec<NodeId>,
}

/// Runs name assignment, flat-mode inlining, and topological ordering.
/// `top_level_order` is the insertion order of top-level nodes
/// (`spec.md` §4.C, "ties are broken by node id").
pub fn reduce(
    mut arena: Vec<Node>,
    top_level_order: &[NodeId],
    inline: bool,
    robust_replace: bool,
    name_seed: usize,
) -> Result<ReducedPlan> {
    if inline {
        inline_to_fixed_point(&mut arena, robust_replace);
    }

    assign_names(&mut arena, name_seed);

    let mut nodes: IndexMap<NodeId, Node> = IndexMap::new();
    for node in arena.into_iter() {
        if !node.inlined {
            nodes.insert(node.id, node);
        }
    }

    let order = topological_order(&nodes, top_level_order)?;

    check_no_unbound_identifiers(&nodes, &order)?;

    Ok(ReducedPlan { nodes, order })
}

fn inline_to_fixed_point(arena: &mut [Node], robust_replace: bool) {
    loop {
        let mut changed = false;
        // Leaves before containers, per `spec.md` §4.C's inlining tie-break.
        let mut ids: Vec<NodeId> = arena
            .iter()
            .filter(|n| !n.inlined)
            .map(|n| n.id)
            .collect();
        ids.sort_by_key(|id| match find(arena, *id).classification {
            Classification::Leaf => 0,
            Classification::Container => 1,
            Classification::TopLevel => 2,
        });

        'candidates: for id in ids {
            let (ref_count, classification, set_kind, pure) = {
                let node = find(arena, id);
                (node.ref_count, node.classification, node.set_kind, node.pure)
            };
            if classification == Classification::TopLevel {
                continue;
            }
            if ref_count != 1 || set_kind.is_some() || !pure {
                continue;
            }

            let parents = find(arena, id).parents.clone();
            if parents.len() != 1 {
                continue;
            }
            let parent_id = *parents.iter().next().unwrap();
            if parent_id == id {
                continue;
            }

            let placeholder = {
                let parent = find(arena, parent_id);
                match parent.args.iter().find(|(_, child)| **child == id) {
                    Some((ident, _)) => ident.clone(),
                    None => continue 'candidates,
                }
            };

            let child = take(arena, id);
            // `child`'s own args (if any survive the merge) become args of
            // `parent_id` directly; their recorded parent must follow, or a
            // later pass looks for them under the now-dead `id` node instead
            // of the live node that actually holds their placeholder.
            let grandchildren: Vec<NodeId> = child.args.values().copied().collect();
            inline_into(find_mut(arena, parent_id), &placeholder, child, robust_replace);
            for gc_id in grandchildren {
                let gc = find_mut(arena, gc_id);
                gc.parents.shift_remove(&id);
                gc.parents.insert(parent_id);
            }
            // the node's slot stays (to keep `NodeId` indices stable) but is
            // excluded from naming and from the final emission set.
            let tomb = find_mut(arena, id);
            tomb.inlined = true;
            changed = true;
        }

        if !changed {
            break;
        }
    }
}

fn find(arena: &[Node], id: NodeId) -> &Node {
    arena.iter().find(|n| n.id == id).expect("node id must exist")
}

fn find_mut(arena: &mut [Node], id: NodeId) -> &mut Node {
    arena.iter_mut().find(|n| n.id == id).expect("node id must exist")
}

fn take(arena: &mut [Node], id: NodeId) -> Node {
    find(arena, id).clone()
}

/// Inlines `child` into `parent` at the argument named `placeholder`,
/// renaming any of `child`'s own free identifiers that would otherwise
/// collide with `parent`'s remaining argument names. `placeholder` may
/// appear in `parent.expr`, `parent.post_stmts`, or both — a pickle-style
/// node's state is bound by a `post_stmts` template rather than `expr`, so
/// both must be rewritten or the placeholder is left dangling.
fn inline_into(parent: &mut Node, placeholder: &str, child: Node, robust_replace: bool) {
    let mut rename: IndexMap<String, String> = IndexMap::new();
    for ident in child.args.keys() {
        if ident != placeholder && parent.args.contains_key(ident) {
            let fresh = format!("{ident}__{}", parent.args.len() + rename.len());
            rename.insert(ident.clone(), fresh);
        }
    }

    let child_expr = if rename.is_empty() {
        child.expr.clone()
    } else {
        substitute(&child.expr, &rename, robust_replace)
    };

    let mapping = IndexMap::from([(placeholder.to_string(), child_expr)]);
    parent.expr = substitute(&parent.expr, &mapping, robust_replace);
    for stmt in parent.post_stmts.iter_mut() {
        *stmt = substitute(stmt, &mapping, robust_replace);
    }
    parent.args.shift_remove(placeholder);

    for (ident, node_id) in child.args {
        let final_ident = rename.get(&ident).cloned().unwrap_or(ident);
        parent.args.insert(final_ident, node_id);
    }
    parent.imports.extend(child.imports);
    parent.helpers.extend(child.helpers);
    // `child.pure` gated eligibility, so `post_stmts` is guaranteed empty.
    debug_assert!(child.post_stmts.is_empty());
}

/// Default (textual) substitution strategy: word-boundary pattern match.
fn substitute_textual(expr: &str, mapping: &IndexMap<String, String>) -> String {
    let mut out = expr.to_string();
    for (from, to) in mapping {
        let pattern = format!(r"\b{}\b", regex::escape(from));
        if let Ok(re) = Regex::new(&pattern) {
            out = re.replace_all(&out, to.as_str()).into_owned();
        }
    }
    out
}

/// `robust_replace` strategy: a quote-aware scan that skips identifier-
/// shaped text inside string literals, so substitution is safe even when an
/// expression embeds something that merely *looks* like a free identifier
/// inside a string (`spec.md` §4.C, "Substitution strategies"). This is not
/// a full Python parser — just enough structure (quote tracking) to avoid
/// the textual strategy's one real failure mode.
fn substitute_robust(expr: &str, mapping: &IndexMap<String, String>) -> String {
    let mut out = String::with_capacity(expr.len());
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    let mut in_string: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];
        if let Some(quote) = in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        if c == '\'' || c == '"' {
            in_string = Some(c);
            out.push(c);
            i += 1;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            match mapping.get(&ident) {
                Some(replacement) => out.push_str(replacement),
                None => out.push_str(&ident),
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Shared with `crate::emit`, which resolves each node's placeholder
/// identifiers to final names using the same two strategies.
pub(crate) fn substitute(expr: &str, mapping: &IndexMap<String, String>, robust: bool) -> String {
    if robust {
        substitute_robust(expr, mapping)
    } else {
        substitute_textual(expr, mapping)
    }
}

/// Every free identifier that will appear literally in some emitted `expr`
/// or `post_stmts` without going through substitution: import aliases,
/// helper names, and any bare word baked directly into a node's template
/// (most notably a `ClassRef` qualname, which is never run through
/// `identifier::validate` and so may coincide with a generated name).
/// `_gN` assignment must never hand out one of these (`spec.md` §4.C,
/// "no generated name collides with any free identifier").
fn collect_reserved_free_identifiers(arena: &[Node]) -> IndexSet<String> {
    let word = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("static pattern");
    let mut reserved = IndexSet::new();
    for node in arena {
        for import in &node.imports {
            reserved.insert(import.local_alias.clone());
        }
        for (name, _) in &node.helpers {
            reserved.insert(name.clone());
        }
        for text in std::iter::once(&node.expr).chain(node.post_stmts.iter()) {
            for token in word.find_iter(text) {
                let token = token.as_str();
                if token != "self" && !node.args.contains_key(token) {
                    reserved.insert(token.to_string());
                }
            }
        }
    }
    reserved
}

fn assign_names(arena: &mut [Node], seed: usize) {
    let reserved = collect_reserved_free_identifiers(arena);
    let mut counter = seed;
    // Ascending node id order is deterministic and matches first-encounter
    // order from the graph build (`spec.md` §4.D, "Determinism").
    let mut ids: Vec<NodeId> = arena.iter().map(|n| n.id).collect();
    ids.sort();
    for id in ids {
        let node = find_mut(arena, id);
        if node.inlined || node.name.is_some() {
            continue; // merged away, or already top-level-named
        }
        let mut candidate = format!("_g{counter}");
        counter += 1;
        while reserved.contains(&candidate) {
            candidate = format!("_g{counter}");
            counter += 1;
        }
        node.name = Some(candidate);
    }
}

/// Reverse-post-order DFS from each top-level node, in insertion order;
/// ties broken by node id (`spec.md` §4.C, "Topological ordering").
fn topological_order(
    nodes: &IndexMap<NodeId, Node>,
    top_level_order: &[NodeId],
) -> Result<Vec<NodeId>> {
    let mut visited: IndexSet<NodeId> = IndexSet::new();
    let mut post_order: Vec<NodeId> = Vec::new();
    let mut on_stack: IndexSet<NodeId> = IndexSet::new();

    fn visit(
        id: NodeId,
        nodes: &IndexMap<NodeId, Node>,
        visited: &mut IndexSet<NodeId>,
        on_stack: &mut IndexSet<NodeId>,
        post_order: &mut Vec<NodeId>,
    ) -> Result<()> {
        if visited.contains(&id) {
            return Ok(());
        }
        if on_stack.contains(&id) {
            return Err(Error::Cyclic);
        }
        on_stack.insert(id);

        if let Some(node) = nodes.get(&id) {
            let mut children: Vec<NodeId> = node.args.values().copied().collect();
            children.sort();
            for child in children {
                visit(child, nodes, visited, on_stack, post_order)?;
            }
        }

        on_stack.shift_remove(&id);
        visited.insert(id);
        post_order.push(id);
        Ok(())
    }

    for &id in top_level_order {
        visit(id, nodes, &mut visited, &mut on_stack, &mut post_order)?;
    }

    Ok(post_order)
}

fn check_no_unbound_identifiers(nodes: &IndexMap<NodeId, Node>, order: &[NodeId]) -> Result<()> {
    let mut defined: IndexSet<NodeId> = IndexSet::new();
    for &id in order {
        let node = nodes.get(&id).expect("ordered node must be live");
        for child in node.args.values() {
            if !defined.contains(child) && !nodes.contains_key(child) {
                return Err(Error::UnboundFreeIdentifier {
                    name: format!("{child:?}"),
                    in_expr: node.expr.clone(),
                });
            }
        }
        defined.insert(id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{IdentityKey, Value};

    fn bare_node(id: usize, expr: &str) -> Node {
        Node {
            id: NodeId(id),
            identity: IdentityKey::Atom(Value::Int(id as i128)),
            expr: expr.to_string(),
            args: IndexMap::new(),
            imports: Vec::new(),
            post_stmts: Vec::new(),
            pure: true,
            set_kind: None,
            helpers: Vec::new(),
            name: None,
            aliases: Vec::new(),
            parents: IndexSet::new(),
            ref_count: 1,
            classification: Classification::Container,
            inlined: false,
        }
    }

    #[test]
    fn inlining_cascades_through_a_nested_pure_container() {
        // middle (container) still holds grandchild as a live arg at the
        // moment middle itself gets inlined into outer — grandchild's
        // `parents` must be repointed from the now-dead middle to outer, or
        // the next step in this same pass looks for it under a tombstoned
        // node and the merge into outer never happens.
        let mut grandchild = bare_node(0, "[42]");
        grandchild.classification = Classification::Container;
        grandchild.parents.insert(NodeId(1));

        let mut middle = bare_node(1, "[m0]");
        middle.classification = Classification::Container;
        middle.args.insert("m0".to_string(), NodeId(0));
        middle.parents.insert(NodeId(2));

        let mut outer = bare_node(2, "[a0]");
        outer.classification = Classification::TopLevel;
        outer.args.insert("a0".to_string(), NodeId(1));
        outer.name = Some("top".to_string());

        let arena = vec![middle, grandchild, outer];
        let plan = reduce(arena, &[NodeId(2)], true, false, 0).unwrap();

        assert_eq!(plan.nodes.len(), 1);
        assert_eq!(plan.order, vec![NodeId(2)]);
        assert_eq!(plan.nodes[&NodeId(2)].expr, "[[42]]");
    }

    #[test]
    fn assign_names_skips_a_name_colliding_with_a_literal_identifier() {
        // Simulates a `ClassRef` whose qualname happens to be `_g0`: the
        // literal text `_g0` appears in a node's `expr` without going
        // through substitution, so it must never also be handed out as a
        // generated name.
        let mut arena = vec![bare_node(0, "_g0.Thing.__new__(_g0.Thing)"), bare_node(1, "1")];
        assign_names(&mut arena, 0);
        let names: Vec<String> = arena.iter().map(|n| n.name.clone().unwrap()).collect();
        assert!(!names.contains(&"_g0".to_string()));
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
    }

    #[test]
    fn robust_replace_skips_string_contents() {
        let mapping = IndexMap::from([("a0".to_string(), "_g3".to_string())]);
        let expr = "['a0 is not a variable', a0]";
        let out = substitute_robust(expr, &mapping);
        assert_eq!(out, "['a0 is not a variable', _g3]");
    }

    #[test]
    fn textual_replace_is_word_bounded() {
        let mapping = IndexMap::from([("a0".to_string(), "_g3".to_string())]);
        let expr = "[a0, a01]";
        let out = substitute_textual(expr, &mapping);
        assert_eq!(out, "[_g3, a01]");
    }
}
