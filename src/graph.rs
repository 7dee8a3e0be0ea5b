use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};
use crate::registry::{BuildEnv, RepTriple, Registry};
use crate::value::{identity_key, IdentityKey, Value};

/// Stable numeric id of a node in the build arena. Indexes directly into
/// `GraphBuilder::arena` / the reducer's node vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Deref)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Container,
    Leaf,
    TopLevel,
}

/// A graph vertex: the value it wraps, its resolved rep triple (free
/// identifiers already turned into `NodeId` edges), and the bookkeeping the
/// reducer (`crate::reduce`) mutates in place (`spec.md` §3, "Lifecycle").
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub identity: IdentityKey,
    pub expr: String,
    pub args: IndexMap<String, NodeId>,
    pub imports: Vec<crate::registry::Import>,
    pub post_stmts: Vec<String>,
    pub pure: bool,
    pub set_kind: Option<crate::registry::handlers::SetKind>,
    pub helpers: Vec<(String, String)>,
    pub name: Option<String>,
    /// Additional top-level names bound to this same node, for the edge
    /// case where two distinct `insert` calls alias the same value — the
    /// emitter renders these as `alias = primary` follow-up lines.
    pub aliases: Vec<String>,
    pub parents: IndexSet<NodeId>,
    pub ref_count: usize,
    pub classification: Classification,
    /// Set by the reducer once this node has been merged into its parent's
    /// expression; excludes it from both naming and the final emission set
    /// (`crate::reduce`).
    pub inlined: bool,
}

/// Component B: walks every inserted top-level value, deduplicating shared
/// sub-objects by identity key and recording parent -> child edges. The
/// walk is driven by an explicit stack rather than recursion so that
/// traversal depth is not bounded by a fixed architectural limit
/// (`spec.md` §4.B).
pub struct GraphBuilder<'a> {
    registry: &'a Registry,
    env: BuildEnv<'a>,
    arena: Vec<Node>,
    identity_table: IndexMap<IdentityKey, NodeId>,
    in_progress: IndexSet<IdentityKey>,
}

enum Frame {
    Visit(Value),
    Finish(IdentityKey, RepTriple),
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a Registry, env: BuildEnv<'a>) -> Self {
        Self {
            registry,
            env,
            arena: Vec::new(),
            identity_table: IndexMap::new(),
            in_progress: IndexSet::new(),
        }
    }

    /// Walk `value`, returning the id of its (possibly pre-existing) node.
    /// Called once per top-level insert and, transitively, for every
    /// sub-value a representer's `args` names.
    pub fn visit(&mut self, value: &Value) -> Result<NodeId> {
        let mut stack = vec![Frame::Visit(value.clone())];
        let mut last: Option<NodeId> = None;

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Visit(v) => {
                    let key = identity_key(&v);
                    if let Some(&id) = self.identity_table.get(&key) {
                        self.arena[id.0].ref_count += 1;
                        last = Some(id);
                        continue;
                    }
                    if self.in_progress.contains(&key) {
                        return Err(Error::Cyclic);
                    }
                    self.in_progress.insert(key.clone());

                    let triple = self
                        .registry
                        .represent(&v, &mut self.env)
                        .ok_or_else(|| Error::not_representable(class_of(&v)))?;

                    // Children must resolve before `Finish` runs so it can
                    // look each one up in `identity_table`; since this is a
                    // LIFO stack, push `Finish` first, then children in
                    // reverse so the first child is processed first.
                    let children: Vec<Value> = triple.args.values().cloned().collect();
                    stack.push(Frame::Finish(key, triple));
                    for child in children.into_iter().rev() {
                        stack.push(Frame::Visit(child));
                    }
                }
                Frame::Finish(key, triple) => {
                    self.in_progress.shift_remove(&key);

                    let mut args = IndexMap::new();
                    for (ident, sub_value) in &triple.args {
                        let child_key = identity_key(sub_value);
                        let child_id = *self.identity_table.get(&child_key).unwrap_or_else(|| {
                            panic!("child of node must be visited immediately before its parent finishes")
                        });
                        args.insert(ident.clone(), child_id);
                    }

                    let id = NodeId(self.arena.len());
                    for child_id in args.values() {
                        self.arena[child_id.0].parents.insert(id);
                    }

                    let classification = if args.is_empty() {
                        Classification::Leaf
                    } else {
                        Classification::Container
                    };

                    self.arena.push(Node {
                        id,
                        identity: key.clone(),
                        expr: triple.expr,
                        args,
                        imports: triple.imports,
                        post_stmts: triple.post_stmts,
                        pure: triple.pure,
                        set_kind: triple.set_kind,
                        helpers: triple.helpers,
                        name: None,
                        aliases: Vec::new(),
                        parents: IndexSet::new(),
                        ref_count: 1,
                        classification,
                        inlined: false,
                    });
                    self.identity_table.insert(key, id);
                    last = Some(id);
                }
            }
        }

        Ok(last.expect("visit always produces a node id"))
    }

    /// Marks `id` as a top-level node and gives it its user-chosen name.
    /// Top-level name collisions are the caller's (`Archive::insert`)
    /// responsibility to reject before this is called.
    pub fn mark_top_level(&mut self, id: NodeId, name: String) {
        let node = &mut self.arena[id.0];
        node.classification = Classification::TopLevel;
        match &node.name {
            None => node.name = Some(name),
            Some(_) => node.aliases.push(name),
        }
    }

    pub fn finish(self) -> (Vec<Node>, usize) {
        (self.arena, *self.env.name_counter)
    }
}

fn class_of(value: &Value) -> Option<crate::value::ClassRef> {
    match value {
        Value::Object(rc) => Some(rc.borrow().class.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Config;
    use crate::registry::Registry;
    use crate::sidecar::ArraySidecar;
    use std::rc::Rc;

    fn builder<'a>(
        registry: &'a Registry,
        config: &'a Config,
        sidecar: &'a mut ArraySidecar,
        counter: &'a mut usize,
    ) -> GraphBuilder<'a> {
        GraphBuilder::new(
            registry,
            BuildEnv {
                config,
                sidecar,
                name_counter: counter,
            },
        )
    }

    #[test]
    fn shared_list_elements_collapse_to_one_node() {
        let registry = Registry::with_builtins();
        let config = Config::default();
        let mut sidecar = ArraySidecar::new();
        let mut counter = 0;
        let mut b = builder(&registry, &config, &mut sidecar, &mut counter);

        let shared = Value::str("shared");
        let list = Value::list(vec![shared.clone(), shared.clone()]);
        let id = b.visit(&list).unwrap();

        let (arena, _) = b.finish();
        let node = &arena[id.0];
        let first = node.args["a0"];
        let second = node.args["a1"];
        assert_eq!(first, second);
    }

    #[test]
    fn self_referential_list_is_cyclic() {
        use std::cell::RefCell;
        let registry = Registry::with_builtins();
        let config = Config::default();
        let mut sidecar = ArraySidecar::new();
        let mut counter = 0;
        let mut b = builder(&registry, &config, &mut sidecar, &mut counter);

        let cell = Rc::new(RefCell::new(Vec::new()));
        let list = Value::List(cell.clone());
        cell.borrow_mut().push(list.clone());

        let err = b.visit(&list).unwrap_err();
        assert!(matches!(err, Error::Cyclic));
    }
}
