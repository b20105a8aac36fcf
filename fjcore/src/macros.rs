//! Macro registry: an arena of definitions addressed by index, looked up
//! by `(name, arity)` per §4.2.

use crate::ast::MacroDef;
use crate::diag::FqName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefId(pub u32);

/// What a fully-qualified `(namespace.name, arity)` key resolves to. A
/// second `register` under the same key doesn't overwrite the first — it's
/// marked ambiguous instead, since nothing at that exact nesting level can
/// tell the two definitions apart.
#[derive(Debug, Clone)]
enum QualifiedEntry {
    Unique(DefId),
    Ambiguous,
}

#[derive(Debug, Default)]
pub struct MacroRegistry {
    defs: Vec<MacroDef>,
    /// Fully-qualified name + arity -> definition, keyed on the exact
    /// namespace a `def` was registered under (see [`collect_macros`]).
    by_qualified: std::collections::HashMap<(String, usize), QualifiedEntry>,
}

impl MacroRegistry {
    pub fn new() -> MacroRegistry {
        MacroRegistry::default()
    }

    pub fn register(&mut self, namespace: &FqName, def: MacroDef) -> DefId {
        let arity = def.value_params.len() + def.label_in_params.len() + def.label_out_params.len();
        let id = DefId(self.defs.len() as u32);
        let qualified = format!("{namespace}.{}", def.name);
        self.by_qualified
            .entry((qualified, arity))
            .and_modify(|entry| *entry = QualifiedEntry::Ambiguous)
            .or_insert(QualifiedEntry::Unique(id));
        self.defs.push(def);
        id
    }

    pub fn get(&self, id: DefId) -> &MacroDef {
        &self.defs[id.0 as usize]
    }

    /// Walks `caller_namespace`'s ancestor chain — the namespace itself
    /// first, then each enclosing scope out to the top level — looking each
    /// one up fully qualified. This is the actual lexical-scope-chain walk:
    /// a macro defined in an enclosing `def`'s body shadows a same-named one
    /// further out, and two unrelated macros in sibling scopes never
    /// collide, since neither's namespace is an ancestor of the other's
    /// call sites.
    pub fn lookup(&self, caller_namespace: &FqName, name: &str, arity: usize) -> LookupResult {
        let segments = caller_namespace.segments();
        for len in (1..=segments.len()).rev() {
            let prefix = segments[..len]
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join(".");
            let qualified = format!("{prefix}.{name}");
            match self.by_qualified.get(&(qualified, arity)) {
                Some(QualifiedEntry::Unique(id)) => return LookupResult::Found(*id),
                Some(QualifiedEntry::Ambiguous) => return LookupResult::Ambiguous,
                None => continue,
            }
        }
        LookupResult::NotFound
    }
}

pub enum LookupResult {
    Found(DefId),
    NotFound,
    Ambiguous,
}

/// Walks `items`, registering every [`crate::ast::Item::MacroDef`] found —
/// recursing into a definition's own body so nested `def`s acquire the
/// enclosing namespace prefix, and also into [`crate::ast::Item::Block`]
/// and [`crate::ast::Item::Rep`] (both of which carry items at the *same*
/// namespace, not a nested one) so macros defined inside an `include`d file
/// — spliced in as a `Block` — or inside a `rep` body are registered too,
/// per §4.2/§4.5.
pub fn collect_macros(items: &[crate::ast::Item], namespace: &FqName, registry: &mut MacroRegistry) {
    for item in items {
        match item {
            crate::ast::Item::MacroDef(def) => {
                let inner_namespace = namespace.join(def.name.as_str());
                collect_macros(&def.body, &inner_namespace, registry);
                registry.register(namespace, def.clone());
            }
            crate::ast::Item::Block(nested) => {
                collect_macros(nested, namespace, registry);
            }
            crate::ast::Item::Rep(rep) => {
                collect_macros(std::slice::from_ref(rep.body.as_ref()), namespace, registry);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::Item;
    use crate::diag::{FileId, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::new(FileId(0), 1, 1)
    }

    fn def(name: &str, body: Vec<Item>) -> MacroDef {
        MacroDef {
            name: name.to_owned(),
            value_params: Vec::new(),
            label_in_params: Vec::new(),
            label_out_params: Vec::new(),
            body,
            loc: loc(),
        }
    }

    #[test]
    fn same_named_macros_in_sibling_scopes_do_not_collide() {
        let top = FqName::simple("top");
        let helper_a = Item::MacroDef(def("helper", Vec::new()));
        let helper_b = Item::MacroDef(def("helper", Vec::new()));
        let a = Item::MacroDef(def("a", vec![helper_a]));
        let b = Item::MacroDef(def("b", vec![helper_b]));

        let mut registry = MacroRegistry::new();
        collect_macros(&[a, b], &top, &mut registry);

        match registry.lookup(&top.join("a"), "helper", 0) {
            LookupResult::Found(_) => {}
            _ => panic!("helper nested in `a` should resolve uniquely from within `a`"),
        }
        match registry.lookup(&top.join("b"), "helper", 0) {
            LookupResult::Found(_) => {}
            _ => panic!("helper nested in `b` should resolve uniquely from within `b`"),
        }
    }

    #[test]
    fn inner_definition_shadows_an_outer_one_with_the_same_name() {
        let top = FqName::simple("top");
        let inner_helper = Item::MacroDef(def("helper", Vec::new()));
        let outer = Item::MacroDef(def("outer", vec![inner_helper]));
        let top_helper = Item::MacroDef(def("helper", Vec::new()));

        let mut registry = MacroRegistry::new();
        collect_macros(&[outer, top_helper], &top, &mut registry);

        let from_inside_outer = registry.lookup(&top.join("outer"), "helper", 0);
        let outer_id = match from_inside_outer {
            LookupResult::Found(id) => id,
            _ => panic!("expected the nested `helper` to shadow the top-level one"),
        };
        let from_top = match registry.lookup(&top, "helper", 0) {
            LookupResult::Found(id) => id,
            _ => panic!("expected the top-level `helper` to still resolve from the top level"),
        };
        assert_ne!(outer_id.0, from_top.0);
    }

    #[test]
    fn macros_recursed_into_from_blocks_and_reps_are_registered() {
        use crate::ast::Rep;
        use crate::expr::ExprArena;

        let mut arena = ExprArena::new();
        let count = arena.const_of(num_bigint::BigInt::from(1));

        let blocked = Item::Block(vec![Item::MacroDef(def("from_block", Vec::new()))]);
        let repped = Item::Rep(Rep {
            count,
            var: "i".to_owned(),
            body: Box::new(Item::MacroDef(def("from_rep", Vec::new()))),
            loc: loc(),
        });

        let top = FqName::simple("top");
        let mut registry = MacroRegistry::new();
        collect_macros(&[blocked, repped], &top, &mut registry);

        assert!(matches!(registry.lookup(&top, "from_block", 0), LookupResult::Found(_)));
        assert!(matches!(registry.lookup(&top, "from_rep", 0), LookupResult::Found(_)));
    }
}
