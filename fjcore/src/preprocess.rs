//! Recursive macro/rep expansion with lexical scoping, hygiene, and cycle
//! detection, per §4.3. Input is a fully include-resolved [`ast::File`];
//! output is a flat, ordered sequence of [`PreprocItem`]s.

use crate::ast::{self, Item};
use crate::diag::{FqName, SourceLocation, StackArena, StackFrameId};
use crate::error::PreprocessError;
use crate::expr::{BinOp, ExprArena, ExprId};
use crate::macros::{DefId, LookupResult, MacroRegistry};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::collections::HashMap;

type Result<T> = std::result::Result<T, PreprocessError>;

#[derive(Debug, Clone)]
pub enum PreprocItem {
    Op {
        a: Option<ExprId>,
        b: Option<ExprId>,
        stack: Option<StackFrameId>,
        loc: SourceLocation,
    },
    LabelDef {
        name: FqName,
        stack: Option<StackFrameId>,
        loc: SourceLocation,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct PreprocessConfig {
    pub max_depth: usize,
}

impl Default for PreprocessConfig {
    fn default() -> PreprocessConfig {
        PreprocessConfig { max_depth: 900 }
    }
}

/// A flat `Vec`-backed scope, per the design note in §9: these scopes are
/// small, so a linear scan beats a `HashMap`'s overhead.
#[derive(Debug, Clone, Default)]
struct SmallEnv<V>(Vec<(String, V)>);

impl<V: Clone> SmallEnv<V> {
    fn get(&self, name: &str) -> Option<&V> {
        self.0.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn bind(&mut self, name: String, value: V) {
        self.0.push((name, value));
    }
}

/// Everything needed to resolve a name reference while expanding one
/// macro-body instantiation (or the top-level file, which has empty
/// params/locals).
struct Scope {
    /// Hygiene namespace: the invocation-qualified path used to rename this
    /// instantiation's own local labels uniquely (includes an invocation id
    /// per call, so two calls to the same macro never collide).
    namespace: FqName,
    /// Static lexical-nesting namespace: mirrors exactly the path
    /// `collect_macros` walked when registering macro definitions (no
    /// invocation ids), so macro-call resolution can walk it as an ancestor
    /// chain against the registry.
    def_namespace: FqName,
    values: SmallEnv<ExprId>,
    aliases: SmallEnv<FqName>,
    locals: HashMap<String, FqName>,
    parent_stack: Option<StackFrameId>,
}

/// The namespace root every top-level item and macro definition is
/// registered/expanded under. Callers building a [`MacroRegistry`] via
/// [`crate::macros::collect_macros`] before invoking [`preprocess`] must use
/// this same root so qualified lookups agree.
pub fn top_level_namespace() -> FqName {
    FqName::simple("top")
}

impl Scope {
    fn top_level() -> Scope {
        Scope {
            namespace: top_level_namespace(),
            def_namespace: top_level_namespace(),
            values: SmallEnv::default(),
            aliases: SmallEnv::default(),
            locals: HashMap::new(),
            parent_stack: None,
        }
    }

    fn resolve_label(&self, name: &str) -> Option<FqName> {
        if let Some(alias) = self.aliases.get(name) {
            return Some(alias.clone());
        }
        if let Some(local) = self.locals.get(name) {
            return Some(local.clone());
        }
        None
    }
}

struct Preprocessor<'a> {
    registry: &'a MacroRegistry,
    arena: &'a mut ExprArena,
    stack_arena: &'a mut StackArena,
    config: PreprocessConfig,
    next_invocation_id: u64,
    out: Vec<PreprocItem>,
}

/// Expands a fully include-resolved file into a flat op/label stream.
pub fn preprocess(
    file: &ast::File,
    registry: &MacroRegistry,
    arena: &mut ExprArena,
    stack_arena: &mut StackArena,
    config: PreprocessConfig,
) -> Result<Vec<PreprocItem>> {
    let mut pp = Preprocessor {
        registry,
        arena,
        stack_arena,
        config,
        next_invocation_id: 0,
        out: Vec::new(),
    };
    let scope = Scope::top_level();
    pp.expand_items(&file.items, &scope, 0)?;
    Ok(pp.out)
}

impl<'a> Preprocessor<'a> {
    fn expand_items(&mut self, items: &[Item], scope: &Scope, depth: usize) -> Result<()> {
        // ConstDef extends the scope for subsequent items at this nesting
        // level only, so we clone the (cheap, small) scope's value env
        // on demand rather than threading `&mut Scope` through recursion.
        let mut local_values = scope.values.clone();
        for item in items {
            match item {
                Item::MacroDef(_) => {
                    // Already registered by `collect_macros`; a definition
                    // contributes no items of its own at its point of
                    // appearance.
                }
                Item::ConstDef(const_def) => {
                    let value = self.substitute_expr(const_def.value, scope, &local_values)?;
                    local_values.bind(const_def.name.clone(), value);
                }
                Item::Include(_) => {
                    unreachable!("includes must be resolved before preprocessing")
                }
                Item::Op(op) => {
                    let a = op
                        .a
                        .map(|id| self.substitute_expr(id, scope, &local_values))
                        .transpose()?;
                    let b = op
                        .b
                        .map(|id| self.substitute_expr(id, scope, &local_values))
                        .transpose()?;
                    self.out.push(PreprocItem::Op {
                        a,
                        b,
                        stack: scope.parent_stack,
                        loc: op.loc,
                    });
                }
                Item::LabelDef(label) => {
                    let name = scope
                        .resolve_label(&label.name)
                        .unwrap_or_else(|| FqName::simple(label.name.clone()));
                    self.out.push(PreprocItem::LabelDef {
                        name,
                        stack: scope.parent_stack,
                        loc: label.loc,
                    });
                }
                Item::StringItem(string_item) => {
                    self.expand_string(string_item, scope);
                }
                Item::Block(block_items) => {
                    self.expand_items(block_items, scope, depth)?;
                }
                Item::Rep(rep) => {
                    self.expand_rep(rep, scope, &local_values, depth)?;
                }
                Item::MacroCall(call) => {
                    self.expand_call(call, scope, &local_values, depth)?;
                }
            }
        }
        Ok(())
    }

    fn expand_rep(
        &mut self,
        rep: &ast::Rep,
        scope: &Scope,
        values: &SmallEnv<ExprId>,
        depth: usize,
    ) -> Result<()> {
        let count_expr = self.substitute_expr(rep.count, scope, values)?;
        let labels = HashMap::new();
        let count = crate::expr::eval(self.arena, count_expr, &labels).map_err(|err| {
            match err {
                crate::expr::EvalError::UnresolvedLabel(_) => {
                    PreprocessError::UnresolvedRepCount { loc: rep.loc }
                }
                other => PreprocessError::Eval(other),
            }
        })?;
        let count = count
            .to_i64()
            .ok_or(PreprocessError::UnresolvedRepCount { loc: rep.loc })?;

        for i in 0..count {
            let mut iter_values = values.clone();
            let index_expr = self.arena.const_of(BigInt::from(i));
            iter_values.bind(rep.var.clone(), index_expr);
            let iter_scope = Scope {
                namespace: scope.namespace.clone(),
                def_namespace: scope.def_namespace.clone(),
                values: iter_values,
                aliases: scope.aliases.clone(),
                locals: scope.locals.clone(),
                parent_stack: scope.parent_stack,
            };
            self.expand_items(std::slice::from_ref(rep.body.as_ref()), &iter_scope, depth)?;
        }
        Ok(())
    }

    fn expand_call(
        &mut self,
        call: &ast::MacroCall,
        scope: &Scope,
        values: &SmallEnv<ExprId>,
        depth: usize,
    ) -> Result<()> {
        if depth >= self.config.max_depth {
            let stack = self
                .stack_arena
                .trace(scope.parent_stack)
                .into_iter()
                .map(|frame| frame.macro_name.clone())
                .collect();
            return Err(PreprocessError::MacroRecursion {
                limit: self.config.max_depth,
                loc: call.loc,
                stack,
            });
        }

        let lookup = self.registry.lookup(&scope.def_namespace, &call.name, call.args.len());
        let def_id = match lookup {
            LookupResult::Found(id) => id,
            LookupResult::NotFound => {
                return Err(PreprocessError::UndefinedMacro {
                    name: FqName::simple(call.name.clone()),
                    loc: call.loc,
                })
            }
            LookupResult::Ambiguous => {
                return Err(PreprocessError::AmbiguousMacro {
                    name: FqName::simple(call.name.clone()),
                    loc: call.loc,
                })
            }
        };

        let def = self.registry.get(def_id).clone();
        let expected = def.value_params.len() + def.label_in_params.len() + def.label_out_params.len();
        if call.args.len() != expected {
            return Err(PreprocessError::MacroArityMismatch {
                name: FqName::simple(def.name.clone()),
                expected,
                got: call.args.len(),
                loc: call.loc,
            });
        }

        // Substitute every argument expression against the *caller's*
        // current scope before binding it into the callee's — an argument
        // may itself reference the caller's own params/locals.
        let substituted: Vec<ExprId> = call
            .args
            .iter()
            .map(|&id| self.substitute_expr(id, scope, values))
            .collect::<Result<_>>()?;

        let mut split = substituted.into_iter();
        let value_args: Vec<ExprId> = (&mut split).take(def.value_params.len()).collect();
        let label_in_args: Vec<ExprId> = (&mut split).take(def.label_in_params.len()).collect();
        let label_out_args: Vec<ExprId> = split.collect();

        let invocation_id = self.next_invocation_id;
        self.next_invocation_id += 1;

        let mut new_values = SmallEnv::default();
        for (name, value) in def.value_params.iter().zip(value_args) {
            new_values.bind(name.clone(), value);
        }

        let mut new_aliases = SmallEnv::default();
        for (name, arg) in def
            .label_in_params
            .iter()
            .chain(def.label_out_params.iter())
            .zip(label_in_args.into_iter().chain(label_out_args))
        {
            let resolved = self
                .arena
                .as_label_ref(arg)
                .cloned()
                .ok_or(PreprocessError::ExpectedLabelArgument { loc: call.loc })?;
            new_aliases.bind(name.clone(), resolved);
        }

        let body_namespace = scope
            .namespace
            .join(def.name.as_str())
            .join(invocation_id.to_string());
        let def_namespace = scope.def_namespace.join(def.name.as_str());
        let locals = collect_local_labels(&def.body, &body_namespace);

        let frame_name = FqName::simple(def.name.clone());
        let frame_id = self
            .stack_arena
            .push(scope.parent_stack, frame_name, call.loc);

        let callee_scope = Scope {
            namespace: body_namespace,
            def_namespace,
            values: new_values,
            aliases: new_aliases,
            locals,
            parent_stack: Some(frame_id),
        };

        self.expand_items(&def.body, &callee_scope, depth + 1)
    }

    fn expand_string(&mut self, string_item: &ast::StringItem, scope: &Scope) {
        let io = self.arena.label_ref(FqName::simple("IO"));
        for byte in string_item.value.bytes() {
            for bit_index in 0..8 {
                let bit = (byte >> bit_index) & 1;
                let offset = self.arena.const_of(BigInt::from(bit));
                let addr = self.arena.binary(BinOp::Add, io, offset);
                self.out.push(PreprocItem::Op {
                    a: Some(addr),
                    b: None,
                    stack: scope.parent_stack,
                    loc: string_item.loc,
                });
            }
        }
    }

    /// Rewrites every `LabelRef` in `id`'s subtree according to `scope`,
    /// leaving value-param references already resolved by reusing the
    /// bound `ExprId` directly rather than rebuilding it. Non-parameter,
    /// non-local names (globals, stdlib labels, forward references) pass
    /// through unchanged for the assembler to resolve later.
    fn substitute_expr(&mut self, id: ExprId, scope: &Scope, values: &SmallEnv<ExprId>) -> Result<ExprId> {
        use crate::expr::Expr;
        match self.arena.get(id).clone() {
            Expr::Const(_) => Ok(id),
            Expr::LabelRef(name) => {
                let simple = name.segments().first().map(|s| s.to_string()).unwrap_or_default();
                if name.segments().len() == 1 {
                    if let Some(&value) = values.get(&simple) {
                        return Ok(value);
                    }
                    if let Some(resolved) = scope.resolve_label(&simple) {
                        return Ok(self.arena.label_ref(resolved));
                    }
                }
                Ok(id)
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.substitute_expr(lhs, scope, values)?;
                let r = self.substitute_expr(rhs, scope, values)?;
                Ok(if l == lhs && r == rhs {
                    id
                } else {
                    self.arena.binary(op, l, r)
                })
            }
            Expr::Unary(op, operand) => {
                let v = self.substitute_expr(operand, scope, values)?;
                Ok(if v == operand { id } else { self.arena.unary(op, v) })
            }
            Expr::Ternary(cond, then, otherwise) => {
                let c = self.substitute_expr(cond, scope, values)?;
                let t = self.substitute_expr(then, scope, values)?;
                let o = self.substitute_expr(otherwise, scope, values)?;
                Ok(if c == cond && t == then && o == otherwise {
                    id
                } else {
                    self.arena.ternary(c, t, o)
                })
            }
        }
    }
}

/// Pre-scans a macro body for every label it declares directly (through
/// nested `rep`/block items, but not through nested macro calls or nested
/// macro definitions, which are separate scopes), building the hygienic
/// rename table for this one invocation.
fn collect_local_labels(items: &[Item], body_namespace: &FqName) -> HashMap<String, FqName> {
    let mut locals = HashMap::new();
    collect_local_labels_into(items, body_namespace, &mut locals);
    locals
}

fn collect_local_labels_into(items: &[Item], body_namespace: &FqName, locals: &mut HashMap<String, FqName>) {
    for item in items {
        match item {
            Item::LabelDef(label) => {
                locals
                    .entry(label.name.clone())
                    .or_insert_with(|| body_namespace.join(label.name.as_str()));
            }
            Item::Rep(rep) => {
                collect_local_labels_into(std::slice::from_ref(rep.body.as_ref()), body_namespace, locals)
            }
            Item::Block(block_items) => collect_local_labels_into(block_items, body_namespace, locals),
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diag::Files;
    use crate::macros::MacroRegistry;

    fn run(source: &str) -> Vec<PreprocItem> {
        let mut files = Files::new();
        let file_id = files.add(std::path::PathBuf::from("<test>"));
        let mut arena = ExprArena::new();
        let ast_file = crate::parser::parse(source, file_id, &mut arena).unwrap();

        let mut registry = MacroRegistry::new();
        crate::macros::collect_macros(&ast_file.items, &top_level_namespace(), &mut registry);

        let mut stack_arena = StackArena::new();
        preprocess(
            &ast_file,
            &registry,
            &mut arena,
            &mut stack_arena,
            PreprocessConfig::default(),
        )
        .unwrap()
    }

    fn label_names(items: &[PreprocItem]) -> Vec<String> {
        items
            .iter()
            .filter_map(|item| match item {
                PreprocItem::LabelDef { name, .. } => Some(name.to_string()),
                PreprocItem::Op { .. } => None,
            })
            .collect()
    }

    #[test]
    fn two_invocations_of_the_same_macro_get_distinct_hygienic_labels() {
        let source = "def twice() {\n  here:\n  ;here\n}\ntwice();\ntwice();\n";
        let items = run(source);
        let names = label_names(&items);
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
        assert!(names[0].starts_with("top.twice."));
        assert!(names[1].starts_with("top.twice."));
    }

    #[test]
    fn value_parameter_is_substituted_into_the_macro_body() {
        let mut files = Files::new();
        let file_id = files.add(std::path::PathBuf::from("<test>"));
        let mut arena = ExprArena::new();
        let source = "def set(n) {\n  n;0\n}\nset(7);\n";
        let ast_file = crate::parser::parse(source, file_id, &mut arena).unwrap();

        let mut registry = MacroRegistry::new();
        crate::macros::collect_macros(&ast_file.items, &top_level_namespace(), &mut registry);

        let mut stack_arena = StackArena::new();
        let items = preprocess(
            &ast_file,
            &registry,
            &mut arena,
            &mut stack_arena,
            PreprocessConfig::default(),
        )
        .unwrap();

        let op_a = items
            .iter()
            .find_map(|item| match item {
                PreprocItem::Op { a, .. } => *a,
                _ => None,
            })
            .expect("one op with a resolved `a`");
        let labels = HashMap::new();
        let value = crate::expr::eval(&arena, op_a, &labels).unwrap();
        assert_eq!(value, BigInt::from(7));
    }

    #[test]
    fn label_argument_must_be_a_bare_label_reference() {
        let source = "def jump_to(<target) {\n  ;target\n}\njump_to(1+1);\n";
        let mut files = Files::new();
        let file_id = files.add(std::path::PathBuf::from("<test>"));
        let mut arena = ExprArena::new();
        let ast_file = crate::parser::parse(source, file_id, &mut arena).unwrap();

        let mut registry = MacroRegistry::new();
        crate::macros::collect_macros(&ast_file.items, &top_level_namespace(), &mut registry);

        let mut stack_arena = StackArena::new();
        let err = preprocess(
            &ast_file,
            &registry,
            &mut arena,
            &mut stack_arena,
            PreprocessConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PreprocessError::ExpectedLabelArgument { .. }));
    }

    #[test]
    fn rep_unrolls_its_body_once_per_iteration() {
        let source = "rep(3, i) i;0\n";
        let items = run(source);
        let ops: Vec<_> = items
            .iter()
            .filter(|item| matches!(item, PreprocItem::Op { .. }))
            .collect();
        assert_eq!(ops.len(), 3);
    }
}
