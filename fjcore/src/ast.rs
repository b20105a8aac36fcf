//! Parsed representation of a `.fj` file: one [`Item`] per top-level or
//! nested construct, exactly tracking the grammar in §4.1. Expressions are
//! stored by [`ExprId`] into the caller-owned [`crate::expr::ExprArena`].

use crate::diag::SourceLocation;
use crate::expr::ExprId;

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub value_params: Vec<String>,
    pub label_in_params: Vec<String>,
    pub label_out_params: Vec<String>,
    pub body: Vec<Item>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct Rep {
    pub count: ExprId,
    pub var: String,
    pub body: Box<Item>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct ConstDef {
    pub name: String,
    pub value: ExprId,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct Include {
    pub path: String,
    pub loc: SourceLocation,
}

/// Every call-site argument is parsed as an expression; the preprocessor
/// decides per-position whether it's a value (evaluated/substituted) or a
/// label reference (its `LabelRef` name is aliased) based on the callee's
/// parameter kind, not on call-site syntax.
#[derive(Debug, Clone)]
pub struct MacroCall {
    pub name: String,
    pub args: Vec<ExprId>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct LabelDef {
    pub name: String,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct StringItem {
    pub value: String,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct Op {
    pub a: Option<ExprId>,
    pub b: Option<ExprId>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub enum Item {
    MacroDef(MacroDef),
    Rep(Rep),
    ConstDef(ConstDef),
    Include(Include),
    MacroCall(MacroCall),
    LabelDef(LabelDef),
    StringItem(StringItem),
    Op(Op),
    /// A block of items with no macro header — appears as a rep's body or
    /// (degenerately) as a nested `{ ... }` group.
    Block(Vec<Item>),
}

#[derive(Debug, Clone, Default)]
pub struct File {
    pub items: Vec<Item>,
}
