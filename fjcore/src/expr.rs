//! The symbolic arithmetic tree over integers and label names described in
//! §3 of the spec, stored as a tagged-sum arena rather than `Box`ed nodes
//! so that cloning an expression (common when a macro's body is expanded
//! once per invocation) is a cheap index copy.

use crate::diag::FqName;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(BigInt),
    LabelRef(FqName),
    Binary(BinOp, ExprId, ExprId),
    Unary(UnOp, ExprId),
    Ternary(ExprId, ExprId, ExprId),
}

#[derive(Debug, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
}

impl ExprArena {
    pub fn new() -> ExprArena {
        ExprArena::default()
    }

    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(expr);
        id
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.0 as usize]
    }

    pub fn const_of(&mut self, value: impl Into<BigInt>) -> ExprId {
        self.alloc(Expr::Const(value.into()))
    }

    pub fn label_ref(&mut self, name: FqName) -> ExprId {
        self.alloc(Expr::LabelRef(name))
    }

    pub fn binary(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.alloc(Expr::Binary(op, lhs, rhs))
    }

    pub fn unary(&mut self, op: UnOp, operand: ExprId) -> ExprId {
        self.alloc(Expr::Unary(op, operand))
    }

    pub fn ternary(&mut self, cond: ExprId, then: ExprId, otherwise: ExprId) -> ExprId {
        self.alloc(Expr::Ternary(cond, then, otherwise))
    }

    /// Used when binding a label (reference) parameter: the argument
    /// expression at that position must be a bare label reference so its
    /// name can be aliased, rather than an arbitrary computed expression.
    pub fn as_label_ref(&self, id: ExprId) -> Option<&FqName> {
        match self.get(id) {
            Expr::LabelRef(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("undefined label \"{0}\"")]
    UnresolvedLabel(FqName),
    #[error("division by zero")]
    DivisionByZero,
}

/// Evaluates `id` in arbitrary precision against `labels`. Division
/// truncates toward zero; modulo follows the sign of the dividend — both
/// of `BigInt`'s native `Div`/`Rem` already behave this way, so no
/// correction is needed beyond using them directly.
pub fn eval(
    arena: &ExprArena,
    id: ExprId,
    labels: &HashMap<FqName, BigInt>,
) -> Result<BigInt, EvalError> {
    match arena.get(id) {
        Expr::Const(value) => Ok(value.clone()),
        Expr::LabelRef(name) => labels
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnresolvedLabel(name.clone())),
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(arena, *lhs, labels)?;
            let r = eval(arena, *rhs, labels)?;
            eval_binary(*op, l, r)
        }
        Expr::Unary(op, operand) => {
            let v = eval(arena, *operand, labels)?;
            Ok(match op {
                UnOp::Neg => -v,
                UnOp::Not => !v,
            })
        }
        Expr::Ternary(cond, then, otherwise) => {
            let c = eval(arena, *cond, labels)?;
            if c.is_zero() {
                eval(arena, *otherwise, labels)
            } else {
                eval(arena, *then, labels)
            }
        }
    }
}

fn eval_binary(op: BinOp, l: BigInt, r: BigInt) -> Result<BigInt, EvalError> {
    Ok(match op {
        BinOp::Add => l + r,
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        BinOp::Div => {
            if r.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            l / r
        }
        BinOp::Mod => {
            if r.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            l % r
        }
        BinOp::And => l & r,
        BinOp::Or => l | r,
        BinOp::Xor => l ^ r,
        BinOp::Shl => {
            let shift = r.to_u64().unwrap_or(0);
            l << shift
        }
        BinOp::Shr => {
            let shift = r.to_u64().unwrap_or(0);
            l >> shift
        }
    })
}

/// Narrows an arbitrary-precision value to `w` bits for emission, per §4.4:
/// "the final value is taken modulo 2^w and written."
pub fn narrow_to_width(value: &BigInt, width: u32) -> BigInt {
    let modulus = BigInt::from(1) << width;
    value.mod_floor(&modulus)
}
