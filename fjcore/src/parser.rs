//! Turns `.fj` source text into an [`ast::File`] plus the shared
//! [`ExprArena`] its expressions live in. Built on `pest`, the same way the
//! teacher's assembly-language parser is: a derived `Rule` enum and a set
//! of `process_*` functions walking `Pair<Rule>` trees.

use crate::ast::{self, Item};
use crate::diag::{FileId, SourceLocation};
use crate::error::ParseError;
use crate::expr::{BinOp, ExprArena, ExprId, UnOp};
use num_bigint::BigInt;
use num_traits::Num;
use pest::iterators::Pair;
use pest::Parser;

#[derive(pest_derive::Parser)]
#[grammar = "grammar.pest"]
struct FJParser;

pub type Result<T> = std::result::Result<T, ParseError>;

fn loc(file: FileId, pair: &Pair<Rule>) -> SourceLocation {
    let (line, column) = pair.as_span().start_pos().line_col();
    SourceLocation::new(file, line as u32, column as u32)
}

fn parse_error(file: FileId, pair: &Pair<Rule>, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        loc: loc(file, pair),
        message: message.into(),
    }
}

/// Parses `source` (from `file`) into a flat item list and the expression
/// arena those items reference. `include` items are returned unresolved —
/// the preprocessor's caller is responsible for recursively parsing them
/// and splicing the results in, which is how `IncludeError` (missing file)
/// is reported at the right call site rather than inside this function.
pub fn parse(source: &str, file: FileId, arena: &mut ExprArena) -> Result<ast::File> {
    let mut pairs =
        FJParser::parse(Rule::file, source).map_err(|err| ParseError::Pest(Box::new(err)))?;
    let file_pair = pairs.next().expect("file rule always produces one pair");

    let mut items = Vec::new();
    for pair in file_pair.into_inner() {
        if pair.as_rule() == Rule::EOI {
            continue;
        }
        items.push(process_item(pair, file, arena)?);
    }
    Ok(ast::File { items })
}

fn process_item(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<Item> {
    let inner = pair.into_inner().next().expect("item wraps one alternative");
    match inner.as_rule() {
        Rule::macro_def => process_macro_def(inner, file, arena).map(Item::MacroDef),
        Rule::rep => process_rep(inner, file, arena).map(Item::Rep),
        Rule::const_def => process_const_def(inner, file, arena).map(Item::ConstDef),
        Rule::include => process_include(inner, file).map(Item::Include),
        Rule::macro_call => process_macro_call(inner, file, arena).map(Item::MacroCall),
        Rule::label_def => Ok(Item::LabelDef(process_label_def(inner, file))),
        Rule::string_item => Ok(Item::StringItem(process_string_item(inner, file))),
        Rule::op => process_op(inner, file, arena).map(Item::Op),
        other => unreachable!("unexpected item alternative: {other:?}"),
    }
}

fn process_block(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<Vec<Item>> {
    pair.into_inner()
        .map(|item| process_item(item, file, arena))
        .collect()
}

fn process_macro_def(
    pair: Pair<Rule>,
    file: FileId,
    arena: &mut ExprArena,
) -> Result<ast::MacroDef> {
    let def_loc = loc(file, &pair);
    let mut inner = pair.into_inner();
    let name = inner.next().expect("macro name").as_str().to_owned();

    let mut value_params = Vec::new();
    let mut label_in_params = Vec::new();
    let mut label_out_params = Vec::new();
    let mut next = inner.next().expect("macro body or params");

    if next.as_rule() == Rule::param_list {
        for group in next.into_inner() {
            match group.as_rule() {
                Rule::value_params => {
                    value_params.extend(group.into_inner().map(|p| p.as_str().to_owned()))
                }
                Rule::label_in_params => {
                    label_in_params.extend(group.into_inner().map(|p| p.as_str().to_owned()))
                }
                Rule::label_out_params => {
                    label_out_params.extend(group.into_inner().map(|p| p.as_str().to_owned()))
                }
                other => unreachable!("unexpected param group: {other:?}"),
            }
        }
        next = inner.next().expect("macro body");
    }

    let body = process_block(next, file, arena)?;

    Ok(ast::MacroDef {
        name,
        value_params,
        label_in_params,
        label_out_params,
        body,
        loc: def_loc,
    })
}

fn process_rep(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ast::Rep> {
    let rep_loc = loc(file, &pair);
    let mut inner = pair.into_inner();
    let count = process_expr(inner.next().expect("rep count"), file, arena)?;
    let var = inner.next().expect("rep variable").as_str().to_owned();
    let body = process_item(inner.next().expect("rep body"), file, arena)?;

    Ok(ast::Rep {
        count,
        var,
        body: Box::new(body),
        loc: rep_loc,
    })
}

fn process_const_def(
    pair: Pair<Rule>,
    file: FileId,
    arena: &mut ExprArena,
) -> Result<ast::ConstDef> {
    let def_loc = loc(file, &pair);
    let mut inner = pair.into_inner();
    let name = inner.next().expect("const name").as_str().to_owned();
    let value = process_expr(inner.next().expect("const value"), file, arena)?;
    Ok(ast::ConstDef {
        name,
        value,
        loc: def_loc,
    })
}

fn process_include(pair: Pair<Rule>, file: FileId) -> Result<ast::Include> {
    let include_loc = loc(file, &pair);
    let string_pair = pair.into_inner().next().expect("include path");
    let raw = string_pair.as_str();
    let path = raw[1..raw.len() - 1].to_owned();
    Ok(ast::Include {
        path,
        loc: include_loc,
    })
}

fn process_macro_call(
    pair: Pair<Rule>,
    file: FileId,
    arena: &mut ExprArena,
) -> Result<ast::MacroCall> {
    let call_loc = loc(file, &pair);
    let mut inner = pair.into_inner();
    let name = inner.next().expect("macro call name").as_str().to_owned();

    let mut args = Vec::new();
    if let Some(call_args) = inner.next() {
        for arg in call_args.into_inner() {
            args.push(process_expr(arg, file, arena)?);
        }
    }

    Ok(ast::MacroCall {
        name,
        args,
        loc: call_loc,
    })
}

fn process_label_def(pair: Pair<Rule>, file: FileId) -> ast::LabelDef {
    let label_loc = loc(file, &pair);
    let name = pair.into_inner().next().expect("label name").as_str().to_owned();
    ast::LabelDef { name, loc: label_loc }
}

fn process_string_item(pair: Pair<Rule>, file: FileId) -> ast::StringItem {
    let item_loc = loc(file, &pair);
    let raw = pair.into_inner().next().expect("string literal").as_str();
    let value = raw[1..raw.len() - 1].to_owned();
    ast::StringItem { value, loc: item_loc }
}

fn process_op(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ast::Op> {
    let op_loc = loc(file, &pair);
    let mut a = None;
    let mut b = None;
    for part in pair.into_inner() {
        let expr_pair = part.clone().into_inner().next().expect("op_a/op_b wraps an expr");
        match part.as_rule() {
            Rule::op_a => a = Some(process_expr(expr_pair, file, arena)?),
            Rule::op_b => b = Some(process_expr(expr_pair, file, arena)?),
            other => unreachable!("unexpected op part: {other:?}"),
        }
    }
    Ok(ast::Op { a, b, loc: op_loc })
}

fn process_expr(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ExprId> {
    debug_assert_eq!(pair.as_rule(), Rule::expr);
    process_ternary(pair.into_inner().next().expect("expr wraps ternary"), file, arena)
}

fn process_ternary(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ExprId> {
    let mut inner = pair.into_inner();
    let cond = process_or(inner.next().expect("ternary condition"), file, arena)?;
    match (inner.next(), inner.next()) {
        (Some(then_pair), Some(else_pair)) => {
            let then = process_expr(then_pair, file, arena)?;
            let otherwise = process_expr(else_pair, file, arena)?;
            Ok(arena.ternary(cond, then, otherwise))
        }
        _ => Ok(cond),
    }
}

fn process_or(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ExprId> {
    fold_fixed_op(pair, file, arena, process_xor, BinOp::Or)
}

fn process_xor(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ExprId> {
    fold_fixed_op(pair, file, arena, process_and, BinOp::Xor)
}

fn process_and(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ExprId> {
    fold_fixed_op(pair, file, arena, process_shift, BinOp::And)
}

fn process_shift(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ExprId> {
    fold_tagged_op(pair, file, arena, process_additive, |text| match text {
        "<<" => BinOp::Shl,
        ">>" => BinOp::Shr,
        _ => unreachable!("unknown shift operator {text}"),
    })
}

fn process_additive(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ExprId> {
    fold_tagged_op(pair, file, arena, process_multiplicative, |text| match text {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        _ => unreachable!("unknown additive operator {text}"),
    })
}

fn process_multiplicative(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ExprId> {
    fold_tagged_op(pair, file, arena, process_unary, |text| match text {
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        _ => unreachable!("unknown multiplicative operator {text}"),
    })
}

/// Folds a precedence level whose grammar rule is `operand ~ operand*` with
/// an implicit, always-the-same operator between every pair (used for `|`,
/// `^`, `&`, which don't need a named op rule since there's only one choice
/// at each level).
fn fold_fixed_op(
    pair: Pair<Rule>,
    file: FileId,
    arena: &mut ExprArena,
    mut operand: impl FnMut(Pair<Rule>, FileId, &mut ExprArena) -> Result<ExprId>,
    op: BinOp,
) -> Result<ExprId> {
    let mut inner = pair.into_inner();
    let mut acc = operand(inner.next().expect("operand"), file, arena)?;
    for operand_pair in inner {
        let rhs = operand(operand_pair, file, arena)?;
        acc = arena.binary(op, acc, rhs);
    }
    Ok(acc)
}

/// Folds a precedence level whose grammar rule is
/// `operand ~ (op_rule ~ operand)*`, where `op_rule` is a named rule so its
/// text is available to pick the operator.
fn fold_tagged_op(
    pair: Pair<Rule>,
    file: FileId,
    arena: &mut ExprArena,
    mut operand: impl FnMut(Pair<Rule>, FileId, &mut ExprArena) -> Result<ExprId>,
    resolve_op: impl Fn(&str) -> BinOp,
) -> Result<ExprId> {
    let mut inner = pair.into_inner();
    let mut acc = operand(inner.next().expect("operand"), file, arena)?;
    loop {
        let Some(op_pair) = inner.next() else {
            break;
        };
        let op = resolve_op(op_pair.as_str());
        let rhs_pair = inner.next().expect("operand after operator");
        let rhs = operand(rhs_pair, file, arena)?;
        acc = arena.binary(op, acc, rhs);
    }
    Ok(acc)
}

fn process_unary(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ExprId> {
    let mut ops = Vec::new();
    let mut atom_pair = None;
    for part in pair.into_inner() {
        match part.as_str() {
            "-" => ops.push(UnOp::Neg),
            "~" => ops.push(UnOp::Not),
            _ => atom_pair = Some(part),
        }
    }
    let mut id = process_atom(atom_pair.expect("unary wraps an atom"), file, arena)?;
    for op in ops.into_iter().rev() {
        id = arena.unary(op, id);
    }
    Ok(id)
}

fn process_atom(pair: Pair<Rule>, file: FileId, arena: &mut ExprArena) -> Result<ExprId> {
    let inner = pair.into_inner().next().expect("atom wraps one alternative");
    match inner.as_rule() {
        Rule::number => {
            let value = parse_number(inner.as_str())
                .map_err(|message| parse_error(file, &inner, message))?;
            Ok(arena.const_of(value))
        }
        Rule::ident => Ok(arena.label_ref(crate::diag::FqName::simple(inner.as_str()))),
        Rule::expr => process_expr(inner, file, arena),
        other => unreachable!("unexpected atom alternative: {other:?}"),
    }
}

fn parse_number(text: &str) -> std::result::Result<BigInt, String> {
    let (digits, radix) = if let Some(rest) = text.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = text.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = text.strip_prefix("0b") {
        (rest, 2)
    } else {
        (text, 10)
    };
    BigInt::from_str_radix(digits, radix).map_err(|err| format!("invalid integer literal: {err}"))
}
