//! Formula parser.
//!
//! The grammar lives in `formula.pest`; this module turns the pest parse
//! tree into an [`Expr`]. Placeholders (`$[name]`, `@[name]`, `$#`, `@#`)
//! are grammar rules of their own, so column values never pass through the
//! source text.

use pest::error::{ErrorVariant, InputLocation};
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use super::ast::{BinaryOp, Context, Expr, UnaryOp};
use super::value::Value;
use crate::error::EvalCause;

/// Deepest parenthesis nesting accepted in a formula.
pub const MAX_NESTING: usize = 100;

/// Deepest expression tree accepted.
pub const MAX_DEPTH: usize = 1000;

#[derive(Parser)]
#[grammar = "formula/formula.pest"]
struct FormulaParser;

/// Parse formula source into an expression tree.
pub fn parse(src: &str) -> Result<Expr, EvalCause> {
    check_nesting(src)?;

    let mut pairs = FormulaParser::parse(Rule::formula, src).map_err(syntax_error)?;
    let formula = next(&mut pairs, 0)?;
    let expr = next(&mut formula.into_inner(), 0)?;

    build_expr(expr).map(|(expr, _)| expr)
}

/// An expression and the height of its tree.
type Built = (Expr, usize);

fn syntax(offset: usize, message: impl Into<String>) -> EvalCause {
    EvalCause::Syntax {
        offset,
        message: message.into(),
    }
}

/// Fails once a tree grows past [`MAX_DEPTH`], before it gets any deeper.
fn within_depth(built: Built, offset: usize) -> Result<Built, EvalCause> {
    if built.1 > MAX_DEPTH {
        return Err(syntax(
            offset,
            format!("expression is nested more than {} levels deep", MAX_DEPTH),
        ));
    }
    Ok(built)
}

fn syntax_error(e: pest::error::Error<Rule>) -> EvalCause {
    let offset = match e.location {
        InputLocation::Pos(pos) => pos,
        InputLocation::Span((start, _)) => start,
    };
    let message = match &e.variant {
        ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
            let mut expected: Vec<&str> = positives.iter().map(|rule| describe(*rule)).collect();
            expected.sort_unstable();
            expected.dedup();
            format!("expected {}", expected.join(" or "))
        }
        ErrorVariant::ParsingError { .. } => "unexpected input".to_string(),
        ErrorVariant::CustomError { message } => message.clone(),
    };
    syntax(offset, message)
}

fn describe(rule: Rule) -> &'static str {
    match rule {
        Rule::EOI => "end of expression",
        Rule::or_op | Rule::and_op | Rule::comp_op | Rule::add_op | Rule::mul_op => "operator",
        Rule::column_name => "column name",
        _ => "operand",
    }
}

/// Reject deep parenthesis nesting before the recursive parse sees it.
fn check_nesting(src: &str) -> Result<(), EvalCause> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, c) in src.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(syntax(offset, "too many nested parentheses"));
                }
            }
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// The next child pair. The grammar guarantees it; `offset` locates the
/// error if it is ever missing.
fn next<'i>(pairs: &mut Pairs<'i, Rule>, offset: usize) -> Result<Pair<'i, Rule>, EvalCause> {
    pairs
        .next()
        .ok_or_else(|| syntax(offset, "incomplete expression"))
}

fn build_expr(pair: Pair<Rule>) -> Result<Built, EvalCause> {
    match pair.as_rule() {
        Rule::expr => {
            let offset = pair.as_span().start();
            build_expr(next(&mut pair.into_inner(), offset)?)
        }
        Rule::or_expr | Rule::and_expr | Rule::comparison | Rule::additive | Rule::term => {
            parse_binary_chain(pair)
        }
        Rule::not_expr | Rule::unary => parse_prefixed(pair),
        Rule::atom => parse_atom(pair),
        other => Err(syntax(
            pair.as_span().start(),
            format!("unexpected rule {:?}", other),
        )),
    }
}

/// Left-associative `operand (op operand)*` sequences.
fn parse_binary_chain(pair: Pair<Rule>) -> Result<Built, EvalCause> {
    let offset = pair.as_span().start();
    let mut pairs = pair.into_inner();
    let mut built = build_expr(next(&mut pairs, offset)?)?;

    while let Some(op_pair) = pairs.next() {
        let op = binary_op(&op_pair)?;
        let right = build_expr(next(&mut pairs, op_pair.as_span().end())?)?;
        built = within_depth(binary(op, built, right), op_pair.as_span().start())?;
    }
    Ok(built)
}

fn binary_op(pair: &Pair<Rule>) -> Result<BinaryOp, EvalCause> {
    let op = match pair.as_str() {
        "or" => BinaryOp::Or,
        "and" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "//" => BinaryOp::FloorDiv,
        "%" => BinaryOp::Mod,
        other => {
            return Err(syntax(
                pair.as_span().start(),
                format!("unknown operator '{}'", other),
            ))
        }
    };
    Ok(op)
}

/// `not` chains and sign chains: collect the prefixes, then apply them
/// innermost first.
fn parse_prefixed(pair: Pair<Rule>) -> Result<Built, EvalCause> {
    let offset = pair.as_span().start();
    let mut ops = Vec::new();
    let mut operand = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::not_op => ops.push(UnaryOp::Not),
            Rule::sign if inner.as_str() == "-" => ops.push(UnaryOp::Neg),
            Rule::sign => ops.push(UnaryOp::Pos),
            _ => operand = Some(inner),
        }
    }

    let Some(operand) = operand else {
        return Err(syntax(offset, "operator without an operand"));
    };
    let (operand, depth) = build_expr(operand)?;
    let (mut expr, depth) = within_depth((operand, depth + ops.len()), offset)?;
    for op in ops.into_iter().rev() {
        expr = Expr::Unary {
            op,
            operand: Box::new(expr),
        };
    }
    Ok((expr, depth))
}

fn parse_atom(pair: Pair<Rule>) -> Result<Built, EvalCause> {
    let offset = pair.as_span().start();
    let inner = next(&mut pair.into_inner(), offset)?;
    let leaf = |expr: Expr| -> Result<Built, EvalCause> { Ok((expr, 1)) };

    match inner.as_rule() {
        Rule::int => {
            let n = inner
                .as_str()
                .parse::<i64>()
                .map_err(|_| syntax(offset, "integer literal too large"))?;
            leaf(Expr::Literal(Value::Int(n)))
        }
        Rule::float => {
            let x = inner
                .as_str()
                .parse::<f64>()
                .map_err(|e| syntax(offset, format!("invalid float literal: {}", e)))?;
            leaf(Expr::Literal(Value::Float(x)))
        }
        Rule::string => {
            let body = inner.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
            leaf(Expr::Literal(Value::Str(unescape(body))))
        }
        Rule::boolean => leaf(Expr::Literal(Value::Bool(inner.as_str() == "True"))),
        Rule::text_column => leaf(column(inner, Context::Text)),
        Rule::int_column => leaf(column(inner, Context::Integer)),
        Rule::text_sequence => leaf(Expr::Sequence(Context::Text)),
        Rule::int_sequence => leaf(Expr::Sequence(Context::Integer)),
        Rule::identifier => leaf(Expr::Name(inner.as_str().to_string())),
        Rule::call => parse_call(inner),
        Rule::expr => build_expr(inner),
        other => Err(syntax(offset, format!("unexpected rule in operand: {:?}", other))),
    }
}

fn parse_call(pair: Pair<Rule>) -> Result<Built, EvalCause> {
    let offset = pair.as_span().start();
    let mut pairs = pair.into_inner();
    let name = next(&mut pairs, offset)?.as_str().to_string();

    let mut args = Vec::new();
    let mut depth = 0;
    for arg in pairs {
        let (expr, arg_depth) = build_expr(arg)?;
        depth = depth.max(arg_depth);
        args.push(expr);
    }
    within_depth((Expr::Call { name, args }, depth + 1), offset)
}

/// Column placeholders store their name lowercased.
fn column(pair: Pair<Rule>, context: Context) -> Expr {
    let name = pair
        .into_inner()
        .next()
        .map(|p| p.as_str().to_lowercase())
        .unwrap_or_default();
    Expr::Column { name, context }
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some(c @ ('\\' | '\'' | '"')) => out.push(c),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn binary(op: BinaryOp, left: Built, right: Built) -> Built {
    let depth = left.1.max(right.1) + 1;
    let expr = Expr::Binary {
        op,
        left: Box::new(left.0),
        right: Box::new(right.0),
    };
    (expr, depth)
}
