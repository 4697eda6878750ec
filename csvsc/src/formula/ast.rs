//! Abstract syntax tree for the formula language.

use super::value::Value;

/// Which accessor a placeholder uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// `$[name]` / `$#`: the raw value as a string
    Text,
    /// `@[name]` / `@#`: the value parsed as an integer, `0` on failure
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "not",
        }
    }
}

/// A compiled formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Column placeholder; `name` is stored lowercased.
    Column { name: String, context: Context },
    /// Sequence number placeholder.
    Sequence(Context),
    /// Bare name; only meaningful as a parameter inside plugin functions.
    Name(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    /// Visit this node and all of its descendants, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Literal(_) | Expr::Column { .. } | Expr::Sequence(_) | Expr::Name(_) => {}
        }
    }

    /// True if the expression reads any row placeholder.
    pub fn uses_placeholders(&self) -> bool {
        let mut found = false;
        self.walk(&mut |node| {
            if matches!(node, Expr::Column { .. } | Expr::Sequence(_)) {
                found = true;
            }
        });
        found
    }
}
