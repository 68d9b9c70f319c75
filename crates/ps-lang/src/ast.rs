//! AST for the workflow DSL.

use std::fmt;

pub type Program = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    FuncDef {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    ClassDef {
        name: String,
        body: Vec<Stmt>,
    },
    Assign {
        target: AssignTarget,
        value: Expr,
    },
    ExprStmt(Expr),
    Return(Option<Expr>),
    Break,
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    WithPolicy {
        policy: Expr,
        body: Vec<Stmt>,
    },
    Retry {
        attempts: Expr,
        backoff_ms: Expr,
        body: Vec<Stmt>,
    },
    Timeout {
        ms: Expr,
        body: Vec<Stmt>,
    },
    Guard(Expr),
}

impl StmtKind {
    /// Node-type name recorded in `stmt` events.
    pub fn node_name(&self) -> &'static str {
        match self {
            Self::FuncDef { .. } => "def",
            Self::ClassDef { .. } => "class",
            Self::Assign { .. } => "assign",
            Self::ExprStmt(_) => "expr",
            Self::Return(_) => "return",
            Self::Break => "break",
            Self::If { .. } => "if",
            Self::While { .. } => "while",
            Self::For { .. } => "for",
            Self::WithPolicy { .. } => "with_policy",
            Self::Retry { .. } => "retry",
            Self::Timeout { .. } => "timeout",
            Self::Guard(_) => "guard",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Var(String),
    Member { object: Expr, field: String },
    Index { object: Expr, index: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
            Self::In => "in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Var(String),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        field: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

/// Compact source-like rendering, used in guard failure messages and logs.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Null => write!(f, "null"),
            ExprKind::Bool(b) => write!(f, "{b}"),
            ExprKind::Int(n) => write!(f, "{n}"),
            ExprKind::Str(s) => write!(f, "{s:?}"),
            ExprKind::Var(name) => write!(f, "{name}"),
            ExprKind::Object(fields) => {
                write!(f, "{{")?;
                for (index, (key, value)) in fields.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            ExprKind::Array(items) => {
                write!(f, "[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ExprKind::Not(inner) => write!(f, "not {inner}"),
            ExprKind::Binary { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.symbol()),
            ExprKind::Member { object, field } => write!(f, "{object}.{field}"),
            ExprKind::Index { object, index } => write!(f, "{object}[{index}]"),
            ExprKind::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}
