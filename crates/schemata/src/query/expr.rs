//! SQL expressions.

/// A SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A named parameter (`:handle` in hand-written SQL)
    Param(String),
    /// A column reference
    Column(ColumnRef),
    /// A string literal
    String(String),
    /// An integer literal
    Int(i64),
    /// A boolean, rendered as 1 or 0 so it works on every backend
    Bool(bool),
    /// NULL
    Null,
    /// CURRENT_TIMESTAMP
    Now,
    /// Binary operation (e.g., a = b, a AND b)
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },
    /// Case-insensitive LIKE, spelled per backend
    ILike { expr: Box<Expr>, pattern: Box<Expr> },
    /// Comma-joined values of a group, spelled per backend
    GroupConcat(Box<Expr>),
    /// Function call
    FnCall { name: String, args: Vec<Expr> },
    /// COUNT(*)
    CountAll,
    /// Raw SQL (escape hatch)
    Raw(String),
}

/// A column reference, optionally qualified with a table name or alias.
///
/// Qualifiers are unprefixed: selects alias every table to its unprefixed
/// name.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Like,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Like => "LIKE",
        }
    }

    /// Whether an operand of this operator needs parentheses when it is
    /// itself a binary operation.
    pub(crate) fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

// Convenience constructors
impl Expr {
    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::new(name))
    }

    pub fn qualified_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::qualified(table, column))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::String(s.into())
    }

    pub fn int(n: i64) -> Self {
        Expr::Int(n)
    }

    pub fn bool(b: bool) -> Self {
        Expr::Bool(b)
    }

    fn binop(self, op: BinOp, other: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    /// self = other
    pub fn eq(self, other: Expr) -> Self {
        self.binop(BinOp::Eq, other)
    }

    /// self <> other
    pub fn ne(self, other: Expr) -> Self {
        self.binop(BinOp::Ne, other)
    }

    pub fn lt(self, other: Expr) -> Self {
        self.binop(BinOp::Lt, other)
    }

    pub fn le(self, other: Expr) -> Self {
        self.binop(BinOp::Le, other)
    }

    pub fn gt(self, other: Expr) -> Self {
        self.binop(BinOp::Gt, other)
    }

    pub fn ge(self, other: Expr) -> Self {
        self.binop(BinOp::Ge, other)
    }

    /// self AND other
    pub fn and(self, other: Expr) -> Self {
        self.binop(BinOp::And, other)
    }

    /// self OR other
    pub fn or(self, other: Expr) -> Self {
        self.binop(BinOp::Or, other)
    }

    /// Case-sensitive (or collation-dependent) LIKE.
    pub fn like(self, pattern: Expr) -> Self {
        self.binop(BinOp::Like, pattern)
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// Case-insensitive LIKE.
    pub fn ilike(self, pattern: Expr) -> Self {
        Expr::ILike {
            expr: Box::new(self),
            pattern: Box::new(pattern),
        }
    }

    pub fn group_concat(self) -> Self {
        Expr::GroupConcat(Box::new(self))
    }
}
