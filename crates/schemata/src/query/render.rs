//! Render SQL AST to string for one driver.

use std::cell::RefCell;
use std::fmt;

use indexmap::IndexMap;

use super::RenderedSql;
use super::expr::{BinOp, ColumnRef, Expr};
use super::stmt::*;
use crate::driver::Driver;

/// Mutable parameter tracking state.
#[derive(Default)]
struct ParamState {
    /// Named parameters -> their assigned index
    indexes: IndexMap<String, usize>,
    /// Parameter name for each placeholder, in bind order
    bound: Vec<String>,
}

/// Rendering context: the target dialect, the table prefix and the
/// parameters seen so far.
pub struct RenderContext<'a> {
    driver: &'a dyn Driver,
    prefix: &'a str,
    params: RefCell<ParamState>,
}

impl<'a> RenderContext<'a> {
    pub fn new(driver: &'a dyn Driver, prefix: &'a str) -> Self {
        Self {
            driver,
            prefix,
            params: RefCell::new(ParamState::default()),
        }
    }

    /// Placeholder for a named parameter. Dialects that can reference a
    /// placeholder twice get one index per name; the rest get one per
    /// occurrence.
    fn placeholder(&self, name: &str) -> String {
        let mut state = self.params.borrow_mut();
        let reuse = self.driver.reuses_placeholders();
        let idx = match state.indexes.get(name) {
            Some(&idx) if reuse => idx,
            _ => {
                state.bound.push(name.to_string());
                let idx = state.bound.len();
                state.indexes.entry(name.to_string()).or_insert(idx);
                idx
            }
        };
        self.driver.placeholder(idx)
    }

    fn ident(&self, name: &str) -> String {
        self.driver.quote_identifier(name)
    }

    fn table(&self, name: &str) -> String {
        self.driver.quote_identifier(&format!("{}{}", self.prefix, name))
    }

    /// Prefixed table followed by its alias. Unaliased tables are aliased
    /// to their unprefixed name so qualified columns keep working.
    fn aliased_table(&self, name: &str, alias: Option<&str>) -> String {
        let table = self.table(name);
        match alias {
            Some(alias) => format!("{table} {}", self.ident(alias)),
            None if !self.prefix.is_empty() => format!("{table} {}", self.ident(name)),
            None => table,
        }
    }

    fn into_params(self) -> Vec<String> {
        self.params.into_inner().bound
    }
}

/// Wrapper for rendering a value via Display.
pub struct Fmt<'a, T: Render>(&'a RenderContext<'a>, &'a T);

impl<T: Render> fmt::Display for Fmt<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.1.render(self.0, f)
    }
}

// ============================================================================
// Render implementations
// ============================================================================

/// Trait for types that can be rendered to SQL.
pub trait Render {
    fn render(&self, ctx: &RenderContext<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// An operand of `op`, parenthesized when it is an OR under an AND.
struct Operand<'a>(BinOp, &'a Expr);

impl Render for Operand<'_> {
    fn render(&self, ctx: &RenderContext<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Expr::BinOp {
                op: BinOp::Or, ..
            } if self.0 == BinOp::And => write!(f, "({})", Fmt(ctx, self.1)),
            Expr::BinOp { op, .. } if op.is_logical() && !self.0.is_logical() => {
                write!(f, "({})", Fmt(ctx, self.1))
            }
            expr => expr.render(ctx, f),
        }
    }
}

impl Render for Expr {
    fn render(&self, ctx: &RenderContext<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(name) => write!(f, "{}", ctx.placeholder(name)),
            Expr::Column(col) => col.render(ctx, f),
            Expr::String(s) => write!(f, "{}", ctx.driver.quote_value(s)),
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Bool(b) => write!(f, "{}", u8::from(*b)),
            Expr::Null => write!(f, "NULL"),
            Expr::Now => write!(f, "CURRENT_TIMESTAMP"),
            Expr::BinOp { left, op, right } => {
                let left = Operand(*op, left.as_ref());
                let right = Operand(*op, right.as_ref());
                write!(f, "{} {} {}", Fmt(ctx, &left), op.as_str(), Fmt(ctx, &right))
            }
            Expr::IsNull { expr, negated } => {
                let expr = Fmt(ctx, expr.as_ref());
                let suffix = if *negated { " IS NOT NULL" } else { " IS NULL" };
                write!(f, "{expr}{suffix}")
            }
            Expr::ILike { expr, pattern } => {
                let expr = Fmt(ctx, expr.as_ref());
                let pattern = Fmt(ctx, pattern.as_ref());
                let like = ctx.driver.case_insensitive_like();
                write!(f, "{expr} {like} {pattern}")
            }
            Expr::GroupConcat(expr) => {
                let expr = Fmt(ctx, expr.as_ref()).to_string();
                write!(f, "{}", ctx.driver.group_concat(&expr))
            }
            Expr::FnCall { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", Fmt(ctx, arg))?;
                }
                write!(f, ")")
            }
            Expr::CountAll => write!(f, "COUNT(*)"),
            Expr::Raw(s) => write!(f, "{s}"),
        }
    }
}

impl Render for ColumnRef {
    fn render(&self, ctx: &RenderContext<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = &self.table {
            write!(f, "{}.", ctx.ident(table))?;
        }
        write!(f, "{}", ctx.ident(&self.column))
    }
}

fn render_where(
    ctx: &RenderContext<'_>,
    where_: Option<&Expr>,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    if let Some(where_) = where_ {
        write!(f, "\nWHERE {}", Fmt(ctx, where_))?;
    }
    Ok(())
}

impl Render for SelectStmt {
    fn render(&self, ctx: &RenderContext<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT")?;
        if self.distinct {
            write!(f, " DISTINCT")?;
        }

        // Columns
        if self.columns.is_empty() {
            write!(f, " *")?;
        } else {
            for (i, col) in self.columns.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, " {}", Fmt(ctx, col))?;
            }
        }

        // FROM
        if let Some(from) = &self.from {
            let table = ctx.aliased_table(&from.table, from.alias.as_deref());
            write!(f, "\nFROM {table}")?;
        }

        // JOINs
        for join in &self.joins {
            let kind = join.kind.as_str();
            let table = ctx.aliased_table(&join.table, join.alias.as_deref());
            let on = Fmt(ctx, &join.on);
            write!(f, "\n{kind} {table} ON {on}")?;
        }

        render_where(ctx, self.where_.as_ref(), f)?;

        if !self.group_by.is_empty() {
            write!(f, "\nGROUP BY ")?;
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", Fmt(ctx, expr))?;
            }
        }

        // ORDER BY
        if !self.order_by.is_empty() {
            write!(f, "\nORDER BY ")?;
            for (i, order) in self.order_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                let expr = Fmt(ctx, &order.expr);
                let dir = if order.desc { " DESC" } else { " ASC" };
                write!(f, "{expr}{dir}")?;
            }
        }

        // LIMIT / OFFSET, spelled per dialect
        let limit = self.limit.as_ref().map(|e| Fmt(ctx, e).to_string());
        let offset = self.offset.as_ref().map(|e| Fmt(ctx, e).to_string());
        write!(
            f,
            "{}",
            ctx.driver.limit_clause(limit.as_deref(), offset.as_deref())
        )
    }
}

impl Render for SelectColumn {
    fn render(&self, ctx: &RenderContext<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectColumn::Expr { expr, alias } => {
                write!(f, "{}", Fmt(ctx, expr))?;
                if let Some(alias) = alias {
                    write!(f, " AS {}", ctx.ident(alias))?;
                }
                Ok(())
            }
            SelectColumn::AllFrom(table) => write!(f, "{}.*", ctx.ident(table)),
        }
    }
}

impl Render for InsertStmt {
    fn render(&self, ctx: &RenderContext<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INSERT INTO {} (", ctx.table(&self.table))?;

        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ctx.ident(col))?;
        }
        write!(f, ")")?;

        write!(f, "\nVALUES (")?;
        for (i, val) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", Fmt(ctx, val))?;
        }
        write!(f, ")")
    }
}

impl Render for UpdateStmt {
    fn render(&self, ctx: &RenderContext<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPDATE {}", ctx.table(&self.table))?;

        write!(f, "\nSET ")?;
        for (i, assign) in self.assignments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let col = ctx.ident(&assign.column);
            let val = Fmt(ctx, &assign.value);
            write!(f, "{col} = {val}")?;
        }

        render_where(ctx, self.where_.as_ref(), f)
    }
}

impl Render for DeleteStmt {
    fn render(&self, ctx: &RenderContext<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {}", ctx.table(&self.table))?;
        render_where(ctx, self.where_.as_ref(), f)
    }
}

impl Render for Stmt {
    fn render(&self, ctx: &RenderContext<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Select(s) => s.render(ctx, f),
            Stmt::Insert(s) => s.render(ctx, f),
            Stmt::Update(s) => s.render(ctx, f),
            Stmt::Delete(s) => s.render(ctx, f),
        }
    }
}

/// Render a statement for `driver`, applying `prefix` to every table name.
pub fn render(driver: &dyn Driver, prefix: &str, stmt: &impl Render) -> RenderedSql {
    let ctx = RenderContext::new(driver, prefix);
    let sql = Fmt(&ctx, stmt).to_string();
    RenderedSql {
        sql,
        params: ctx.into_params(),
    }
}
