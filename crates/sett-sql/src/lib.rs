//! SQL compiler: lowers a relational-algebra [`Plan`] into a single
//! SQLite-dialect SELECT statement.
//!
//! Lowering is recursive and bottom-up. Each node produces a clause set
//! ([`SelectBox`]) plus the output schema that doubles as the symbol table
//! for its parent. When a parent needs a clause the child already occupies
//! (a second LIMIT, a WHERE over a GROUP BY, an aggregate over an aggregate),
//! the child is pushed down into a derived-table subquery instead of mutating
//! the clause in place.
//!
//! Compilation is pure and deterministic: no I/O, and generated aliases
//! (`expr_<n>`, `t<n>`) restart from zero for every `compile` call, so the
//! same tree always yields the same SQL text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sett_ir::{DataType, Node, NodeId, Plan, Projection, SetOpKind, TableSchema};

mod expr;
pub use expr::{quote_ident, quote_str};
use expr::{compile_agg, compile_expr};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("ambiguous alias: {0}")]
    AmbiguousAlias(String),
}

/// A fully lowered query: SQL text plus the output schema the remote rows
/// must align to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub columns: Vec<String>,
    pub types: Vec<DataType>,
}

impl CompiledQuery {
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(
            self.columns
                .iter()
                .cloned()
                .zip(self.types.iter().copied())
                .collect(),
        )
    }
}

/// Compile the subtree rooted at `root`.
pub fn compile(plan: &Plan, root: NodeId) -> Result<CompiledQuery, CompileError> {
    Compiler::new().compile(plan, root)
}

/// One output column: rendered expression SQL and its output name.
#[derive(Debug, Clone)]
struct SelectItem {
    sql: String,
    name: String,
}

/// Clause set for one SELECT level, composable until a clause conflict
/// forces a subquery wrap.
#[derive(Debug, Clone)]
struct SelectBox {
    /// None renders as `SELECT *`.
    items: Option<Vec<SelectItem>>,
    from: String,
    predicates: Vec<String>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    schema: TableSchema,
}

impl SelectBox {
    fn scan(from: String, schema: TableSchema) -> Self {
        Self {
            items: None,
            from,
            predicates: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            schema,
        }
    }

    fn render(&self) -> String {
        let mut sql = String::from("SELECT ");
        match &self.items {
            None => sql.push('*'),
            Some(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| {
                        let quoted = quote_ident(&item.name);
                        if item.sql == quoted {
                            quoted
                        } else {
                            format!("{} AS {quoted}", item.sql)
                        }
                    })
                    .collect();
                sql.push_str(&rendered.join(", "));
            }
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.from);
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = self.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }
        sql
    }
}

/// Lowered subtree: either a composable SELECT or an opaque compound
/// (set-operation) body that parents must treat as a subquery.
enum Lowered {
    Select(SelectBox),
    Compound { sql: String, schema: TableSchema },
}

#[derive(Debug, Default)]
pub struct Compiler {
    next_subquery: u32,
    next_derived: u32,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(
        &mut self,
        plan: &Plan,
        root: NodeId,
    ) -> Result<CompiledQuery, CompileError> {
        self.next_subquery = 0;
        self.next_derived = 0;

        let (sql, schema) = match self.lower(plan, root)? {
            Lowered::Select(sel) => (sel.render(), sel.schema),
            Lowered::Compound { sql, schema } => (sql, schema),
        };
        Ok(CompiledQuery {
            sql,
            columns: schema.names(),
            types: schema.types(),
        })
    }

    fn subquery_alias(&mut self) -> String {
        let n = self.next_subquery;
        self.next_subquery += 1;
        format!("t{n}")
    }

    fn derived_name(&mut self) -> String {
        let n = self.next_derived;
        self.next_derived += 1;
        format!("expr_{n}")
    }

    /// Push a lowered child down into a derived table, freeing every clause
    /// for the parent.
    fn wrap(&mut self, sel: SelectBox) -> SelectBox {
        let alias = self.subquery_alias();
        let schema = sel.schema.clone();
        SelectBox::scan(format!("({}) AS {alias}", sel.render()), schema)
    }

    fn as_select(&mut self, lowered: Lowered) -> SelectBox {
        match lowered {
            Lowered::Select(sel) => sel,
            Lowered::Compound { sql, schema } => {
                let alias = self.subquery_alias();
                SelectBox::scan(format!("({sql}) AS {alias}"), schema)
            }
        }
    }

    fn lower(&mut self, plan: &Plan, id: NodeId) -> Result<Lowered, CompileError> {
        match plan.node(id) {
            Node::Table { name, schema } => Ok(Lowered::Select(SelectBox::scan(
                quote_ident(name),
                schema.clone(),
            ))),
            Node::Filter { input, predicate } => {
                let lowered = self.lower(plan, *input)?;
                let child = self.as_select(lowered);
                // Only one WHERE per SELECT, and it runs before grouping and
                // limiting; a filter over any of those must see their output.
                let mut child = if child.items.is_some()
                    || !child.group_by.is_empty()
                    || child.limit.is_some()
                {
                    self.wrap(child)
                } else {
                    child
                };
                let (sql, _) = compile_expr(predicate, &child.schema)?;
                child.predicates.push(sql);
                Ok(Lowered::Select(child))
            }
            Node::Project { input, columns } => {
                let lowered = self.lower(plan, *input)?;
                let child = self.as_select(lowered);
                // ORDER BY resolves names against the result columns first,
                // so a projection alias that shadows a sort key would hijack
                // the sort. A sorted child goes behind a subquery boundary.
                let mut child = if child.items.is_some()
                    || !child.group_by.is_empty()
                    || !child.order_by.is_empty()
                {
                    self.wrap(child)
                } else {
                    child
                };
                let (items, schema) = self.project_items(columns, &child.schema)?;
                child.items = Some(items);
                child.schema = schema;
                Ok(Lowered::Select(child))
            }
            Node::Aggregate { input, keys, aggs } => {
                let lowered = self.lower(plan, *input)?;
                let child = self.as_select(lowered);
                // An aggregate composes only over a bare scan-plus-filter.
                // Anything else (including another aggregate) goes behind a
                // subquery boundary.
                let mut child = if child.items.is_some()
                    || !child.group_by.is_empty()
                    || !child.order_by.is_empty()
                    || child.limit.is_some()
                {
                    self.wrap(child)
                } else {
                    child
                };

                let mut items = Vec::with_capacity(keys.len() + aggs.len());
                let mut out = Vec::with_capacity(keys.len() + aggs.len());
                for key in keys {
                    let ty = child
                        .schema
                        .get(key)
                        .ok_or_else(|| CompileError::UnknownColumn(key.clone()))?;
                    items.push(SelectItem {
                        sql: quote_ident(key),
                        name: key.clone(),
                    });
                    out.push((key.clone(), ty));
                }
                for (name, call) in aggs {
                    if out.iter().any(|(n, _)| n == name) {
                        return Err(CompileError::AmbiguousAlias(name.clone()));
                    }
                    let (sql, ty) = compile_agg(call, &child.schema)?;
                    items.push(SelectItem {
                        sql,
                        name: name.clone(),
                    });
                    out.push((name.clone(), ty));
                }

                child.group_by = keys.iter().map(|k| quote_ident(k)).collect();
                child.items = Some(items);
                child.schema = TableSchema::new(out);
                Ok(Lowered::Select(child))
            }
            Node::Sort { input, keys } => {
                let lowered = self.lower(plan, *input)?;
                let child = self.as_select(lowered);
                // Sorting after a LIMIT reorders the limited rows, so the
                // limit must be sealed first.
                let mut child = if child.limit.is_some() {
                    self.wrap(child)
                } else {
                    child
                };
                let mut order_by = Vec::with_capacity(keys.len());
                for key in keys {
                    let (sql, _) = compile_expr(&key.expr, &child.schema)?;
                    if key.desc {
                        order_by.push(format!("{sql} DESC"));
                    } else {
                        order_by.push(sql);
                    }
                }
                // An outer sort defines the total order; any inner ordering
                // is superseded.
                child.order_by = order_by;
                Ok(Lowered::Select(child))
            }
            Node::Limit {
                input,
                limit,
                offset,
            } => {
                let lowered = self.lower(plan, *input)?;
                let child = self.as_select(lowered);
                // A limit applied twice keeps the inner one intact behind a
                // subquery, never overwrites it.
                let mut child = if child.limit.is_some() || child.offset.is_some() {
                    self.wrap(child)
                } else {
                    child
                };
                child.limit = Some(*limit);
                child.offset = *offset;
                Ok(Lowered::Select(child))
            }
            Node::SetOp { kind, inputs } => self.lower_set_op(plan, *kind, inputs),
            Node::Join {
                kind,
                left,
                right,
                on,
            } => self.lower_join(plan, *kind, *left, *right, on),
        }
    }

    fn project_items(
        &mut self,
        columns: &[Projection],
        schema: &TableSchema,
    ) -> Result<(Vec<SelectItem>, TableSchema), CompileError> {
        let mut items = Vec::with_capacity(columns.len());
        let mut out: Vec<(String, DataType)> = Vec::with_capacity(columns.len());

        for proj in columns {
            let (sql, ty) = compile_expr(proj.expr(), schema)?;
            let (name, explicit) = match proj {
                Projection::Aliased { alias, .. } => (alias.clone(), true),
                Projection::Expr(sett_ir::Expr::Column { name }) => (name.clone(), false),
                Projection::Expr(_) => (self.derived_name(), false),
            };

            let name = if out.iter().any(|(n, _)| *n == name) {
                if explicit {
                    return Err(CompileError::AmbiguousAlias(name));
                }
                // Implicit duplicates (same column projected twice) get a
                // deterministic suffix.
                let mut n = 1;
                loop {
                    let candidate = format!("{name}_{n}");
                    if !out.iter().any(|(existing, _)| *existing == candidate) {
                        break candidate;
                    }
                    n += 1;
                }
            } else {
                name
            };

            items.push(SelectItem {
                sql,
                name: name.clone(),
            });
            out.push((name, ty));
        }
        Ok((items, TableSchema::new(out)))
    }

    fn lower_set_op(
        &mut self,
        plan: &Plan,
        kind: SetOpKind,
        inputs: &[NodeId],
    ) -> Result<Lowered, CompileError> {
        if inputs.len() < 2 {
            return Err(CompileError::UnsupportedOperation(
                "set operation requires at least two inputs".to_string(),
            ));
        }

        let keyword = match kind {
            SetOpKind::Union => "UNION",
            SetOpKind::UnionAll => "UNION ALL",
            SetOpKind::Intersect => "INTERSECT",
            SetOpKind::Except => "EXCEPT",
        };

        let mut schema: Option<TableSchema> = None;
        let mut parts = Vec::with_capacity(inputs.len());
        for input in inputs {
            let (sql, child_schema) = match self.lower(plan, *input)? {
                Lowered::Select(sel) => {
                    let schema = sel.schema.clone();
                    (sel.render(), schema)
                }
                Lowered::Compound { sql, schema } => (sql, schema),
            };
            match &schema {
                None => schema = Some(child_schema),
                Some(first) => {
                    if first.len() != child_schema.len() {
                        return Err(CompileError::UnsupportedOperation(format!(
                            "set operation arity mismatch: {} vs {} columns",
                            first.len(),
                            child_schema.len()
                        )));
                    }
                }
            }
            // SQLite rejects parenthesized compound operands, so isolation
            // happens through a derived table instead. This also keeps any
            // child ORDER BY/LIMIT scoped to that child.
            let alias = self.subquery_alias();
            parts.push(format!("SELECT * FROM ({sql}) AS {alias}"));
        }

        Ok(Lowered::Compound {
            sql: parts.join(&format!(" {keyword} ")),
            schema: schema.expect("set operation has at least two inputs"),
        })
    }

    fn lower_join(
        &mut self,
        plan: &Plan,
        kind: sett_ir::JoinKind,
        left: NodeId,
        right: NodeId,
        on: &sett_ir::Expr,
    ) -> Result<Lowered, CompileError> {
        let keyword = match kind {
            sett_ir::JoinKind::Inner => "JOIN",
            sett_ir::JoinKind::Left => "LEFT JOIN",
            // The remote dialect has no RIGHT/FULL join.
            other => {
                return Err(CompileError::UnsupportedOperation(format!(
                    "{other:?} join is not available in the target dialect"
                )))
            }
        };

        let lowered_left = self.lower(plan, left)?;
        let left_sel = self.as_select(lowered_left);
        let lowered_right = self.lower(plan, right)?;
        let right_sel = self.as_select(lowered_right);
        let left_schema = left_sel.schema.clone();
        let right_schema = right_sel.schema.clone();

        let left_alias = self.subquery_alias();
        let right_alias = self.subquery_alias();

        // Every column referenced by the ON clause must resolve to exactly
        // one side.
        check_join_refs(on, &left_schema, &right_schema)?;
        let mut merged: Vec<(String, DataType)> = left_schema.iter().cloned().collect();
        for (name, ty) in right_schema.iter() {
            if left_schema.get(name).is_none() {
                merged.push((name.clone(), *ty));
            }
        }
        let (on_sql, _) = compile_expr(on, &TableSchema::new(merged))?;

        // Project both sides explicitly so output names stay unique; right
        // side duplicates get a suffix.
        let mut items = Vec::with_capacity(left_schema.len() + right_schema.len());
        let mut out: Vec<(String, DataType)> = Vec::new();
        for (name, ty) in left_schema.iter() {
            items.push(SelectItem {
                sql: format!("{left_alias}.{}", quote_ident(name)),
                name: name.clone(),
            });
            out.push((name.clone(), *ty));
        }
        for (name, ty) in right_schema.iter() {
            let mut out_name = name.clone();
            let mut n = 1;
            while out.iter().any(|(existing, _)| *existing == out_name) {
                out_name = format!("{name}_{n}");
                n += 1;
            }
            items.push(SelectItem {
                sql: format!("{right_alias}.{}", quote_ident(name)),
                name: out_name.clone(),
            });
            out.push((out_name, *ty));
        }

        let from = format!(
            "({}) AS {left_alias} {keyword} ({}) AS {right_alias} ON {on_sql}",
            left_sel.render(),
            right_sel.render(),
        );
        let mut sel = SelectBox::scan(from, TableSchema::new(out));
        sel.items = Some(items);
        Ok(Lowered::Select(sel))
    }
}

/// Reject ON-clause columns that resolve to both sides or to neither.
fn check_join_refs(
    expr: &sett_ir::Expr,
    left: &TableSchema,
    right: &TableSchema,
) -> Result<(), CompileError> {
    use sett_ir::Expr;
    match expr {
        Expr::Column { name } => {
            match (left.get(name).is_some(), right.get(name).is_some()) {
                (true, true) => Err(CompileError::AmbiguousAlias(name.clone())),
                (false, false) => Err(CompileError::UnknownColumn(name.clone())),
                _ => Ok(()),
            }
        }
        Expr::BinaryOp { left: l, right: r, .. } => {
            check_join_refs(l, left, right)?;
            check_join_refs(r, left, right)
        }
        Expr::UnaryOp { expr, .. } | Expr::Contains { expr, .. } => {
            check_join_refs(expr, left, right)
        }
        Expr::Literal { .. } | Expr::Random => Ok(()),
    }
}
