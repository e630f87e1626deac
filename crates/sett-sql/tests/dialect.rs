//! Every compiled statement must be accepted by the real SQLite parser.
//! Each scenario builds a plan, compiles it, and `prepare`s the SQL
//! against an in-memory database carrying the referenced tables.

use rusqlite::Connection;
use sett_ir::{
    AggCall, AggFunc, BinOp, DataType, Expr, JoinKind, Plan, Projection, SetOpKind, SortKey,
    TableSchema, UnOp,
};
use sett_sql::compile;

fn db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE t (Category TEXT, amount INTEGER);
         CREATE TABLE orders (id INTEGER, customer_id INTEGER);
         CREATE TABLE customers (id INTEGER, name TEXT);",
    )
    .unwrap();
    conn
}

fn sales_schema() -> TableSchema {
    TableSchema::new(vec![
        ("Category".to_string(), DataType::Text),
        ("amount".to_string(), DataType::Integer),
    ])
}

fn assert_prepares(plan: &Plan, root: sett_ir::NodeId) {
    let q = compile(plan, root).unwrap();
    let conn = db();
    if let Err(e) = conn.prepare(&q.sql) {
        panic!("SQLite rejected {:?}: {e}", q.sql);
    };
}

#[test]
fn scan_filter_and_projection_prepare() {
    let mut plan = Plan::new();
    let t = plan.table("t", sales_schema());
    assert_prepares(&plan, t);

    let f = plan.filter(
        t,
        Expr::binary(
            BinOp::And,
            Expr::binary(BinOp::Gt, Expr::col("amount"), Expr::lit(0i64)),
            Expr::unary(UnOp::IsNotNull, Expr::col("Category")),
        ),
    );
    assert_prepares(&plan, f);

    let p = plan.project(
        f,
        vec![
            Projection::Expr(Expr::col("Category")),
            Projection::Aliased {
                expr: Expr::binary(BinOp::Mul, Expr::col("amount"), Expr::lit(2i64)),
                alias: "double".to_string(),
            },
            Projection::Expr(Expr::binary(
                BinOp::Add,
                Expr::col("amount"),
                Expr::lit(1.5f64),
            )),
        ],
    );
    assert_prepares(&plan, p);
}

#[test]
fn aggregates_and_sorts_prepare() {
    let mut plan = Plan::new();
    let t = plan.table("t", sales_schema());
    let g = plan.aggregate(
        t,
        vec!["Category".to_string()],
        vec![
            ("count".to_string(), AggCall::count_star()),
            (
                "total".to_string(),
                AggCall::new(AggFunc::Sum, Expr::col("amount")),
            ),
            (
                "names".to_string(),
                AggCall::group_concat(Expr::col("Category"), "; "),
            ),
        ],
    );
    let s = plan.sort(g, vec![SortKey::desc(Expr::col("count"))]);
    assert_prepares(&plan, s);

    let shuffled = plan.sort(t, vec![SortKey::random()]);
    assert_prepares(&plan, shuffled);
}

#[test]
fn subquery_wraps_prepare() {
    let mut plan = Plan::new();
    let t = plan.table("t", sales_schema());

    // Filter over an aggregate.
    let g = plan.aggregate(
        t,
        vec!["Category".to_string()],
        vec![("count".to_string(), AggCall::count_star())],
    );
    let f = plan.filter(
        g,
        Expr::binary(BinOp::Gt, Expr::col("count"), Expr::lit(1i64)),
    );
    assert_prepares(&plan, f);

    // Limit over limit, then a sort over the sealed window.
    let inner = plan.limit(t, 10, Some(5));
    let outer = plan.limit(inner, 3, None);
    let sorted = plan.sort(outer, vec![SortKey::asc(Expr::col("amount"))]);
    assert_prepares(&plan, sorted);

    // Projection alias shadowing a sort key stays behind a subquery.
    let by_cat = plan.sort(t, vec![SortKey::asc(Expr::col("Category"))]);
    let shadowed = plan.project(
        by_cat,
        vec![Projection::Aliased {
            expr: Expr::col("amount"),
            alias: "Category".to_string(),
        }],
    );
    assert_prepares(&plan, shadowed);
}

#[test]
fn set_operations_prepare() {
    let mut plan = Plan::new();
    let t = plan.table("t", sales_schema());
    for kind in [
        SetOpKind::Union,
        SetOpKind::UnionAll,
        SetOpKind::Intersect,
        SetOpKind::Except,
    ] {
        let u = plan.set_op(kind, vec![t, t]);
        assert_prepares(&plan, u);
    }
}

#[test]
fn joins_prepare() {
    let mut plan = Plan::new();
    let orders = plan.table(
        "orders",
        TableSchema::new(vec![
            ("id".to_string(), DataType::Integer),
            ("customer_id".to_string(), DataType::Integer),
        ]),
    );
    let customers = plan.table(
        "customers",
        TableSchema::new(vec![
            ("id".to_string(), DataType::Integer),
            ("name".to_string(), DataType::Text),
        ]),
    );
    for kind in [JoinKind::Inner, JoinKind::Left] {
        let j = plan.join(
            kind,
            orders,
            customers,
            Expr::binary(BinOp::Eq, Expr::col("customer_id"), Expr::col("name")),
        );
        assert_prepares(&plan, j);
    }
}

#[test]
fn like_escaping_prepares_and_matches_literally() {
    let mut plan = Plan::new();
    let t = plan.table("t", sales_schema());
    let f = plan.filter(t, Expr::col("Category").contains("100%_a\\b"));
    let q = compile(&plan, f).unwrap();

    let conn = db();
    conn.execute_batch(
        "INSERT INTO t VALUES ('price 100%_a\\b here', 1);
         INSERT INTO t VALUES ('100xza\\b', 2);",
    )
    .unwrap();
    // The wildcards in the needle are escaped, so only the literal
    // occurrence matches.
    let n: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM ({}) ", q.sql),
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(n, 1);
}
