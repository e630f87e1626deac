//! Scalar and aggregate expression compilation.
//!
//! Everything here is pure string building against the SQLite dialect:
//! identifiers double-quoted, string literals single-quoted, booleans as 0/1
//! (SQLite has no boolean storage class). Binary operators are parenthesized
//! unconditionally so operator precedence never becomes a correctness
//! question.

use sett_ir::{AggCall, AggFunc, BinOp, DataType, Expr, TableSchema, UnOp, Value};

use crate::CompileError;

/// Quote an identifier for the SQLite dialect.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded quotes.
pub fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn quote_blob(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2 + 3);
    hex.push_str("X'");
    for b in bytes {
        hex.push_str(&format!("{b:02X}"));
    }
    hex.push('\'');
    hex
}

fn literal(value: &Value) -> (String, DataType) {
    match value {
        Value::Null => ("NULL".to_string(), DataType::Any),
        Value::Bool(b) => ((if *b { "1" } else { "0" }).to_string(), DataType::Boolean),
        Value::Int(i) => (i.to_string(), DataType::Integer),
        // Debug form keeps a decimal point on round floats (2.0, not 2).
        Value::Float(f) => (format!("{f:?}"), DataType::Real),
        Value::Text(s) => (quote_str(s), DataType::Text),
        Value::Blob(b) => (quote_blob(b), DataType::Blob),
        Value::Timestamp(s) => (quote_str(s), DataType::Timestamp),
    }
}

fn bin_op_token(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Eq => "=",
        BinOp::Ne => "<>",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "AND",
        BinOp::Or => "OR",
    }
}

/// Result type of an arithmetic operator. SQLite `/` over two integers is
/// integer division, so Integer/Integer stays Integer across the board.
fn numeric_result(left: DataType, right: DataType) -> DataType {
    let int_like =
        |ty: DataType| matches!(ty, DataType::Integer | DataType::Boolean);
    if int_like(left) && int_like(right) {
        DataType::Integer
    } else {
        DataType::Real
    }
}

/// Escape LIKE wildcards in a substring so `contains` matches it literally.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Compile a scalar expression against the symbol table of its input
/// relation. Returns the SQL fragment and the inferred output type.
pub fn compile_expr(
    expr: &Expr,
    schema: &TableSchema,
) -> Result<(String, DataType), CompileError> {
    match expr {
        Expr::Literal { value } => Ok(literal(value)),
        Expr::Column { name } => {
            let ty = schema
                .get(name)
                .ok_or_else(|| CompileError::UnknownColumn(name.clone()))?;
            Ok((quote_ident(name), ty))
        }
        Expr::BinaryOp { op, left, right } => {
            let (lsql, lty) = compile_expr(left, schema)?;
            let (rsql, rty) = compile_expr(right, schema)?;
            let ty = match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                    numeric_result(lty, rty)
                }
                _ => DataType::Boolean,
            };
            Ok((format!("({lsql} {} {rsql})", bin_op_token(*op)), ty))
        }
        Expr::UnaryOp { op, expr } => {
            let (sql, ty) = compile_expr(expr, schema)?;
            Ok(match op {
                UnOp::Neg => (format!("(-{sql})"), ty),
                UnOp::Not => (format!("(NOT {sql})"), DataType::Boolean),
                UnOp::IsNull => (format!("({sql} IS NULL)"), DataType::Boolean),
                UnOp::IsNotNull => (format!("({sql} IS NOT NULL)"), DataType::Boolean),
            })
        }
        Expr::Contains { expr, needle } => {
            let (sql, _) = compile_expr(expr, schema)?;
            let pattern = quote_str(&format!("%{}%", escape_like(needle)));
            Ok((
                format!("({sql} LIKE {pattern} ESCAPE '\\')"),
                DataType::Boolean,
            ))
        }
        Expr::Random => Ok(("RANDOM()".to_string(), DataType::Integer)),
    }
}

/// Compile an aggregate call against the input relation's symbol table.
pub fn compile_agg(
    call: &AggCall,
    schema: &TableSchema,
) -> Result<(String, DataType), CompileError> {
    let arg = match &call.arg {
        Some(expr) => Some(compile_expr(expr, schema)?),
        None => None,
    };

    match (call.func, arg) {
        (AggFunc::Count, None) => Ok(("COUNT(*)".to_string(), DataType::Integer)),
        (AggFunc::Count, Some((sql, _))) => {
            Ok((format!("COUNT({sql})"), DataType::Integer))
        }
        (AggFunc::Sum, Some((sql, ty))) => {
            Ok((format!("SUM({sql})"), numeric_result(ty, ty)))
        }
        (AggFunc::Avg, Some((sql, _))) => Ok((format!("AVG({sql})"), DataType::Real)),
        (AggFunc::Min, Some((sql, ty))) => Ok((format!("MIN({sql})"), ty)),
        (AggFunc::Max, Some((sql, ty))) => Ok((format!("MAX({sql})"), ty)),
        (AggFunc::GroupConcat, Some((sql, _))) => {
            let sql = match &call.separator {
                Some(sep) => format!("GROUP_CONCAT({sql}, {})", quote_str(sep)),
                None => format!("GROUP_CONCAT({sql})"),
            };
            Ok((sql, DataType::Text))
        }
        (func, None) => Err(CompileError::UnsupportedOperation(format!(
            "aggregate {func:?} requires an argument"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ("name".to_string(), DataType::Text),
            ("age".to_string(), DataType::Integer),
            ("score".to_string(), DataType::Real),
        ])
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_str("it's"), "'it''s'");
    }

    #[test]
    fn literal_encoding() {
        let (sql, ty) = compile_expr(&Expr::lit(3i64), &schema()).unwrap();
        assert_eq!((sql.as_str(), ty), ("3", DataType::Integer));

        let (sql, _) = compile_expr(&Expr::lit(2.0f64), &schema()).unwrap();
        assert_eq!(sql, "2.0");

        let (sql, ty) = compile_expr(&Expr::lit(true), &schema()).unwrap();
        assert_eq!((sql.as_str(), ty), ("1", DataType::Boolean));

        let (sql, _) =
            compile_expr(&Expr::lit(Value::Null), &schema()).unwrap();
        assert_eq!(sql, "NULL");
    }

    #[test]
    fn arithmetic_types() {
        let e = Expr::binary(BinOp::Div, Expr::col("age"), Expr::lit(2i64));
        let (sql, ty) = compile_expr(&e, &schema()).unwrap();
        assert_eq!(sql, "(\"age\" / 2)");
        assert_eq!(ty, DataType::Integer);

        let e = Expr::binary(BinOp::Add, Expr::col("age"), Expr::col("score"));
        let (_, ty) = compile_expr(&e, &schema()).unwrap();
        assert_eq!(ty, DataType::Real);
    }

    #[test]
    fn comparison_is_boolean() {
        let e = Expr::binary(BinOp::Gt, Expr::col("age"), Expr::lit(30i64));
        let (sql, ty) = compile_expr(&e, &schema()).unwrap();
        assert_eq!(sql, "(\"age\" > 30)");
        assert_eq!(ty, DataType::Boolean);
    }

    #[test]
    fn contains_escapes_wildcards() {
        let e = Expr::col("name").contains("50%_off");
        let (sql, _) = compile_expr(&e, &schema()).unwrap();
        assert_eq!(sql, "(\"name\" LIKE '%50\\%\\_off%' ESCAPE '\\')");
    }

    #[test]
    fn contains_escapes_quotes() {
        let e = Expr::col("name").contains("o'brien");
        let (sql, _) = compile_expr(&e, &schema()).unwrap();
        assert_eq!(sql, "(\"name\" LIKE '%o''brien%' ESCAPE '\\')");
    }

    #[test]
    fn unknown_column_rejected() {
        let err = compile_expr(&Expr::col("nope"), &schema()).unwrap_err();
        assert!(matches!(err, CompileError::UnknownColumn(name) if name == "nope"));
    }

    #[test]
    fn aggregates() {
        let (sql, ty) = compile_agg(&AggCall::count_star(), &schema()).unwrap();
        assert_eq!((sql.as_str(), ty), ("COUNT(*)", DataType::Integer));

        let call = AggCall::new(AggFunc::Avg, Expr::col("age"));
        let (sql, ty) = compile_agg(&call, &schema()).unwrap();
        assert_eq!((sql.as_str(), ty), ("AVG(\"age\")", DataType::Real));

        let call = AggCall::group_concat(Expr::col("name"), "; ");
        let (sql, ty) = compile_agg(&call, &schema()).unwrap();
        assert_eq!(
            (sql.as_str(), ty),
            ("GROUP_CONCAT(\"name\", '; ')", DataType::Text)
        );
    }
}
