//! Relational-algebra plan for remote datasette execution.
//!
//! A [`Plan`] is an arena of immutable operator nodes referenced by
//! [`NodeId`]. The arena form makes the plan a DAG with cheap sharing: a
//! node may be the input of several downstream nodes (a table scanned on both
//! sides of a set operation, for instance), and because a node can only
//! reference ids pushed before it, cycles are impossible by construction.
//!
//! All types serialize deterministically, which makes a plan's JSON form
//! suitable for fingerprinting and provenance.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod types;
pub use types::{DataType, TableSchema};

/// Handle to a node inside a [`Plan`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Arena of plan nodes. The most recently pushed node is the root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    nodes: Vec<Node>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    /// Root of the plan: the last node pushed. Empty plans have no root.
    pub fn root(&self) -> Option<NodeId> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(NodeId(self.nodes.len() as u32 - 1))
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Calculate fingerprint (SHA-256 of the canonical JSON form) for
    /// deterministic caching.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("plan should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    // Builder methods. Input ids must come from this plan; the arena grows
    // append-only so a fresh id always refers past every existing node.

    pub fn table(&mut self, name: impl Into<String>, schema: TableSchema) -> NodeId {
        self.push(Node::Table {
            name: name.into(),
            schema,
        })
    }

    pub fn project(&mut self, input: NodeId, columns: Vec<Projection>) -> NodeId {
        self.push(Node::Project { input, columns })
    }

    pub fn filter(&mut self, input: NodeId, predicate: Expr) -> NodeId {
        self.push(Node::Filter { input, predicate })
    }

    pub fn aggregate(
        &mut self,
        input: NodeId,
        keys: Vec<String>,
        aggs: Vec<(String, AggCall)>,
    ) -> NodeId {
        self.push(Node::Aggregate { input, keys, aggs })
    }

    pub fn sort(&mut self, input: NodeId, keys: Vec<SortKey>) -> NodeId {
        self.push(Node::Sort { input, keys })
    }

    pub fn limit(&mut self, input: NodeId, limit: u64, offset: Option<u64>) -> NodeId {
        self.push(Node::Limit {
            input,
            limit,
            offset,
        })
    }

    pub fn set_op(&mut self, kind: SetOpKind, inputs: Vec<NodeId>) -> NodeId {
        self.push(Node::SetOp { kind, inputs })
    }

    pub fn join(&mut self, kind: JoinKind, left: NodeId, right: NodeId, on: Expr) -> NodeId {
        self.push(Node::Join {
            kind,
            left,
            right,
            on,
        })
    }
}

/// Plan operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Node {
    /// Leaf relation: a remote table with its discovered schema.
    Table { name: String, schema: TableSchema },
    Project {
        input: NodeId,
        columns: Vec<Projection>,
    },
    Filter {
        input: NodeId,
        predicate: Expr,
    },
    Aggregate {
        input: NodeId,
        /// Group keys, by column name of the input relation.
        keys: Vec<String>,
        /// Output name and call for each aggregate column, in output order.
        aggs: Vec<(String, AggCall)>,
    },
    Sort {
        input: NodeId,
        keys: Vec<SortKey>,
    },
    Limit {
        input: NodeId,
        limit: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        offset: Option<u64>,
    },
    SetOp {
        kind: SetOpKind,
        inputs: Vec<NodeId>,
    },
    Join {
        kind: JoinKind,
        left: NodeId,
        right: NodeId,
        on: Expr,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOpKind {
    Union,
    UnionAll,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

/// One output column of a projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Projection {
    Expr(Expr),
    Aliased { expr: Expr, alias: String },
}

impl Projection {
    pub fn expr(&self) -> &Expr {
        match self {
            Projection::Expr(e) => e,
            Projection::Aliased { expr, .. } => expr,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    #[serde(default)]
    pub desc: bool,
}

impl SortKey {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, desc: false }
    }

    pub fn desc(expr: Expr) -> Self {
        Self { expr, desc: true }
    }

    /// Random ordering; lowers to the dialect's RANDOM() function.
    pub fn random() -> Self {
        Self {
            expr: Expr::Random,
            desc: false,
        }
    }
}

/// Aggregate function call. `arg: None` is only valid for `Count` (COUNT(*)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggCall {
    pub func: AggFunc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg: Option<Expr>,
    /// Separator for `GroupConcat`; ignored by other functions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

impl AggCall {
    pub fn count_star() -> Self {
        Self {
            func: AggFunc::Count,
            arg: None,
            separator: None,
        }
    }

    pub fn new(func: AggFunc, arg: Expr) -> Self {
        Self {
            func,
            arg: Some(arg),
            separator: None,
        }
    }

    pub fn group_concat(arg: Expr, separator: impl Into<String>) -> Self {
        Self {
            func: AggFunc::GroupConcat,
            arg: Some(arg),
            separator: Some(separator.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    GroupConcat,
}

/// Scalar expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    Literal { value: Value },
    Column { name: String },
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp { op: UnOp, expr: Box<Expr> },
    /// Substring search; lowers to LIKE with wildcard escaping.
    Contains { expr: Box<Expr>, needle: String },
    /// Dialect random function. Non-deterministic by design.
    Random,
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column { name: name.into() }
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal {
            value: value.into(),
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnOp, expr: Expr) -> Self {
        Expr::UnaryOp {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn contains(self, needle: impl Into<String>) -> Self {
        Expr::Contains {
            expr: Box::new(self),
            needle: needle.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    IsNull,
    IsNotNull,
}

/// Typed scalar value, both for literals in expressions and for decoded
/// result cells. Temporal values carry their ISO text form.
///
/// Serialization is untagged, so `Timestamp` writes a bare JSON string and
/// parses back as `Text`. The collapse is deliberate: both variants render
/// the same quoted SQL literal, and fingerprints are taken over the
/// serialized form, so round-tripping a plan through JSON changes neither
/// its SQL nor its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people_schema() -> TableSchema {
        TableSchema::new(vec![
            ("name".to_string(), DataType::Text),
            ("age".to_string(), DataType::Integer),
        ])
    }

    #[test]
    fn root_is_last_pushed() {
        let mut plan = Plan::new();
        assert_eq!(plan.root(), None);

        let t = plan.table("people", people_schema());
        assert_eq!(plan.root(), Some(t));

        let f = plan.filter(
            t,
            Expr::binary(BinOp::Gt, Expr::col("age"), Expr::lit(30i64)),
        );
        assert_eq!(plan.root(), Some(f));
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn shared_input_forms_a_dag() {
        let mut plan = Plan::new();
        let t = plan.table("people", people_schema());
        let a = plan.filter(
            t,
            Expr::binary(BinOp::Lt, Expr::col("age"), Expr::lit(18i64)),
        );
        let b = plan.filter(
            t,
            Expr::binary(BinOp::Ge, Expr::col("age"), Expr::lit(65i64)),
        );
        let u = plan.set_op(SetOpKind::UnionAll, vec![a, b]);

        match plan.node(u) {
            Node::SetOp { inputs, .. } => assert_eq!(inputs, &vec![a, b]),
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn fingerprint_deterministic() {
        let mut plan = Plan::new();
        let t = plan.table("people", people_schema());
        plan.sort(t, vec![SortKey::desc(Expr::col("age"))]);

        let copy = plan.clone();
        assert_eq!(plan.fingerprint(), copy.fingerprint());
    }

    #[test]
    fn json_round_trip() {
        let mut plan = Plan::new();
        let t = plan.table("people", people_schema());
        let g = plan.aggregate(
            t,
            vec!["name".to_string()],
            vec![("n".to_string(), AggCall::count_star())],
        );
        plan.sort(g, vec![SortKey::desc(Expr::col("n"))]);

        let json = serde_json::to_string(&plan).unwrap();
        let parsed: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(plan.fingerprint(), parsed.fingerprint());
    }

    #[test]
    fn timestamp_value_parses_back_as_text() {
        let ts = Value::Timestamp("2024-01-01 00:00:00".to_string());
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2024-01-01 00:00:00\"");

        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Value::Text("2024-01-01 00:00:00".to_string()));

        let mut plan = Plan::new();
        let t = plan.table("events", people_schema());
        plan.filter(
            t,
            Expr::binary(BinOp::Gt, Expr::col("name"), Expr::lit(ts)),
        );
        let round: Plan =
            serde_json::from_str(&serde_json::to_string(&plan).unwrap()).unwrap();
        assert_eq!(plan.fingerprint(), round.fingerprint());
    }
}
