//! # Operators Stored in the Memo
//!
//! A candidate expression in the memo is one operator plus an ordered list of child
//! groups. This module defines the operator descriptors; the children live in
//! [`MemoExpr`](crate::memo::MemoExpr).
//!
//! - [`Expr`]: scalar expressions (predicates, projections, join conditions). An
//!   [`Expr::OuterRef`] is a correlated reference to a column of an enclosing query;
//!   several rules refuse to fire on expressions carrying one.
//! - [`LogicalOp`]: *what* to compute. Exploration rules rewrite these.
//! - [`PhysicalOp`]: *how* to compute it. Implementation rules produce these from
//!   logical operators, and plan enumeration materializes trees of them.
//! - [`Operator`]: the unified type the memo stores and deduplicates on, with a
//!   data-free [`OpKind`] used by pattern matching.
//!
//! Everything here is `Hash + Eq` because (operator, children) is the identity of a
//! candidate expression.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Reference to a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
    pub index: u32,
}

impl ColumnRef {
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
            index: 0,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{}.{}", t, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Constant value. `f64` goes through `OrderedFloat` so literals can be hashed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since 1970-01-01.
    Date(i32),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{}", v.0),
            ScalarValue::Utf8(s) => write!(f, "'{s}'"),
            ScalarValue::Date(d) => write!(f, "DATE({d})"),
        }
    }
}

/// Scalar expressions used in predicates, projections and join conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnRef),
    /// Column of an enclosing query block (correlated subquery reference).
    OuterRef(ColumnRef),
    Literal(ScalarValue),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    /// Flat conjunction.
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    /// `left = right` over two qualified columns.
    pub fn equi(lt: &str, lc: &str, rt: &str, rc: &str) -> Self {
        Expr::BinaryOp {
            op: BinaryOp::Eq,
            left: Box::new(Expr::Column(ColumnRef::qualified(lt, lc))),
            right: Box::new(Expr::Column(ColumnRef::qualified(rt, rc))),
        }
    }

    /// The constant `TRUE`, used as the condition of cross joins.
    pub fn true_lit() -> Self {
        Expr::Literal(ScalarValue::Bool(true))
    }

    /// Local column references. Outer references are not included.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Column(c) = e {
                cols.push(c);
            }
        });
        cols
    }

    /// Whether the expression refers to a column of an enclosing query.
    pub fn has_outer_refs(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| found |= matches!(e, Expr::OuterRef(_)));
        found
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Rebuild a predicate from conjuncts; a single conjunct is returned as is.
    pub fn conjunction(mut conjuncts: Vec<Expr>) -> Self {
        match conjuncts.len() {
            0 => Expr::true_lit(),
            1 => conjuncts.remove(0),
            _ => Expr::And(conjuncts),
        }
    }

    /// Conjunction with the conjuncts sorted and duplicates removed. Two conditions
    /// built from the same conjuncts in any order are equal.
    pub fn canonical_conjunction(mut conjuncts: Vec<Expr>) -> Self {
        conjuncts.sort_by_cached_key(|c| c.to_string());
        conjuncts.dedup();
        Expr::conjunction(conjuncts)
    }

    /// This predicate with its conjuncts in canonical order.
    pub fn canonicalized(&self) -> Self {
        Expr::canonical_conjunction(self.conjuncts().into_iter().cloned().collect())
    }

    /// At least one conjunct is `column = column`.
    pub fn has_equi_predicate(&self) -> bool {
        self.conjuncts().iter().any(|c| {
            matches!(c, Expr::BinaryOp { op: BinaryOp::Eq, left, right }
                if matches!(left.as_ref(), Expr::Column(_))
                    && matches!(right.as_ref(), Expr::Column(_)))
        })
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Column(_) | Expr::OuterRef(_) | Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expr::UnaryOp { operand, .. } => operand.visit(f),
            Expr::Function { args, .. } => args.iter().for_each(|a| a.visit(f)),
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().for_each(|e| e.visit(f)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::OuterRef(c) => write!(f, "outer({c})"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { op, left, right } => write!(f, "{left} {op} {right}"),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args, ", ")?;
                write!(f, ")")
            }
            Expr::And(exprs) => write_list(f, exprs, " AND "),
            Expr::Or(exprs) => {
                write!(f, "(")?;
                write_list(f, exprs, " OR ")?;
                write!(f, ")")
            }
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// SQL join types. Only `Inner` and `Cross` are symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
    Cross,
}

impl JoinType {
    pub fn is_symmetric(&self) -> bool {
        matches!(self, JoinType::Inner | JoinType::Cross)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggExpr {
    pub func: AggFunc,
    pub arg: Expr,
    pub distinct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
    pub nulls_first: bool,
}

/// Which join input is materialized into the hash table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildSide {
    Left,
    Right,
}

/// Logical operators. Children are child groups held by the memo expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    /// Leaf.
    Scan {
        table: TableRef,
        columns: Vec<ColumnRef>,
        predicate: Option<Expr>,
    },
    Filter {
        predicate: Expr,
    },
    Project {
        exprs: Vec<Expr>,
        aliases: Vec<String>,
    },
    Join {
        join_type: JoinType,
        condition: Expr,
    },
    Aggregate {
        group_by: Vec<Expr>,
        aggregates: Vec<AggExpr>,
    },
    Sort {
        order: Vec<SortKey>,
    },
    Limit {
        offset: u64,
        count: u64,
    },
}

/// Physical operators produced by implementation rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalOp {
    SeqScan {
        table: TableRef,
        columns: Vec<ColumnRef>,
        predicate: Option<Expr>,
    },
    Filter {
        predicate: Expr,
    },
    Project {
        exprs: Vec<Expr>,
        aliases: Vec<String>,
    },
    HashJoin {
        join_type: JoinType,
        build_side: BuildSide,
        condition: Expr,
    },
    /// Inner equi-joins only.
    MergeJoin {
        join_type: JoinType,
        condition: Expr,
    },
    NestedLoopJoin {
        join_type: JoinType,
        condition: Expr,
    },
    HashAggregate {
        group_by: Vec<Expr>,
        aggregates: Vec<AggExpr>,
    },
    StreamAggregate {
        group_by: Vec<Expr>,
        aggregates: Vec<AggExpr>,
    },
    SortOp {
        order: Vec<SortKey>,
    },
    Limit {
        offset: u64,
        count: u64,
    },
}

/// Unified operator stored in candidate expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Logical(LogicalOp),
    Physical(PhysicalOp),
}

impl Operator {
    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::Logical(_))
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, Operator::Physical(_))
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Operator::Logical(l) => OpKind::Logical(l.kind()),
            Operator::Physical(p) => OpKind::Physical(p.kind()),
        }
    }

    /// The operator with its join condition, if any, in canonical conjunct order.
    pub fn canonicalized(mut self) -> Self {
        match &mut self {
            Operator::Logical(LogicalOp::Join { condition, .. })
            | Operator::Physical(PhysicalOp::HashJoin { condition, .. })
            | Operator::Physical(PhysicalOp::MergeJoin { condition, .. })
            | Operator::Physical(PhysicalOp::NestedLoopJoin { condition, .. }) => {
                *condition = condition.canonicalized();
            }
            _ => {}
        }
        self
    }

    /// Whether any scalar expression carried by the operator has outer references.
    pub fn has_outer_refs(&self) -> bool {
        let exprs: Vec<&Expr> = match self {
            Operator::Logical(LogicalOp::Scan { predicate, .. })
            | Operator::Physical(PhysicalOp::SeqScan { predicate, .. }) => {
                predicate.iter().collect()
            }
            Operator::Logical(LogicalOp::Filter { predicate })
            | Operator::Physical(PhysicalOp::Filter { predicate }) => vec![predicate],
            Operator::Logical(LogicalOp::Project { exprs, .. })
            | Operator::Physical(PhysicalOp::Project { exprs, .. }) => exprs.iter().collect(),
            Operator::Logical(LogicalOp::Join { condition, .. })
            | Operator::Physical(PhysicalOp::HashJoin { condition, .. })
            | Operator::Physical(PhysicalOp::MergeJoin { condition, .. })
            | Operator::Physical(PhysicalOp::NestedLoopJoin { condition, .. }) => {
                vec![condition]
            }
            Operator::Logical(LogicalOp::Aggregate { group_by, aggregates })
            | Operator::Physical(PhysicalOp::HashAggregate { group_by, aggregates })
            | Operator::Physical(PhysicalOp::StreamAggregate { group_by, aggregates }) => group_by
                .iter()
                .chain(aggregates.iter().map(|a| &a.arg))
                .collect(),
            Operator::Logical(LogicalOp::Sort { order })
            | Operator::Physical(PhysicalOp::SortOp { order }) => {
                order.iter().map(|k| &k.expr).collect()
            }
            Operator::Logical(LogicalOp::Limit { .. })
            | Operator::Physical(PhysicalOp::Limit { .. }) => vec![],
        };
        exprs.into_iter().any(Expr::has_outer_refs)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Logical(op) => match op {
                LogicalOp::Scan { table, .. } => write!(f, "Scan({table})"),
                LogicalOp::Filter { predicate } => write!(f, "Filter({predicate})"),
                LogicalOp::Project { exprs, .. } => write!(f, "Project[{}]", exprs.len()),
                LogicalOp::Join { join_type, condition } => {
                    write!(f, "Join[{join_type:?}]({condition})")
                }
                LogicalOp::Aggregate { group_by, .. } => {
                    write!(f, "Aggregate[{} keys]", group_by.len())
                }
                LogicalOp::Sort { order } => write!(f, "Sort[{} keys]", order.len()),
                LogicalOp::Limit { offset, count } => write!(f, "Limit({offset}, {count})"),
            },
            Operator::Physical(op) => match op {
                PhysicalOp::SeqScan { table, .. } => write!(f, "SeqScan({table})"),
                PhysicalOp::Filter { predicate } => write!(f, "Filter({predicate})"),
                PhysicalOp::Project { exprs, .. } => write!(f, "Project[{}]", exprs.len()),
                PhysicalOp::HashJoin {
                    join_type,
                    build_side,
                    condition,
                } => write!(f, "HashJoin[{join_type:?}, build={build_side:?}]({condition})"),
                PhysicalOp::MergeJoin { join_type, condition } => {
                    write!(f, "MergeJoin[{join_type:?}]({condition})")
                }
                PhysicalOp::NestedLoopJoin { join_type, condition } => {
                    write!(f, "NestedLoopJoin[{join_type:?}]({condition})")
                }
                PhysicalOp::HashAggregate { group_by, .. } => {
                    write!(f, "HashAggregate[{} keys]", group_by.len())
                }
                PhysicalOp::StreamAggregate { group_by, .. } => {
                    write!(f, "StreamAggregate[{} keys]", group_by.len())
                }
                PhysicalOp::SortOp { order } => write!(f, "Sort[{} keys]", order.len()),
                PhysicalOp::Limit { offset, count } => write!(f, "Limit({offset}, {count})"),
            },
        }
    }
}

/// Kind discriminant for pattern matching (without data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Logical(LogicalOpKind),
    Physical(PhysicalOpKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOpKind {
    Scan,
    Filter,
    Project,
    Join,
    Aggregate,
    Sort,
    Limit,
}

impl LogicalOp {
    pub fn kind(&self) -> LogicalOpKind {
        match self {
            LogicalOp::Scan { .. } => LogicalOpKind::Scan,
            LogicalOp::Filter { .. } => LogicalOpKind::Filter,
            LogicalOp::Project { .. } => LogicalOpKind::Project,
            LogicalOp::Join { .. } => LogicalOpKind::Join,
            LogicalOp::Aggregate { .. } => LogicalOpKind::Aggregate,
            LogicalOp::Sort { .. } => LogicalOpKind::Sort,
            LogicalOp::Limit { .. } => LogicalOpKind::Limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalOpKind {
    SeqScan,
    Filter,
    Project,
    HashJoin,
    MergeJoin,
    NestedLoopJoin,
    HashAggregate,
    StreamAggregate,
    SortOp,
    Limit,
}

impl PhysicalOp {
    pub fn kind(&self) -> PhysicalOpKind {
        match self {
            PhysicalOp::SeqScan { .. } => PhysicalOpKind::SeqScan,
            PhysicalOp::Filter { .. } => PhysicalOpKind::Filter,
            PhysicalOp::Project { .. } => PhysicalOpKind::Project,
            PhysicalOp::HashJoin { .. } => PhysicalOpKind::HashJoin,
            PhysicalOp::MergeJoin { .. } => PhysicalOpKind::MergeJoin,
            PhysicalOp::NestedLoopJoin { .. } => PhysicalOpKind::NestedLoopJoin,
            PhysicalOp::HashAggregate { .. } => PhysicalOpKind::HashAggregate,
            PhysicalOp::StreamAggregate { .. } => PhysicalOpKind::StreamAggregate,
            PhysicalOp::SortOp { .. } => PhysicalOpKind::SortOp,
            PhysicalOp::Limit { .. } => PhysicalOpKind::Limit,
        }
    }
}
