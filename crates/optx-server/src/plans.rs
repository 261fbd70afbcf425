//! # Plan-Space Endpoints
//!
//! Explain every plan the optimizer can build for a join graph. The caller sends the
//! tables and the equi-join edges between them; the service builds a left-deep memo
//! in request order, runs the search to closure and answers from the resulting plan
//! space:
//!
//! - `POST /plans/count`:  number of physical and logical plans
//! - `POST /plans/unrank`: the plans at the given ranks
//! - `POST /plans/sample`: plans drawn uniformly at random
//!
//! ## Building the Initial Tree
//!
//! The first table is the left side of the first edge (or the first table when there
//! are no edges). Each step then joins the table named by the first edge that
//! connects the tree built so far with a table not yet in it; every edge between
//! that table and the tree becomes one conjunct of the join condition. A table no
//! edge reaches is added with a cross join.
//!
//! The new table is always the right input, so a LEFT or RIGHT edge that lists it
//! first is mirrored. SEMI and ANTI edges cannot be mirrored and must list the
//! table already in the tree first.

use axum::extract::State;
use axum::Json;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use optx_core::catalog::InMemoryCatalog;
use optx_core::expr::*;
use optx_core::memo::{GroupId, Memo};
use optx_core::plan::{PlanKind, PlanNode, PlanSpace};
use optx_core::scheduler::{RunStats, Scheduler};

use crate::routes::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// JSON wire-protocol types
// ---------------------------------------------------------------------------

/// Tables and equi-join edges.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGraph {
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub joins: Vec<JoinEdge>,
    /// Connector type selecting source-scoped rules; the server default if absent.
    #[serde(default)]
    pub source_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    /// Identifier the edges refer to (e.g. "t0").
    pub id: String,
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEdge {
    pub left_table_id: String,
    pub right_table_id: String,
    /// INNER, LEFT, RIGHT, FULL, SEMI, ANTI or CROSS.
    #[serde(default = "default_join_type")]
    pub join_type: String,
    pub left_column: String,
    pub right_column: String,
}

fn default_join_type() -> String {
    "INNER".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrankRequest {
    #[serde(flatten)]
    pub graph: JoinGraph,
    pub ranks: Vec<u64>,
    /// Rank the logical plan space instead of the physical one.
    #[serde(default)]
    pub logical: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRequest {
    #[serde(flatten)]
    pub graph: JoinGraph,
    pub size: usize,
    /// Fixed seed for a reproducible sample.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub logical: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub physical_plans: u64,
    pub logical_plans: u64,
    /// The physical count hit `u64::MAX`; ranks past it are unreachable.
    pub saturated: bool,
    pub groups: usize,
    pub exprs: usize,
    pub stats: RunStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedPlan {
    pub rank: u64,
    pub plan: PlanNode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrankResponse {
    pub count: u64,
    pub plans: Vec<RankedPlan>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleResponse {
    pub count: u64,
    pub plans: Vec<PlanNode>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /plans/count
pub async fn count_plans(
    State(state): State<Arc<AppState>>,
    Json(graph): Json<JoinGraph>,
) -> Result<Json<CountResponse>, ApiError> {
    let resp = run_search(&state, graph, |searched| {
        let mut physical = PlanSpace::build(&searched.memo, searched.root, PlanKind::Physical)?;
        let mut logical = PlanSpace::build(&searched.memo, searched.root, PlanKind::Logical)?;
        let physical_plans = physical.count()?;
        Ok(CountResponse {
            physical_plans,
            logical_plans: logical.count()?,
            saturated: physical_plans == u64::MAX,
            groups: searched.memo.num_groups(),
            exprs: searched.memo.num_exprs(),
            stats: searched.stats,
        })
    })
    .await?;
    Ok(Json(resp))
}

/// POST /plans/unrank
pub async fn unrank_plans(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UnrankRequest>,
) -> Result<Json<UnrankResponse>, ApiError> {
    check_limit(&state, req.ranks.len())?;
    let kind = plan_kind(req.logical);
    let ranks = req.ranks;
    let resp = run_search(&state, req.graph, move |searched| {
        let mut space = PlanSpace::build(&searched.memo, searched.root, kind)?;
        let count = space.count()?;
        let plans = ranks
            .into_iter()
            .map(|rank| -> Result<RankedPlan, ApiError> {
                Ok(RankedPlan {
                    rank,
                    plan: space.unrank(rank, &searched.memo)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(UnrankResponse { count, plans })
    })
    .await?;
    Ok(Json(resp))
}

/// POST /plans/sample
pub async fn sample_plans(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SampleRequest>,
) -> Result<Json<SampleResponse>, ApiError> {
    check_limit(&state, req.size)?;
    let kind = plan_kind(req.logical);
    let (size, seed) = (req.size, req.seed);
    let resp = run_search(&state, req.graph, move |searched| {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut space = PlanSpace::build(&searched.memo, searched.root, kind)?;
        Ok(SampleResponse {
            count: space.count()?,
            plans: space.sample(&mut rng, size, &searched.memo)?,
        })
    })
    .await?;
    Ok(Json(resp))
}

fn plan_kind(logical: bool) -> PlanKind {
    if logical {
        PlanKind::Logical
    } else {
        PlanKind::Physical
    }
}

fn check_limit(state: &AppState, requested: usize) -> Result<(), ApiError> {
    let limit = state.config.max_sample;
    if requested > limit {
        return Err(ApiError::bad_request(format!(
            "{requested} plans requested, at most {limit} allowed"
        )));
    }
    Ok(())
}

/// Memo after a completed search.
pub struct Searched {
    pub memo: Memo,
    pub root: GroupId,
    pub stats: RunStats,
}

/// Build the memo for `graph`, search it to closure and hand the result to
/// `answer`, all on the blocking pool.
async fn run_search<T, F>(state: &AppState, graph: JoinGraph, answer: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Searched) -> Result<T, ApiError> + Send + 'static,
{
    let built = build_memo(&graph)?;
    let registry = state.rule_registry.clone();
    let mut config = state.config.search.clone();
    if graph.source_type.is_some() {
        config.source_type = graph.source_type;
    }

    tokio::task::spawn_blocking(move || {
        let mut scheduler =
            Scheduler::new(built.memo, registry, Arc::new(built.catalog), config);
        scheduler.run_to_closure(built.root)?;
        let stats = scheduler.stats();
        debug!(root = built.root, ?stats, "join graph searched");
        answer(&Searched {
            memo: scheduler.into_memo(),
            root: built.root,
            stats,
        })
    })
    .await
    .map_err(|err| ApiError::Internal(format!("search task failed: {err}")))?
}

// ---------------------------------------------------------------------------
// Memo construction from join graph
// ---------------------------------------------------------------------------

pub struct BuiltGraph {
    pub memo: Memo,
    pub root: GroupId,
    pub catalog: InMemoryCatalog,
}

/// Scan groups for every table and a left-deep join tree over them.
pub fn build_memo(graph: &JoinGraph) -> Result<BuiltGraph, ApiError> {
    let Some(first_table) = graph.tables.first() else {
        return Err(ApiError::bad_request("join graph has no tables"));
    };

    let memo = Memo::new();
    let mut catalog = InMemoryCatalog::new();
    let mut scans: HashMap<&str, (GroupId, &TableInfo)> = HashMap::new();
    let mut names = HashSet::new();
    for table in &graph.tables {
        if !names.insert((&table.schema, &table.name)) {
            return Err(ApiError::bad_request(format!(
                "table {}.{} listed twice",
                table.schema, table.name
            )));
        }
        let table_ref = TableRef::new(&table.schema, &table.name);
        let columns: Vec<ColumnRef> = table
            .columns
            .iter()
            .map(|c| ColumnRef::qualified(&table.name, c))
            .collect();
        catalog.add_table(&table_ref, columns.clone());
        let (group, _) = memo.add_expr(
            Operator::Logical(LogicalOp::Scan {
                table: table_ref,
                columns,
                predicate: None,
            }),
            vec![],
        );
        if scans.insert(table.id.as_str(), (group, table)).is_some() {
            return Err(ApiError::bad_request(format!("duplicate table id {}", table.id)));
        }
    }

    for edge in &graph.joins {
        for id in [&edge.left_table_id, &edge.right_table_id] {
            if !scans.contains_key(id.as_str()) {
                return Err(ApiError::bad_request(format!("unknown table id {id}")));
            }
        }
        if edge.left_table_id == edge.right_table_id {
            return Err(ApiError::bad_request(format!(
                "edge joins table {} with itself",
                edge.left_table_id
            )));
        }
        parse_join_type(&edge.join_type)?;
    }

    let first = graph
        .joins
        .first()
        .map_or(first_table.id.as_str(), |e| e.left_table_id.as_str());
    let mut joined = vec![first];
    let mut root = scans[first].0;

    while joined.len() < graph.tables.len() {
        let connected = graph.joins.iter().find_map(|e| {
            let left_in = joined.contains(&e.left_table_id.as_str());
            let right_in = joined.contains(&e.right_table_id.as_str());
            match (left_in, right_in) {
                (true, false) => Some(e.right_table_id.as_str()),
                (false, true) => Some(e.left_table_id.as_str()),
                _ => None,
            }
        });
        let next = connected.or_else(|| {
            graph
                .tables
                .iter()
                .map(|t| t.id.as_str())
                .find(|id| !joined.contains(id))
        });
        let Some(next) = next else {
            break;
        };

        let edges: Vec<&JoinEdge> = graph
            .joins
            .iter()
            .filter(|e| {
                (e.left_table_id == next && joined.contains(&e.right_table_id.as_str()))
                    || (e.right_table_id == next && joined.contains(&e.left_table_id.as_str()))
            })
            .collect();
        let join_type = join_type_for(&edges, next)?;
        let condition = if edges.is_empty() {
            Expr::true_lit()
        } else {
            Expr::canonical_conjunction(
                edges
                    .iter()
                    .map(|e| {
                        let left = scans[e.left_table_id.as_str()].1;
                        let right = scans[e.right_table_id.as_str()].1;
                        Expr::equi(&left.name, &e.left_column, &right.name, &e.right_column)
                    })
                    .collect(),
            )
        };

        let (group, _) = memo.add_expr(
            Operator::Logical(LogicalOp::Join {
                join_type,
                condition,
            }),
            vec![root, scans[next].0],
        );
        root = group;
        joined.push(next);
    }

    Ok(BuiltGraph {
        memo,
        root,
        catalog,
    })
}

/// Join type for adding `next` on the right of the tree through `edges`.
fn join_type_for(edges: &[&JoinEdge], next: &str) -> Result<JoinType, ApiError> {
    let mut chosen: Option<JoinType> = None;
    for edge in edges {
        let declared = parse_join_type(&edge.join_type)?;
        let join_type = if edge.left_table_id == next {
            mirror(declared).ok_or_else(|| {
                ApiError::bad_request(format!(
                    "{} edge must list {} second",
                    edge.join_type.to_uppercase(),
                    next
                ))
            })?
        } else {
            declared
        };
        match chosen {
            None => chosen = Some(join_type),
            Some(existing) if existing == join_type => {}
            Some(existing) => {
                return Err(ApiError::bad_request(format!(
                    "conflicting join types {existing:?} and {join_type:?} for table {next}"
                )))
            }
        }
    }
    Ok(chosen.unwrap_or(JoinType::Cross))
}

/// The same join with its inputs swapped, if it can be expressed.
fn mirror(join_type: JoinType) -> Option<JoinType> {
    match join_type {
        JoinType::Left => Some(JoinType::Right),
        JoinType::Right => Some(JoinType::Left),
        JoinType::Semi | JoinType::Anti => None,
        other => Some(other),
    }
}

fn parse_join_type(s: &str) -> Result<JoinType, ApiError> {
    match s.to_uppercase().as_str() {
        "INNER" => Ok(JoinType::Inner),
        "LEFT" => Ok(JoinType::Left),
        "RIGHT" => Ok(JoinType::Right),
        "FULL" => Ok(JoinType::Full),
        "SEMI" => Ok(JoinType::Semi),
        "ANTI" => Ok(JoinType::Anti),
        "CROSS" => Ok(JoinType::Cross),
        other => Err(ApiError::bad_request(format!("unknown join type {other}"))),
    }
}
