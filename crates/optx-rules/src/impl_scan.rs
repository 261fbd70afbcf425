//! # Scan Implementation Rule
//!
//! Maps a logical Scan to a physical SeqScan carrying the same column list and
//! pushed-down predicate. Lakehouse tables have no secondary indexes, so the
//! sequential scan is the only access path.

use optx_core::error::RuleError;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Rule, RuleResult, RuleType};

/// Logical scan as a sequential scan with the same table, columns and predicate.
pub struct ImplSeqScanRule;

impl Rule for ImplSeqScanRule {
    fn name(&self) -> &str {
        "ImplSeqScan"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::scan()
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        let Operator::Logical(LogicalOp::Scan {
            table,
            columns,
            predicate,
        }) = &expr.op
        else {
            return Ok(vec![]);
        };

        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::SeqScan {
                table: table.clone(),
                columns: columns.clone(),
                predicate: predicate.clone(),
            }),
            vec![],
        )])
    }
}
