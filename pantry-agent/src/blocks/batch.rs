//! Batch blocks: N-row mutations applied as a single transaction.
//!
//! Every row is validated by the schema guard before any row executes. If
//! validation or execution fails for any row, no row is committed and the
//! failure names the offending row index.

use pantry_agent_sdk::{async_trait, Action, BatchBlockArgs, BlockKind, BlockResult, Task};
use pantry_agent_sdk::log_validation_rejected;
use serde_json::json;

use crate::blocks::{parse_args, propose_payload, BlockContext, BlockHandler};
use crate::store::{rewrite_name_comparison, WriteStatement};

pub struct BatchBlockHandler {
    kind: BlockKind,
    action: Action,
}

impl BatchBlockHandler {
    pub fn insert() -> Self {
        Self {
            kind: BlockKind::BatchInsert,
            action: Action::Insert,
        }
    }

    pub fn update() -> Self {
        Self {
            kind: BlockKind::BatchUpdate,
            action: Action::Update,
        }
    }

    pub fn delete() -> Self {
        Self {
            kind: BlockKind::BatchDelete,
            action: Action::Delete,
        }
    }
}

#[async_trait]
impl BlockHandler for BatchBlockHandler {
    fn kind(&self) -> BlockKind {
        self.kind
    }

    async fn execute(&self, task: &Task, ctx: &BlockContext<'_>) -> BlockResult {
        let payload = match propose_payload(task, ctx).await {
            Ok(payload) => payload,
            Err(failure) => return failure,
        };
        let args: BatchBlockArgs = match parse_args(payload, self.kind) {
            Ok(args) => args,
            Err(failure) => return failure,
        };

        if args.rows.is_empty() {
            return BlockResult::failure("batch contains no rows", true);
        }

        // Validate the whole batch before touching the store at all.
        for (index, row) in args.rows.iter().enumerate() {
            if self.action.requires_where_clause() && row.where_clause.is_none() {
                let reason = format!(
                    "row {}: {} requires a where clause",
                    index,
                    self.action.as_str()
                );
                log_validation_rejected!(ctx.session_id, &args.table_name, reason);
                return BlockResult::failure(reason, false);
            }
            if let Err(rejection) = ctx.guard.validate(
                &args.table_name,
                &row.columns,
                self.action,
                row.where_clause.as_deref(),
            ) {
                let reason = format!("row {}: {}", index, rejection);
                log_validation_rejected!(ctx.session_id, &args.table_name, reason);
                return BlockResult::failure(reason, false);
            }
            match self.action {
                Action::Insert | Action::Update => {
                    if row.columns.is_empty() {
                        return BlockResult::failure(
                            format!("row {}: no columns given", index),
                            true,
                        );
                    }
                    if row.columns.len() != row.values.len() {
                        return BlockResult::failure(
                            format!(
                                "row {}: column/value mismatch: {} columns, {} values",
                                index,
                                row.columns.len(),
                                row.values.len()
                            ),
                            true,
                        );
                    }
                }
                _ => {}
            }
        }

        let statements: Vec<WriteStatement> = args
            .rows
            .iter()
            .map(|row| WriteStatement {
                action: self.action,
                table: args.table_name.clone(),
                columns: row.columns.clone(),
                values: row.values.clone(),
                where_clause: row.where_clause.as_deref().map(rewrite_name_comparison),
            })
            .collect();

        match ctx.store.execute_batch(&statements) {
            Ok(affected) => BlockResult::success(json!({
                "rows_affected": affected,
                "batch_size": statements.len(),
                "explanation": args.explanation,
            })),
            Err(failure) => BlockResult::failure(
                format!("{} batch failed at {}", self.action.as_str(), failure),
                true,
            ),
        }
    }
}
