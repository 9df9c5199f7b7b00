//! `sql_block`: exactly one schema-validated statement against one table.

use pantry_agent_sdk::{async_trait, Action, BlockKind, BlockResult, SqlBlockArgs, Task};
use pantry_agent_sdk::log_validation_rejected;
use serde_json::json;

use crate::blocks::{parse_args, propose_payload, BlockContext, BlockHandler};
use crate::store::{rewrite_name_comparison, WriteStatement};

pub struct SqlBlockHandler;

#[async_trait]
impl BlockHandler for SqlBlockHandler {
    fn kind(&self) -> BlockKind {
        BlockKind::Sql
    }

    async fn execute(&self, task: &Task, ctx: &BlockContext<'_>) -> BlockResult {
        let payload = match propose_payload(task, ctx).await {
            Ok(payload) => payload,
            Err(failure) => return failure,
        };
        let mut args: SqlBlockArgs = match parse_args(payload, BlockKind::Sql) {
            Ok(args) => args,
            Err(failure) => return failure,
        };

        // Fields inferred by an earlier parse block flow into writes, so the
        // reasoner does not have to restate them.
        if matches!(args.action_type, Action::Insert | Action::Update) {
            if let Some(item) = ctx.memory.latest_parsed_item() {
                for (column, value) in item {
                    if !args.columns.contains(column) {
                        args.columns.push(column.clone());
                        args.values.push(value.clone());
                    }
                }
            }
        }

        // The guard runs before anything reaches the store; its rejections
        // are final for these exact arguments.
        if let Err(rejection) = ctx.guard.validate(
            &args.table_name,
            &args.columns,
            args.action_type,
            args.where_clause.as_deref(),
        ) {
            log_validation_rejected!(ctx.session_id, &args.table_name, rejection);
            return BlockResult::failure(rejection.to_string(), false);
        }

        if matches!(args.action_type, Action::Insert | Action::Update)
            && args.columns.len() != args.values.len()
        {
            return BlockResult::failure(
                format!(
                    "column/value mismatch: {} columns, {} values",
                    args.columns.len(),
                    args.values.len()
                ),
                true,
            );
        }

        let where_clause = args.where_clause.as_deref().map(rewrite_name_comparison);

        match args.action_type {
            Action::Select => {
                match ctx
                    .store
                    .select(&args.table_name, &args.columns, where_clause.as_deref())
                {
                    Ok(rows) => BlockResult::success(json!({
                        "rows": rows,
                        "row_count": rows.len(),
                        "explanation": args.explanation,
                    })),
                    Err(e) => BlockResult::failure(format!("select failed: {}", e), true),
                }
            }
            action => {
                let statement = WriteStatement {
                    action,
                    table: args.table_name.clone(),
                    columns: args.columns.clone(),
                    values: args.values.clone(),
                    where_clause,
                };
                match ctx.store.execute_write(&statement) {
                    Ok(affected) => BlockResult::success(json!({
                        "rows_affected": affected,
                        "explanation": args.explanation,
                    })),
                    Err(e) => {
                        BlockResult::failure(format!("{} failed: {}", action.as_str(), e), true)
                    }
                }
            }
        }
    }
}
