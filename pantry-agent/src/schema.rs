//! Schema guard: static per-table allow-lists for columns and actions.
//!
//! Every mutation proposed by the planner or block reasoner passes through
//! [`SchemaGuard::validate`] before anything touches the store. The guard
//! treats planner output as adversarial input: unknown tables, unknown
//! columns, denied actions, and UPDATE/DELETE without a where clause are all
//! rejected up front. Validation is a pure function over immutable rules
//! loaded once at startup and shared read-only across sessions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{anyhow, Result};
use pantry_agent_sdk::Action;
use serde::Deserialize;

/// Allow-list for one table.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaRule {
    pub allowed_columns: BTreeSet<String>,
    pub allowed_actions: BTreeSet<Action>,
}

impl SchemaRule {
    pub fn new<C, A>(columns: C, actions: A) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        A: IntoIterator<Item = Action>,
    {
        Self {
            allowed_columns: columns.into_iter().map(Into::into).collect(),
            allowed_actions: actions.into_iter().collect(),
        }
    }
}

/// Why an instruction was refused. Non-retryable for the exact same
/// arguments; recorded in task memory as a non-recoverable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnknownTable {
        table: String,
    },
    UnknownColumn {
        table: String,
        column: String,
    },
    ActionDenied {
        table: String,
        action: Action,
    },
    MissingWhereClause {
        table: String,
        action: Action,
    },
    MalformedWhereClause {
        reason: String,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UnknownTable { table } => {
                write!(f, "table '{}' is not in the schema allow-list", table)
            }
            Rejection::UnknownColumn { table, column } => {
                write!(f, "column '{}' is not allowed on table '{}'", column, table)
            }
            Rejection::ActionDenied { table, action } => {
                write!(f, "{} is not permitted on table '{}'", action, table)
            }
            Rejection::MissingWhereClause { table, action } => {
                write!(
                    f,
                    "{} on '{}' requires a where clause targeting specific rows",
                    action, table
                )
            }
            Rejection::MalformedWhereClause { reason } => {
                write!(f, "malformed where clause: {}", reason)
            }
        }
    }
}

/// Immutable table/column/action allow-lists.
#[derive(Debug, Clone)]
pub struct SchemaGuard {
    rules: BTreeMap<String, SchemaRule>,
}

impl SchemaGuard {
    pub fn from_rules(rules: BTreeMap<String, SchemaRule>) -> Self {
        Self { rules }
    }

    /// Default allow-lists for the fridge/shopping/invoice domain. The
    /// engine-internal `chat_exchanges` and `documents` tables are absent on
    /// purpose: blocks can never touch them.
    pub fn default_rules() -> Self {
        let all = [Action::Select, Action::Insert, Action::Update, Action::Delete];
        let mut rules = BTreeMap::new();
        rules.insert(
            "fridge_items".to_string(),
            SchemaRule::new(
                ["id", "name", "quantity", "unit", "expiration_date", "category"],
                all,
            ),
        );
        rules.insert(
            "shopping_items".to_string(),
            SchemaRule::new(["id", "name", "desired_quantity", "unit", "purchased"], all),
        );
        rules.insert(
            "invoices".to_string(),
            SchemaRule::new(
                ["id", "date", "total_amount", "store_name"],
                [Action::Select, Action::Insert],
            ),
        );
        rules.insert(
            "invoice_items".to_string(),
            SchemaRule::new(
                ["id", "invoice_id", "name", "quantity", "price_per_unit"],
                [Action::Select, Action::Insert],
            ),
        );
        Self::from_rules(rules)
    }

    /// Load allow-lists from a YAML document of the shape:
    ///
    /// ```yaml
    /// fridge_items:
    ///   allowed_columns: [id, name, quantity]
    ///   allowed_actions: [SELECT, INSERT]
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: BTreeMap<String, SchemaRule> = serde_yaml::from_str(yaml)
            .map_err(|e| anyhow!("invalid schema rules file: {}", e))?;
        if rules.is_empty() {
            return Err(anyhow!("schema rules file defines no tables"));
        }
        Ok(Self::from_rules(rules))
    }

    /// Validate one proposed instruction. Pure: no side effects, and
    /// re-running it on the same input always yields the same verdict.
    pub fn validate(
        &self,
        table: &str,
        columns: &[String],
        action: Action,
        where_clause: Option<&str>,
    ) -> Result<(), Rejection> {
        let rule = self.rules.get(table).ok_or_else(|| Rejection::UnknownTable {
            table: table.to_string(),
        })?;

        if !rule.allowed_actions.contains(&action) {
            return Err(Rejection::ActionDenied {
                table: table.to_string(),
                action,
            });
        }

        for column in columns {
            if !rule.allowed_columns.contains(column) {
                return Err(Rejection::UnknownColumn {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }

        match where_clause {
            Some(raw) => validate_where_clause(raw)?,
            None => {
                if action.requires_where_clause() {
                    return Err(Rejection::MissingWhereClause {
                        table: table.to_string(),
                        action,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn rule(&self, table: &str) -> Option<&SchemaRule> {
        self.rules.get(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Human-readable schema summary handed to the planner prompt.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (table, rule) in &self.rules {
            let columns: Vec<&str> = rule.allowed_columns.iter().map(String::as_str).collect();
            let actions: Vec<&str> = rule.allowed_actions.iter().map(|a| a.as_str()).collect();
            out.push_str(&format!(
                "- {} => columns [{}], actions [{}]\n",
                table,
                columns.join(", "),
                actions.join(", ")
            ));
        }
        out
    }
}

/// A where clause arrives as raw text from the reasoner. It must start with
/// `WHERE`, carry a non-empty condition, and contain no statement separator.
fn validate_where_clause(raw: &str) -> Result<(), Rejection> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Rejection::MalformedWhereClause {
            reason: "empty".to_string(),
        });
    }
    let upper = trimmed.to_uppercase();
    if !upper.starts_with("WHERE") {
        return Err(Rejection::MalformedWhereClause {
            reason: format!("must start with WHERE, got '{}'", trimmed),
        });
    }
    if upper.trim_start_matches("WHERE").trim().is_empty() {
        return Err(Rejection::MalformedWhereClause {
            reason: "WHERE with no condition".to_string(),
        });
    }
    if trimmed.contains(';') {
        return Err(Rejection::MalformedWhereClause {
            reason: "statement separator not allowed".to_string(),
        });
    }
    Ok(())
}
