//! `parse_block`: free text (plus prior rows from memory) to a structured
//! item. Pure transform: never issues a write.
//!
//! Ambiguity policy: a field that cannot be inferred is omitted, never
//! guessed with a placeholder, so downstream writes only set fields the
//! input actually justifies.

use std::sync::OnceLock;

use chrono::{Duration, NaiveDate};
use pantry_agent_sdk::{async_trait, BlockKind, BlockResult, ParseBlockArgs, Task};
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::blocks::{parse_args, propose_payload, BlockContext, BlockHandler};

/// Spelling variants folded to a canonical item name.
const NAME_SYNONYMS: &[(&str, &str)] = &[
    ("tomato", "tomatoes"),
    ("tomatoe", "tomatoes"),
    ("egg", "eggs"),
    ("potatoe", "potatoes"),
    ("potato", "potatoes"),
];

pub struct ParseBlockHandler;

#[async_trait]
impl BlockHandler for ParseBlockHandler {
    fn kind(&self) -> BlockKind {
        BlockKind::Parse
    }

    async fn execute(&self, task: &Task, ctx: &BlockContext<'_>) -> BlockResult {
        let payload = match propose_payload(task, ctx).await {
            Ok(payload) => payload,
            Err(failure) => return failure,
        };
        let mut args: ParseBlockArgs = match parse_args(payload, BlockKind::Parse) {
            Ok(args) => args,
            Err(failure) => return failure,
        };

        if args.raw_text.trim().is_empty() {
            args.raw_text = ctx.memory.original_request().to_string();
        }

        let parsed_item = refine_parsed_item(args.parsed_item, &args.raw_text, ctx.today);

        BlockResult::success(json!({
            "raw_text": args.raw_text,
            "parsed_item": parsed_item,
            "explanation": args.explanation,
        }))
    }
}

/// Normalize the reasoner's draft item and fill gaps inferable from the raw
/// text. Fields that stay unknown are dropped.
fn refine_parsed_item(
    mut item: Map<String, Value>,
    raw_text: &str,
    today: NaiveDate,
) -> Map<String, Value> {
    // Placeholders are worse than gaps
    item.retain(|_, value| !value.is_null() && value.as_str().map(|s| !s.trim().is_empty()).unwrap_or(true));

    if let Some(name) = item.get("name").and_then(Value::as_str) {
        item.insert(
            "name".to_string(),
            Value::String(normalize_item_name(name)),
        );
    }

    if !item.contains_key("quantity") || !item.contains_key("unit") {
        if let Some((quantity, unit)) = guess_quantity_and_unit(raw_text) {
            item.entry("quantity".to_string()).or_insert(json!(quantity));
            item.entry("unit".to_string()).or_insert(Value::String(unit));
        }
    }

    if !item.contains_key("expiration_date") {
        if let Some(date) = guess_expiration_date(raw_text, today) {
            item.insert("expiration_date".to_string(), Value::String(date));
        }
    }

    item
}

fn normalize_item_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    for (variant, canonical) in NAME_SYNONYMS {
        if lowered == *variant {
            return canonical.to_string();
        }
    }
    lowered
}

/// Look for "2 liters", "1 bag" and similar quantity/unit phrases.
fn guess_quantity_and_unit(text: &str) -> Option<(f64, String)> {
    static QUANTITY: OnceLock<Regex> = OnceLock::new();
    let pattern = QUANTITY.get_or_init(|| {
        Regex::new(
            r"(?i)(\d+(?:\.\d+)?)\s*(liter|liters|unit|units|bag|bags|piece|pieces|pack|packs|kg)\b",
        )
        .expect("valid regex")
    });
    let captures = pattern.captures(text)?;
    let quantity: f64 = captures.get(1)?.as_str().parse().ok()?;
    let unit = captures.get(2)?.as_str().to_lowercase();
    Some((quantity, unit))
}

/// Resolve "expires today/tomorrow/next week" to an absolute date.
fn guess_expiration_date(text: &str, today: NaiveDate) -> Option<String> {
    static EXPIRY: OnceLock<Regex> = OnceLock::new();
    let pattern = EXPIRY.get_or_init(|| {
        Regex::new(r"(?i)(expires|expiring|expiry)\s+(today|tomorrow|next week)\b")
            .expect("valid regex")
    });
    let captures = pattern.captures(text)?;
    let offset_days = match captures.get(2)?.as_str().to_lowercase().as_str() {
        "today" => 0,
        "tomorrow" => 1,
        "next week" => 7,
        _ => return None,
    };
    Some((today + Duration::days(offset_days)).format("%Y-%m-%d").to_string())
}
