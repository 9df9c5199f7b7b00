//! SQLite-backed store for the fridge/shopping/invoice domain.
//!
//! The store executes instructions that have already passed the schema
//! guard. Every write runs inside its own transaction scope, acquired per
//! statement or per batch and released on every exit path; a batch commits
//! all rows or none of them. The store also owns the engine-internal
//! conversation history and document tables, which are deliberately outside
//! the guard's allow-lists.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use anyhow::{anyhow, Result};
use chrono::Local;
use pantry_agent_sdk::Action;
use regex::Regex;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use serde_json::{Map, Value};

/// One fully validated statement, ready to execute.
#[derive(Debug, Clone)]
pub struct WriteStatement {
    pub action: Action,
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
    pub where_clause: Option<String>,
}

/// Batch execution failure, pointing at the offending row.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub row_index: usize,
    pub message: String,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}: {}", self.row_index, self.message)
    }
}

/// A persisted conversational turn.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub id: i64,
    pub user_message: String,
    pub response: String,
    pub created_at: String,
}

/// A keyword match from the ingested-document corpus.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentMatch {
    pub doc_id: i64,
    pub filename: String,
    pub description: String,
    pub snippet: String,
}

/// SQLite store shared across sessions. Each statement or batch takes the
/// connection lock for exactly the duration of its transaction.
pub struct Store {
    conn: Mutex<Connection>,
    calls: AtomicUsize,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode for better concurrent access
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Mutex::new(conn),
            calls: AtomicUsize::new(0),
        })
    }

    /// In-memory store for tests and demos.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
            calls: AtomicUsize::new(0),
        })
    }

    /// Create domain and engine tables if absent.
    pub fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS fridge_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                quantity REAL,
                unit TEXT,
                expiration_date TEXT,
                category TEXT
            );

            CREATE TABLE IF NOT EXISTS shopping_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                desired_quantity REAL,
                unit TEXT,
                purchased INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS invoices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT,
                total_amount REAL,
                store_name TEXT
            );

            CREATE TABLE IF NOT EXISTS invoice_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_id INTEGER REFERENCES invoices(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                quantity REAL,
                price_per_unit REAL
            );

            CREATE TABLE IF NOT EXISTS chat_exchanges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_message TEXT,
                response TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_exchanges_created_at
            ON chat_exchanges(created_at DESC);

            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                file_content BLOB,
                text_content TEXT,
                description TEXT,
                uploaded_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Insert the demo rows used by tests and the CLI `--seed` flag.
    pub fn seed_demo_data(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            INSERT INTO fridge_items (name, quantity, unit, expiration_date, category) VALUES
                ('Milk', 1, 'liters', '2025-02-01', 'dairy'),
                ('Eggs', 12, 'unit', '2025-01-20', 'dairy'),
                ('Spinach', 1, 'bag', '2025-01-18', 'vegetables');

            INSERT INTO shopping_items (name, desired_quantity, unit, purchased) VALUES
                ('Cheese', 1, 'pack', 0),
                ('Tomatoes', 5, 'unit', 0),
                ('Chicken Breast', 2, 'kg', 0);

            INSERT INTO invoices (date, total_amount, store_name) VALUES
                ('2025-01-10', 23.50, 'SuperMart'),
                ('2025-01-15', 45.00, 'GroceryTown');

            INSERT INTO invoice_items (invoice_id, name, quantity, price_per_unit) VALUES
                (1, 'Milk', 2, 1.20),
                (1, 'Butter', 1, 2.50),
                (2, 'Chicken Breast', 2, 5.00),
                (2, 'Eggs', 12, 0.15);
            "#,
        )?;
        Ok(())
    }

    /// Number of statements the store has been asked to execute. Guard
    /// rejections happen before the store is reached, so this stays flat.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Table name to column list, introspected from the live schema.
    pub fn table_columns(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let conn = self.lock();
        let mut tables = Vec::new();
        {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for name in rows {
                let name = name?;
                if !name.starts_with("sqlite_") {
                    tables.push(name);
                }
            }
        }

        let mut out = BTreeMap::new();
        for table in tables {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
            let columns = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.insert(table, columns);
        }
        Ok(out)
    }

    /// Run one SELECT and return the rows as JSON objects.
    pub fn select(
        &self,
        table: &str,
        columns: &[String],
        where_clause: Option<&str>,
    ) -> Result<Vec<Map<String, Value>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let column_list = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", column_list, table);
        if let Some(clause) = where_clause {
            sql.push(' ');
            sql.push_str(clause.trim());
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Map::new();
            for (i, name) in names.iter().enumerate() {
                object.insert(name.clone(), column_to_json(row.get_ref(i)?));
            }
            out.push(object);
        }
        Ok(out)
    }

    /// Execute one write statement in its own transaction. Returns the
    /// affected row count; on any error the transaction rolls back.
    pub fn execute_write(&self, statement: &WriteStatement) -> Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let affected = run_statement(&tx, statement)?;
        tx.commit()?;
        Ok(affected)
    }

    /// Execute a batch of write statements as a single transaction. If any
    /// row fails, nothing is committed and the failure names the row.
    pub fn execute_batch(&self, statements: &[WriteStatement]) -> Result<usize, BatchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let conn = self.lock();
        let tx = conn.unchecked_transaction().map_err(|e| BatchFailure {
            row_index: 0,
            message: e.to_string(),
        })?;

        let mut total = 0;
        for (index, statement) in statements.iter().enumerate() {
            match run_statement(&tx, statement) {
                Ok(affected) => total += affected,
                Err(e) => {
                    // Dropping the transaction rolls it back.
                    return Err(BatchFailure {
                        row_index: index,
                        message: e.to_string(),
                    });
                }
            }
        }

        tx.commit().map_err(|e| BatchFailure {
            row_index: statements.len().saturating_sub(1),
            message: e.to_string(),
        })?;
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Conversation history
    // ------------------------------------------------------------------

    /// Append one completed turn to the persisted conversation log.
    pub fn append_exchange(&self, user_message: &str, response: &str) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO chat_exchanges (user_message, response, created_at) VALUES (?1, ?2, ?3)",
            params![user_message, response, Local::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent exchanges in chronological order (oldest first).
    pub fn recent_exchanges(&self, limit: usize) -> Result<Vec<Exchange>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_message, response, created_at
             FROM chat_exchanges
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let mut exchanges = stmt
            .query_map([limit], |row| {
                Ok(Exchange {
                    id: row.get(0)?,
                    user_message: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    response: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        exchanges.reverse();
        Ok(exchanges)
    }

    // ------------------------------------------------------------------
    // Document ingestion
    // ------------------------------------------------------------------

    /// Store an ingested document (raw bytes plus extracted text).
    pub fn insert_document(
        &self,
        filename: &str,
        file_content: &[u8],
        text_content: &str,
        description: &str,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO documents (filename, file_content, text_content, description, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                filename,
                file_content,
                text_content,
                description,
                Local::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Case-insensitive keyword search over document text and descriptions,
    /// ranked by hit count.
    pub fn search_documents(&self, query: &str, top_k: usize) -> Result<Vec<DocumentMatch>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, filename, text_content, description FROM documents",
        )?;
        let docs = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut scored: Vec<(usize, DocumentMatch)> = docs
            .into_iter()
            .filter_map(|(doc_id, filename, text, description)| {
                let haystack = format!("{}\n{}", description, text).to_lowercase();
                let hits = haystack.matches(&needle).count();
                if hits == 0 {
                    return None;
                }
                Some((
                    hits,
                    DocumentMatch {
                        doc_id,
                        filename,
                        description,
                        snippet: snippet_around(&text, &needle),
                    },
                ))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(top_k).map(|(_, m)| m).collect())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // Mutex poisoning only happens if a holder panicked; propagating the
        // inner value keeps the store usable.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Execute one statement inside an open transaction.
fn run_statement(tx: &rusqlite::Transaction<'_>, statement: &WriteStatement) -> Result<usize> {
    let sql = match statement.action {
        Action::Insert => {
            if statement.columns.len() != statement.values.len() {
                return Err(anyhow!(
                    "column/value mismatch: {} columns, {} values",
                    statement.columns.len(),
                    statement.values.len()
                ));
            }
            let placeholders: Vec<String> = (1..=statement.values.len())
                .map(|i| format!("?{}", i))
                .collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                statement.table,
                statement.columns.join(", "),
                placeholders.join(", ")
            )
        }
        Action::Update => {
            if statement.columns.len() != statement.values.len() {
                return Err(anyhow!(
                    "column/value mismatch: {} columns, {} values",
                    statement.columns.len(),
                    statement.values.len()
                ));
            }
            let clause = statement
                .where_clause
                .as_deref()
                .ok_or_else(|| anyhow!("UPDATE without where clause"))?;
            let assignments: Vec<String> = statement
                .columns
                .iter()
                .enumerate()
                .map(|(i, col)| format!("{} = ?{}", col, i + 1))
                .collect();
            format!(
                "UPDATE {} SET {} {}",
                statement.table,
                assignments.join(", "),
                clause.trim()
            )
        }
        Action::Delete => {
            let clause = statement
                .where_clause
                .as_deref()
                .ok_or_else(|| anyhow!("DELETE without where clause"))?;
            format!("DELETE FROM {} {}", statement.table, clause.trim())
        }
        Action::Select => return Err(anyhow!("SELECT is not a write statement")),
    };

    let bindings: Vec<rusqlite::types::Value> =
        statement.values.iter().map(json_to_sql).collect();
    let affected = tx.execute(&sql, params_from_iter(bindings))?;
    Ok(affected)
}

/// Rewrite `WHERE name = '...'` comparisons to be case-insensitive, so the
/// reasoner does not have to match stored casing exactly.
pub fn rewrite_name_comparison(where_clause: &str) -> String {
    static NAME_EQ: OnceLock<Regex> = OnceLock::new();
    let pattern = NAME_EQ.get_or_init(|| {
        Regex::new(r#"(?i)WHERE\s+name\s*=\s*(["'])(.*?)(["'])"#).expect("valid regex")
    });
    pattern
        .replace(where_clause, "WHERE LOWER(name) = LOWER($1$2$3)")
        .into_owned()
}

fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => {
            // Reasoners sometimes spell SQL NULL as a literal string
            if s.eq_ignore_ascii_case("null") {
                rusqlite::types::Value::Null
            } else {
                rusqlite::types::Value::Text(s.clone())
            }
        }
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

fn column_to_json(value: rusqlite::types::ValueRef<'_>) -> Value {
    match value {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::from(i),
        rusqlite::types::ValueRef::Real(f) => {
            serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        rusqlite::types::ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        rusqlite::types::ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

fn snippet_around(text: &str, needle: &str) -> String {
    let lower = text.to_lowercase();
    match lower.find(needle) {
        Some(byte_pos) => {
            let char_pos = lower[..byte_pos].chars().count();
            let start = char_pos.saturating_sub(40);
            let snippet: String = text
                .chars()
                .skip(start)
                .take(needle.chars().count() + 120)
                .collect();
            snippet.trim().to_string()
        }
        None => text.chars().take(80).collect(),
    }
}
