//! Migrations whose steps are SQL scripts.

use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;
use std::sync::Arc;

use sqlx::PgPool;
use tracing::debug;

use strata_core::config::StrataConfig;
use strata_core::error::{Result, StrataError};
use strata_core::migration::{MigrationDefinition, StepFuture};

/// A migration built from SQL text.
///
/// Every step runs in its own transaction, so a failing statement leaves no
/// partial changes from that step behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    pub module: String,
    pub version: i32,
    pub name: String,
    pub description: String,
    pub up: String,
    pub down: Option<String>,
    pub init_data: Option<String>,
}

impl SqlMigration {
    pub fn new(
        module: impl Into<String>,
        version: i32,
        name: impl Into<String>,
        up: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            version,
            name: name.into(),
            description: String::new(),
            up: up.into(),
            down: None,
            init_data: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn down(mut self, sql: impl Into<String>) -> Self {
        self.down = Some(sql.into());
        self
    }

    pub fn init_data(mut self, sql: impl Into<String>) -> Self {
        self.init_data = Some(sql.into());
        self
    }

    /// Bind the scripts to `pool`.
    pub fn into_definition(self, pool: PgPool) -> MigrationDefinition {
        let mut definition = MigrationDefinition::new(self.module, self.version, self.name)
            .description(self.description)
            .up(script(pool.clone(), self.up));

        if let Some(down) = self.down {
            definition = definition.down(script(pool.clone(), down));
        }
        if let Some(init_data) = self.init_data {
            definition = definition.init_data(script(pool, init_data));
        }

        definition
    }
}

fn script(pool: PgPool, sql: String) -> impl Fn() -> StepFuture + Send + Sync + 'static {
    let sql: Arc<str> = sql.into();
    move || -> StepFuture {
        let pool = pool.clone();
        let sql = sql.clone();
        Box::pin(async move { execute_script(&pool, &sql).await })
    }
}

/// Run every statement of `sql` inside one transaction.
pub async fn execute_script(pool: &PgPool, sql: &str) -> Result<()> {
    let statements = split_statements(sql);
    let mut tx = pool.begin().await?;

    for statement in &statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    debug!(statements = statements.len(), "Executed SQL script");
    Ok(())
}

/// Load the SQL migrations declared in `config`, reading script files
/// relative to the config file.
pub fn load_sql_migrations(config: &StrataConfig) -> Result<Vec<SqlMigration>> {
    config
        .migrations
        .iter()
        .map(|source| -> Result<SqlMigration> {
            let read = |path: &Path| read_script(&config.resolve_path(path));

            let up = read(source.up.as_path())?;
            let mut migration = SqlMigration::new(&source.module, source.version, &source.name, up)
                .description(&source.description);
            if let Some(down) = &source.down {
                migration = migration.down(read(down.as_path())?);
            }
            if let Some(init_data) = &source.init_data {
                migration = migration.init_data(read(init_data.as_path())?);
            }
            Ok(migration)
        })
        .collect()
}

/// Load the declared SQL migrations and bind them to `pool`.
pub fn definitions_from_config(
    config: &StrataConfig,
    pool: &PgPool,
) -> Result<Vec<MigrationDefinition>> {
    Ok(load_sql_migrations(config)?
        .into_iter()
        .map(|m| m.into_definition(pool.clone()))
        .collect())
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        StrataError::Config(format!(
            "Failed to read migration script {}: {}",
            path.display(),
            e
        ))
    })
}

/// Split a script into individual statements.
///
/// Semicolons inside quoted strings (including `E'...'` escapes),
/// dollar-quoted bodies (`$$` or `$tag$`) and comments do not terminate a
/// statement. Fragments containing only
/// comments or whitespace are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                current.push(c);
                while let Some(next) = chars.next_if(|&n| n != '\n') {
                    current.push(next);
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                current.push(c);
                consume_until(&mut chars, &mut current, "*/");
            }
            '\'' if escape_prefixed(&current) => {
                has_code = true;
                current.push(c);
                consume_escape_string(&mut chars, &mut current);
            }
            '\'' | '"' => {
                has_code = true;
                current.push(c);
                consume_until(&mut chars, &mut current, if c == '\'' { "'" } else { "\"" });
            }
            '$' => {
                has_code = true;
                current.push(c);
                if let Some(tag) = dollar_tag(&mut chars) {
                    current.push_str(&tag[1..]);
                    consume_until(&mut chars, &mut current, &tag);
                }
            }
            ';' => {
                push_statement(&mut statements, &mut current, has_code);
                has_code = false;
            }
            _ => {
                has_code |= !c.is_whitespace();
                current.push(c);
            }
        }
    }

    push_statement(&mut statements, &mut current, has_code);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String, has_code: bool) {
    let statement = current.trim();
    if has_code && !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

/// If the input continues a dollar-quote opener (`$` already consumed),
/// consume the rest of it and return the full tag, e.g. `$body$`.
fn dollar_tag(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut lookahead = chars.clone();
    let mut tag = String::from("$");

    loop {
        match lookahead.next()? {
            '$' => {
                tag.push('$');
                break;
            }
            c if c.is_alphanumeric() || c == '_' => tag.push(c),
            _ => return None,
        }
    }

    // `$1` is a positional parameter, not a tag.
    if tag[1..].starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    for _ in 1..tag.chars().count() {
        chars.next();
    }
    Some(tag)
}

/// Whether a quote following `current` opens an `E'...'` literal.
fn escape_prefixed(current: &str) -> bool {
    let mut rev = current.chars().rev();
    matches!(rev.next(), Some('E' | 'e'))
        && !rev.next().is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// Copy the rest of an `E'...'` literal, where `\'` does not close it.
fn consume_escape_string(chars: &mut Peekable<Chars<'_>>, current: &mut String) {
    while let Some(c) = chars.next() {
        current.push(c);
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '\'' if chars.peek() == Some(&'\'') => {
                if let Some(quote) = chars.next() {
                    current.push(quote);
                }
            }
            '\'' => return,
            _ => {}
        }
    }
}

/// Copy characters into `current` up to and including `terminator`.
fn consume_until(chars: &mut Peekable<Chars<'_>>, current: &mut String, terminator: &str) {
    let mut body = String::new();
    for c in chars.by_ref() {
        current.push(c);
        body.push(c);
        if body.ends_with(terminator) {
            return;
        }
    }
}
