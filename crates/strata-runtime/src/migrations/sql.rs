//! Plain SQL migrations and the directory loader.

use std::path::Path;

use strata_core::error::{Result, StrataError};
use strata_core::migration::{BoxFuture, Migration, SchemaTransaction};
use tracing::debug;

const UP_MARKER: &str = "-- @up";
const DOWN_MARKER: &str = "-- @down";

/// A migration made of SQL text.
///
/// Without down SQL the migration is irreversible and `backward` fails.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    id: String,
    up: String,
    down: Option<String>,
}

impl SqlMigration {
    pub fn new(id: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            up: up.into(),
            down: None,
        }
    }

    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }

    /// Parse a migration file with optional `-- @up` / `-- @down` sections.
    ///
    /// Text before any marker belongs to the up section. A down section that
    /// holds no statements leaves the migration irreversible.
    pub fn parse(id: impl Into<String>, content: &str) -> Self {
        let mut up = String::new();
        let mut down = String::new();
        let mut in_down = false;

        for line in content.lines() {
            let marker = line.trim().to_ascii_lowercase();
            if marker == UP_MARKER {
                in_down = false;
                continue;
            }
            if marker == DOWN_MARKER {
                in_down = true;
                continue;
            }

            let section = if in_down { &mut down } else { &mut up };
            section.push_str(line);
            section.push('\n');
        }

        let mut migration = Self::new(id, up.trim());
        if !is_blank(&down) {
            migration.down = Some(down.trim().to_string());
        }
        migration
    }

    pub fn up(&self) -> &str {
        &self.up
    }

    pub fn down(&self) -> Option<&str> {
        self.down.as_deref()
    }
}

impl Migration for SqlMigration {
    fn id(&self) -> &str {
        &self.id
    }

    fn forward<'a>(&'a self, tx: &'a mut dyn SchemaTransaction) -> BoxFuture<'a, Result<()>> {
        Box::pin(execute_script(tx, &self.up))
    }

    fn backward<'a>(&'a self, tx: &'a mut dyn SchemaTransaction) -> BoxFuture<'a, Result<()>> {
        let Some(down) = &self.down else {
            return Box::pin(async move { Err(StrataError::Irreversible(self.id.clone())) });
        };
        Box::pin(execute_script(tx, down))
    }

    fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

/// Run each statement of `sql` through the transaction in order.
async fn execute_script(tx: &mut dyn SchemaTransaction, sql: &str) -> Result<()> {
    for statement in split_sql_statements(sql) {
        tx.execute(&statement).await?;
    }
    Ok(())
}

/// Whether `sql` contains only whitespace and `--` comments.
fn is_blank(sql: &str) -> bool {
    sql.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with("--")
    })
}

/// Split SQL into individual statements.
///
/// A `;` ends a statement only outside quoted text: `'...'` literals (with
/// `''` escapes), `"..."` identifiers and `$$`/`$tag$` bodies, so PL/pgSQL
/// functions stay whole. `--` comments outside quotes are dropped, and
/// statements left empty are skipped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                // keep the newline so the surrounding tokens stay apart
                for n in chars.by_ref() {
                    if n == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '\'' | '"' => {
                // a doubled quote closes and reopens, which keeps `''` intact
                current.push(c);
                for n in chars.by_ref() {
                    current.push(n);
                    if n == c {
                        break;
                    }
                }
            }
            '$' => {
                // $$ or $tag$; anything else ($1 placeholders) is left alone
                let mut tag = String::from("$");
                while let Some(n) = chars.next_if(|&n| n == '$' || n.is_alphanumeric() || n == '_')
                {
                    tag.push(n);
                    if n == '$' {
                        break;
                    }
                }
                current.push_str(&tag);

                if tag.len() >= 2 && tag.ends_with('$') {
                    let mut body = String::new();
                    for n in chars.by_ref() {
                        body.push(n);
                        if body.ends_with(tag.as_str()) {
                            break;
                        }
                    }
                    current.push_str(&body);
                }
            }
            ';' => push_statement(&mut statements, &mut current),
            c => current.push(c),
        }
    }

    // The last statement may not end with ;
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let stmt = current.trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }
    current.clear();
}

/// Load SQL migrations from a directory.
///
/// Files are named like `005_add_tags.sql`; the id is the file stem. They are
/// returned sorted by name so that numbered files line up, and the caller
/// registers them in that order.
pub fn load_migrations_from_dir(dir: &Path) -> Result<Vec<SqlMigration>> {
    if !dir.exists() {
        debug!("Migrations directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().is_some_and(|e| e == "sql") {
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    StrataError::Config(format!("Invalid migration filename: {:?}", path))
                })?
                .to_string();

            let content = std::fs::read_to_string(&path)?;
            migrations.push(SqlMigration::parse(id, &content));
        }
    }

    migrations.sort_by(|a, b| a.id.cmp(&b.id));

    debug!("Loaded {} migrations from {:?}", migrations.len(), dir);
    Ok(migrations)
}
