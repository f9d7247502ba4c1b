use crate::error::CompileError;
use crate::statement::{ColumnDefinition, SqlStatement};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

static PLAIN_IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap()
});

/// Short names of database products a change set may target, whether or not
/// a dialect is registered for them.
const KNOWN_DATABASES: &[&str] = &[
    "asany", "cockroachdb", "db2", "db2z", "derby", "edb", "firebird", "h2", "hsqldb",
    "informix", "ingres", "mariadb", "mssql", "mysql", "oracle", "postgresql", "snowflake",
    "sqlite", "sybase",
];

const RESERVED_WORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "TABLE", "INDEX", "VIEW", "ORDER", "GROUP", "USER", "KEY",
    "PRIMARY", "DEFAULT", "CHECK", "COLUMN", "CREATE", "DROP", "ALTER", "TO", "AS", "ON",
];

/// Translates dialect-neutral statements into executable command text for one
/// kind of target system, and reports which capabilities that target has.
pub trait Dialect: Send + Sync {
    /// Short name the target identifies itself with (`sqlite`, `db2`, ...).
    fn name(&self) -> &str;

    /// Column DDL leaves the table unusable until a reorganization runs.
    fn requires_reorg_after_alter(&self) -> bool {
        false
    }

    fn supports(&self, statement: &SqlStatement) -> bool {
        !statement.is_maintenance() || self.requires_reorg_after_alter()
    }

    fn quote(&self, identifier: &str) -> String {
        if PLAIN_IDENTIFIER.is_match(identifier) && !RESERVED_WORDS.contains(&identifier.to_ascii_uppercase().as_str()) {
            identifier.to_string()
        } else {
            format!("\"{}\"", identifier.replace('"', "\"\""))
        }
    }

    fn qualify(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(name)),
            None => self.quote(name),
        }
    }

    fn render(&self, statement: &SqlStatement) -> Result<Vec<String>, CompileError> {
        render_standard(self, statement)
    }
}

fn unsupported<D: Dialect + ?Sized>(dialect: &D, statement: &SqlStatement) -> CompileError {
    CompileError::Unsupported {
        change: statement.kind_name().to_string(),
        dialect: dialect.name().to_string(),
    }
}

pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn column_sql<D: Dialect + ?Sized>(dialect: &D, column: &ColumnDefinition, inline_pk: bool) -> String {
    let mut sql = format!("{} {}", dialect.quote(&column.name), column.data_type);
    if let Some(default) = &column.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if inline_pk && column.primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    sql
}

/// ANSI rendering shared by every dialect unless it overrides a statement.
pub fn render_standard<D: Dialect + ?Sized>(
    dialect: &D,
    statement: &SqlStatement,
) -> Result<Vec<String>, CompileError> {
    let sql = match statement {
        SqlStatement::CreateTable { schema, table, columns } => {
            let mut parts: Vec<String> = columns.iter().map(|c| column_sql(dialect, c, false)).collect();
            let pk: Vec<String> = columns
                .iter()
                .filter(|c| c.primary_key)
                .map(|c| dialect.quote(&c.name))
                .collect();
            if !pk.is_empty() {
                parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
            }
            format!(
                "CREATE TABLE {} ({})",
                dialect.qualify(schema.as_deref(), table),
                parts.join(", ")
            )
        }
        SqlStatement::DropTable { schema, table, cascade } => {
            let mut sql = format!("DROP TABLE {}", dialect.qualify(schema.as_deref(), table));
            if *cascade {
                sql.push_str(" CASCADE");
            }
            sql
        }
        SqlStatement::RenameTable { schema, old_name, new_name } => format!(
            "ALTER TABLE {} RENAME TO {}",
            dialect.qualify(schema.as_deref(), old_name),
            dialect.quote(new_name)
        ),
        SqlStatement::AddColumn { schema, table, column } => format!(
            "ALTER TABLE {} ADD COLUMN {}",
            dialect.qualify(schema.as_deref(), table),
            column_sql(dialect, column, true)
        ),
        SqlStatement::DropColumn { schema, table, column } => format!(
            "ALTER TABLE {} DROP COLUMN {}",
            dialect.qualify(schema.as_deref(), table),
            dialect.quote(column)
        ),
        SqlStatement::RenameColumn { schema, table, old_name, new_name, .. } => format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            dialect.qualify(schema.as_deref(), table),
            dialect.quote(old_name),
            dialect.quote(new_name)
        ),
        SqlStatement::CreateIndex { schema, table, index, columns, unique } => {
            let columns: Vec<String> = columns.iter().map(|c| dialect.quote(c)).collect();
            format!(
                "CREATE {}INDEX {} ON {} ({})",
                if *unique { "UNIQUE " } else { "" },
                dialect.quote(index),
                dialect.qualify(schema.as_deref(), table),
                columns.join(", ")
            )
        }
        SqlStatement::DropIndex { schema, index, .. } => {
            format!("DROP INDEX {}", dialect.qualify(schema.as_deref(), index))
        }
        SqlStatement::CreateView { schema, view, select, replace } => format!(
            "CREATE {}VIEW {} AS {}",
            if *replace { "OR REPLACE " } else { "" },
            dialect.qualify(schema.as_deref(), view),
            select
        ),
        SqlStatement::DropView { schema, view } => {
            format!("DROP VIEW {}", dialect.qualify(schema.as_deref(), view))
        }
        SqlStatement::UpdateColumn { schema, table, column, value } => format!(
            "UPDATE {} SET {} = {}",
            dialect.qualify(schema.as_deref(), table),
            dialect.quote(column),
            string_literal(value)
        ),
        SqlStatement::ReorganizeTable { .. } => return Err(unsupported(dialect, statement)),
        SqlStatement::Raw { sql } => sql.clone(),
    };
    Ok(vec![sql])
}

/// Fallback used when a target names a dialect nobody registered.
#[derive(Debug, Default)]
pub struct AnsiDialect;

impl Dialect for AnsiDialect {
    fn name(&self) -> &str {
        "ansi"
    }
}

#[derive(Debug, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn render(&self, statement: &SqlStatement) -> Result<Vec<String>, CompileError> {
        match statement {
            // No cascading drops; foreign keys are the connection's business.
            SqlStatement::DropTable { schema, table, .. } => Ok(vec![format!(
                "DROP TABLE {}",
                self.qualify(schema.as_deref(), table)
            )]),
            // SQLite puts the schema on the index, not on the table.
            SqlStatement::CreateIndex { schema, table, index, columns, unique } => {
                let columns: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
                Ok(vec![format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if *unique { "UNIQUE " } else { "" },
                    self.qualify(schema.as_deref(), index),
                    self.quote(table),
                    columns.join(", ")
                )])
            }
            SqlStatement::CreateView { schema, view, select, replace } => {
                let name = self.qualify(schema.as_deref(), view);
                let mut sql = Vec::new();
                if *replace {
                    sql.push(format!("DROP VIEW IF EXISTS {}", name));
                }
                sql.push(format!("CREATE VIEW {} AS {}", name, select));
                Ok(sql)
            }
            _ => render_standard(self, statement),
        }
    }
}

#[derive(Debug, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgresql"
    }
}

/// DB2 leaves a table in reorg-pending state after column DDL.
#[derive(Debug, Default)]
pub struct Db2Dialect;

impl Dialect for Db2Dialect {
    fn name(&self) -> &str {
        "db2"
    }

    fn requires_reorg_after_alter(&self) -> bool {
        true
    }

    fn render(&self, statement: &SqlStatement) -> Result<Vec<String>, CompileError> {
        match statement {
            SqlStatement::ReorganizeTable { schema, table } => Ok(vec![format!(
                "CALL SYSPROC.ADMIN_CMD ('REORG TABLE {}')",
                self.qualify(schema.as_deref(), table)
            )]),
            SqlStatement::RenameTable { schema, old_name, new_name } => Ok(vec![format!(
                "RENAME TABLE {} TO {}",
                self.qualify(schema.as_deref(), old_name),
                self.quote(new_name)
            )]),
            SqlStatement::DropTable { cascade: true, .. } => Err(unsupported(self, statement)),
            _ => render_standard(self, statement),
        }
    }
}

/// Dialects keyed by target name, with a fallback for unknown targets.
#[derive(Clone)]
pub struct DialectRegistry {
    dialects: HashMap<String, Arc<dyn Dialect>>,
    fallback: Arc<dyn Dialect>,
}

impl DialectRegistry {
    pub fn new(fallback: Arc<dyn Dialect>) -> Self {
        Self {
            dialects: HashMap::new(),
            fallback,
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::new(Arc::new(AnsiDialect));
        registry.register(Arc::new(SqliteDialect));
        registry.register(Arc::new(PostgresDialect));
        registry.register(Arc::new(Db2Dialect));
        registry
    }

    pub fn register(&mut self, dialect: Arc<dyn Dialect>) {
        self.dialects.insert(dialect.name().to_ascii_lowercase(), dialect);
    }

    /// The registered dialect for `target`, or the fallback.
    pub fn resolve(&self, target: &str) -> Arc<dyn Dialect> {
        self.dialects
            .get(&target.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Registered dialects plus every database product a changelog may name.
    pub fn is_known(&self, target: &str) -> bool {
        let target = target.to_ascii_lowercase();
        self.dialects.contains_key(&target)
            || self.fallback.name() == target
            || KNOWN_DATABASES.contains(&target.as_str())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dialects.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
