use super::dialect::Dialect;
use crate::change::{ChangeKind, ChangeType, ColumnConfig};
use crate::error::CompileError;
use crate::statement::{ColumnDefinition, SqlStatement};
use std::collections::HashMap;

/// Turns one change into statements for one dialect.
pub type Generator = fn(&ChangeKind, &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError>;

/// Generators keyed by (change type, dialect name). A `None` dialect is the
/// wildcard entry used when no dialect-specific generator is registered.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<(ChangeType, Option<String>), Generator>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut registry = Self::new();

        // Wildcard generators, valid for every dialect
        registry.register(ChangeType::CreateTable, None, generate_create_table);
        registry.register(ChangeType::DropTable, None, generate_drop_table);
        registry.register(ChangeType::RenameTable, None, generate_rename_table);
        registry.register(ChangeType::AddColumn, None, generate_add_column);
        registry.register(ChangeType::DropColumn, None, generate_drop_column);
        registry.register(ChangeType::RenameColumn, None, generate_rename_column);
        registry.register(ChangeType::CreateIndex, None, generate_create_index);
        registry.register(ChangeType::DropIndex, None, generate_drop_index);
        registry.register(ChangeType::CreateView, None, generate_create_view);
        registry.register(ChangeType::DropView, None, generate_drop_view);
        registry.register(ChangeType::Sql, None, generate_sql);
        registry.register(ChangeType::TagDatabase, None, generate_tag_database);

        // Dialect-specific overrides
        registry.register(ChangeType::AddColumn, Some("sqlite"), generate_add_column_sqlite);

        registry
    }

    pub fn register(&mut self, change_type: ChangeType, dialect: Option<&str>, generator: Generator) {
        self.generators.insert(
            (change_type, dialect.map(|d| d.to_ascii_lowercase())),
            generator,
        );
    }

    /// Dialect-specific generator if one exists, else the wildcard one.
    pub fn lookup(&self, change_type: ChangeType, dialect: &str) -> Option<Generator> {
        self.generators
            .get(&(change_type, Some(dialect.to_ascii_lowercase())))
            .or_else(|| self.generators.get(&(change_type, None)))
            .copied()
    }
}

fn mismatch(kind: &ChangeKind, dialect: &dyn Dialect) -> CompileError {
    CompileError::Unsupported {
        change: kind.change_type().to_string(),
        dialect: dialect.name().to_string(),
    }
}

fn column_definition(column: &ColumnConfig) -> ColumnDefinition {
    ColumnDefinition {
        name: column.name.clone(),
        data_type: column.data_type.clone(),
        nullable: column.nullable && !column.primary_key,
        primary_key: column.primary_key,
        default_value: column.default_value.clone(),
    }
}

fn generate_create_table(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::CreateTable { schema_name, table_name, columns } = kind else {
        return Err(mismatch(kind, dialect));
    };
    Ok(vec![SqlStatement::CreateTable {
        schema: schema_name.clone(),
        table: table_name.clone(),
        columns: columns.iter().map(column_definition).collect(),
    }])
}

fn generate_drop_table(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::DropTable { schema_name, table_name, cascade_constraints } = kind else {
        return Err(mismatch(kind, dialect));
    };
    Ok(vec![SqlStatement::DropTable {
        schema: schema_name.clone(),
        table: table_name.clone(),
        cascade: *cascade_constraints,
    }])
}

fn generate_rename_table(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::RenameTable { schema_name, old_table_name, new_table_name } = kind else {
        return Err(mismatch(kind, dialect));
    };
    let mut statements = vec![SqlStatement::RenameTable {
        schema: schema_name.clone(),
        old_name: old_table_name.clone(),
        new_name: new_table_name.clone(),
    }];
    if dialect.requires_reorg_after_alter() {
        statements.push(SqlStatement::ReorganizeTable {
            schema: schema_name.clone(),
            table: new_table_name.clone(),
        });
    }
    Ok(statements)
}

/// One `AddColumn` per column, then table maintenance where the target needs
/// it, then the value fills (which cannot run before the maintenance).
fn generate_add_column(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::AddColumn { schema_name, table_name, columns } = kind else {
        return Err(mismatch(kind, dialect));
    };
    let mut statements: Vec<SqlStatement> = columns
        .iter()
        .map(|column| SqlStatement::AddColumn {
            schema: schema_name.clone(),
            table: table_name.clone(),
            column: column_definition(column),
        })
        .collect();

    if dialect.requires_reorg_after_alter() {
        statements.push(SqlStatement::ReorganizeTable {
            schema: schema_name.clone(),
            table: table_name.clone(),
        });
    }

    for column in columns {
        if let Some(value) = &column.value {
            statements.push(SqlStatement::UpdateColumn {
                schema: schema_name.clone(),
                table: table_name.clone(),
                column: column.name.clone(),
                value: value.clone(),
            });
        }
    }
    Ok(statements)
}

/// SQLite's `ALTER TABLE ADD COLUMN` cannot add a primary key, nor a NOT NULL
/// column without a default.
fn generate_add_column_sqlite(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::AddColumn { columns, .. } = kind else {
        return Err(mismatch(kind, dialect));
    };
    for column in columns {
        if column.primary_key || (!column.nullable && column.default_value.is_none()) {
            return Err(CompileError::Unsupported {
                change: format!("addColumn {} (primary key or NOT NULL without default)", column.name),
                dialect: dialect.name().to_string(),
            });
        }
    }
    generate_add_column(kind, dialect)
}

fn generate_drop_column(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::DropColumn { schema_name, table_name, column_name } = kind else {
        return Err(mismatch(kind, dialect));
    };
    let mut statements = vec![SqlStatement::DropColumn {
        schema: schema_name.clone(),
        table: table_name.clone(),
        column: column_name.clone(),
    }];
    if dialect.requires_reorg_after_alter() {
        statements.push(SqlStatement::ReorganizeTable {
            schema: schema_name.clone(),
            table: table_name.clone(),
        });
    }
    Ok(statements)
}

fn generate_rename_column(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::RenameColumn {
        schema_name,
        table_name,
        old_column_name,
        new_column_name,
        column_data_type,
    } = kind
    else {
        return Err(mismatch(kind, dialect));
    };
    Ok(vec![SqlStatement::RenameColumn {
        schema: schema_name.clone(),
        table: table_name.clone(),
        old_name: old_column_name.clone(),
        new_name: new_column_name.clone(),
        data_type: column_data_type.clone(),
    }])
}

fn generate_create_index(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::CreateIndex { schema_name, table_name, index_name, columns, unique } = kind else {
        return Err(mismatch(kind, dialect));
    };
    Ok(vec![SqlStatement::CreateIndex {
        schema: schema_name.clone(),
        table: table_name.clone(),
        index: index_name.clone(),
        columns: columns.clone(),
        unique: *unique,
    }])
}

fn generate_drop_index(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::DropIndex { schema_name, table_name, index_name } = kind else {
        return Err(mismatch(kind, dialect));
    };
    Ok(vec![SqlStatement::DropIndex {
        schema: schema_name.clone(),
        table: table_name.clone(),
        index: index_name.clone(),
    }])
}

fn generate_create_view(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::CreateView { schema_name, view_name, select_query, replace_if_exists } = kind else {
        return Err(mismatch(kind, dialect));
    };
    Ok(vec![SqlStatement::CreateView {
        schema: schema_name.clone(),
        view: view_name.clone(),
        select: select_query.clone(),
        replace: *replace_if_exists,
    }])
}

fn generate_drop_view(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::DropView { schema_name, view_name } = kind else {
        return Err(mismatch(kind, dialect));
    };
    Ok(vec![SqlStatement::DropView {
        schema: schema_name.clone(),
        view: view_name.clone(),
    }])
}

fn generate_sql(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    let ChangeKind::Sql { sql, split_statements } = kind else {
        return Err(mismatch(kind, dialect));
    };
    let statements = if *split_statements {
        split_sql(sql)
    } else {
        vec![sql.trim().to_string()]
    };
    Ok(statements
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(|sql| SqlStatement::Raw { sql })
        .collect())
}

/// Tagging touches only the ledger, which the engine handles.
fn generate_tag_database(kind: &ChangeKind, dialect: &dyn Dialect) -> Result<Vec<SqlStatement>, CompileError> {
    match kind {
        ChangeKind::TagDatabase { .. } => Ok(Vec::new()),
        _ => Err(mismatch(kind, dialect)),
    }
}

/// Split on `;` outside of quoted text and comments. Comments stay attached
/// to the statement that follows them; a doubled quote inside a string is an
/// escaped quote.
fn split_sql(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        if let Some(q) = quote {
            if ch == q {
                if chars.peek() == Some(&q) {
                    current.push(q);
                    chars.next();
                } else {
                    quote = None;
                }
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    current.push(next);
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                current.push('*');
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    current.push(next);
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
            }
            ';' => {
                current.pop();
                statements.push(current.trim().to_string());
                current.clear();
            }
            _ => {}
        }
    }
    statements.push(current.trim().to_string());
    statements
}
