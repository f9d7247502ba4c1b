use std::fmt;

/// Dialect-neutral column description carried by DDL statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub default_value: Option<String>,
}

/// A single compiled operation. Holds structured data only; turning it into
/// command text is the dialect's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlStatement {
    CreateTable {
        schema: Option<String>,
        table: String,
        columns: Vec<ColumnDefinition>,
    },
    DropTable {
        schema: Option<String>,
        table: String,
        cascade: bool,
    },
    RenameTable {
        schema: Option<String>,
        old_name: String,
        new_name: String,
    },
    AddColumn {
        schema: Option<String>,
        table: String,
        column: ColumnDefinition,
    },
    DropColumn {
        schema: Option<String>,
        table: String,
        column: String,
    },
    RenameColumn {
        schema: Option<String>,
        table: String,
        old_name: String,
        new_name: String,
        data_type: Option<String>,
    },
    CreateIndex {
        schema: Option<String>,
        table: String,
        index: String,
        columns: Vec<String>,
        unique: bool,
    },
    DropIndex {
        schema: Option<String>,
        table: String,
        index: String,
    },
    CreateView {
        schema: Option<String>,
        view: String,
        select: String,
        replace: bool,
    },
    DropView {
        schema: Option<String>,
        view: String,
    },
    /// Sets `column` to a literal value on every existing row.
    UpdateColumn {
        schema: Option<String>,
        table: String,
        column: String,
        value: String,
    },
    /// Post-DDL table maintenance required by some targets before the table
    /// can be used again.
    ReorganizeTable {
        schema: Option<String>,
        table: String,
    },
    Raw {
        sql: String,
    },
}

impl SqlStatement {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SqlStatement::CreateTable { .. } => "CreateTable",
            SqlStatement::DropTable { .. } => "DropTable",
            SqlStatement::RenameTable { .. } => "RenameTable",
            SqlStatement::AddColumn { .. } => "AddColumn",
            SqlStatement::DropColumn { .. } => "DropColumn",
            SqlStatement::RenameColumn { .. } => "RenameColumn",
            SqlStatement::CreateIndex { .. } => "CreateIndex",
            SqlStatement::DropIndex { .. } => "DropIndex",
            SqlStatement::CreateView { .. } => "CreateView",
            SqlStatement::DropView { .. } => "DropView",
            SqlStatement::UpdateColumn { .. } => "UpdateColumn",
            SqlStatement::ReorganizeTable { .. } => "ReorganizeTable",
            SqlStatement::Raw { .. } => "Raw",
        }
    }

    /// The column an `AddColumn` statement introduces.
    pub fn added_column(&self) -> Option<&ColumnDefinition> {
        match self {
            SqlStatement::AddColumn { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Table the statement operates on, when it has one.
    pub fn table(&self) -> Option<&str> {
        match self {
            SqlStatement::CreateTable { table, .. }
            | SqlStatement::DropTable { table, .. }
            | SqlStatement::AddColumn { table, .. }
            | SqlStatement::DropColumn { table, .. }
            | SqlStatement::RenameColumn { table, .. }
            | SqlStatement::CreateIndex { table, .. }
            | SqlStatement::DropIndex { table, .. }
            | SqlStatement::UpdateColumn { table, .. }
            | SqlStatement::ReorganizeTable { table, .. } => Some(table),
            SqlStatement::RenameTable { old_name, .. } => Some(old_name),
            SqlStatement::CreateView { .. } | SqlStatement::DropView { .. } | SqlStatement::Raw { .. } => None,
        }
    }

    pub fn is_maintenance(&self) -> bool {
        matches!(self, SqlStatement::ReorganizeTable { .. })
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlStatement::AddColumn { table, column, .. } => {
                write!(f, "AddColumn {}.{} {}", table, column.name, column.data_type)
            }
            SqlStatement::DropColumn { table, column, .. } => {
                write!(f, "DropColumn {}.{}", table, column)
            }
            SqlStatement::RenameColumn { table, old_name, new_name, .. } => {
                write!(f, "RenameColumn {}.{} -> {}", table, old_name, new_name)
            }
            SqlStatement::RenameTable { old_name, new_name, .. } => {
                write!(f, "RenameTable {} -> {}", old_name, new_name)
            }
            SqlStatement::CreateIndex { index, table, .. } | SqlStatement::DropIndex { index, table, .. } => {
                write!(f, "{} {} on {}", self.kind_name(), index, table)
            }
            SqlStatement::CreateView { view, .. } | SqlStatement::DropView { view, .. } => {
                write!(f, "{} {}", self.kind_name(), view)
            }
            SqlStatement::UpdateColumn { table, column, .. } => {
                write!(f, "UpdateColumn {}.{}", table, column)
            }
            SqlStatement::Raw { sql } => {
                let trimmed = sql.trim();
                if trimmed.chars().count() > 60 {
                    let head: String = trimmed.chars().take(60).collect();
                    write!(f, "Raw [{}...]", head)
                } else {
                    write!(f, "Raw [{}]", trimmed)
                }
            }
            SqlStatement::CreateTable { table, .. }
            | SqlStatement::DropTable { table, .. }
            | SqlStatement::ReorganizeTable { table, .. } => {
                write!(f, "{} {}", self.kind_name(), table)
            }
        }
    }
}
