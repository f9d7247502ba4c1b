// Abstract schema operations. A change knows how to describe itself, how to
// contribute to its change set's checksum and how to produce its inverse; the
// statements it compiles to live in the compiler so dialects can be added
// without touching this module.

use crate::checksum::CheckSum;
use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_true() -> bool {
    true
}

/// Column description shared by `createTable` and `addColumn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Value written into existing rows after the column is added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ColumnConfig {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            primary_key: false,
            default_value: None,
            value: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn fill_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Discriminant used as half of the generator registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeType {
    CreateTable,
    DropTable,
    RenameTable,
    AddColumn,
    DropColumn,
    RenameColumn,
    CreateIndex,
    DropIndex,
    CreateView,
    DropView,
    Sql,
    TagDatabase,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::CreateTable => "createTable",
            ChangeType::DropTable => "dropTable",
            ChangeType::RenameTable => "renameTable",
            ChangeType::AddColumn => "addColumn",
            ChangeType::DropColumn => "dropColumn",
            ChangeType::RenameColumn => "renameColumn",
            ChangeType::CreateIndex => "createIndex",
            ChangeType::DropIndex => "dropIndex",
            ChangeType::CreateView => "createView",
            ChangeType::DropView => "dropView",
            ChangeType::Sql => "sql",
            ChangeType::TagDatabase => "tagDatabase",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed catalogue of change variants.
///
/// The serialized form doubles as the checksum input, so field order and
/// names here are part of the stored checksum format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    #[serde(rename_all = "camelCase")]
    CreateTable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_name: Option<String>,
        table_name: String,
        columns: Vec<ColumnConfig>,
    },
    #[serde(rename_all = "camelCase")]
    DropTable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_name: Option<String>,
        table_name: String,
        #[serde(default)]
        cascade_constraints: bool,
    },
    #[serde(rename_all = "camelCase")]
    RenameTable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_name: Option<String>,
        old_table_name: String,
        new_table_name: String,
    },
    #[serde(rename_all = "camelCase")]
    AddColumn {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_name: Option<String>,
        table_name: String,
        columns: Vec<ColumnConfig>,
    },
    #[serde(rename_all = "camelCase")]
    DropColumn {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_name: Option<String>,
        table_name: String,
        column_name: String,
    },
    #[serde(rename_all = "camelCase")]
    RenameColumn {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_name: Option<String>,
        table_name: String,
        old_column_name: String,
        new_column_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column_data_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CreateIndex {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_name: Option<String>,
        table_name: String,
        index_name: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    #[serde(rename_all = "camelCase")]
    DropIndex {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_name: Option<String>,
        table_name: String,
        index_name: String,
    },
    #[serde(rename_all = "camelCase")]
    CreateView {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_name: Option<String>,
        view_name: String,
        select_query: String,
        #[serde(default)]
        replace_if_exists: bool,
    },
    #[serde(rename_all = "camelCase")]
    DropView {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_name: Option<String>,
        view_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Sql {
        sql: String,
        #[serde(default = "default_true")]
        split_statements: bool,
    },
    #[serde(rename_all = "camelCase")]
    TagDatabase { tag: String },
}

impl ChangeKind {
    pub fn change_type(&self) -> ChangeType {
        match self {
            ChangeKind::CreateTable { .. } => ChangeType::CreateTable,
            ChangeKind::DropTable { .. } => ChangeType::DropTable,
            ChangeKind::RenameTable { .. } => ChangeType::RenameTable,
            ChangeKind::AddColumn { .. } => ChangeType::AddColumn,
            ChangeKind::DropColumn { .. } => ChangeType::DropColumn,
            ChangeKind::RenameColumn { .. } => ChangeType::RenameColumn,
            ChangeKind::CreateIndex { .. } => ChangeType::CreateIndex,
            ChangeKind::DropIndex { .. } => ChangeType::DropIndex,
            ChangeKind::CreateView { .. } => ChangeType::CreateView,
            ChangeKind::DropView { .. } => ChangeType::DropView,
            ChangeKind::Sql { .. } => ChangeType::Sql,
            ChangeKind::TagDatabase { .. } => ChangeType::TagDatabase,
        }
    }

    /// Canonical text hashed into the checksum.
    fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// One change as declared inside a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    /// Skip with a warning instead of failing when the target cannot run it.
    pub skip_if_unsupported: bool,
    /// Commit whatever is open, run this change alone, commit again.
    pub run_in_own_transaction: bool,
}

impl From<ChangeKind> for Change {
    fn from(kind: ChangeKind) -> Self {
        Change::new(kind)
    }
}

impl Change {
    pub fn new(kind: ChangeKind) -> Self {
        Self {
            kind,
            skip_if_unsupported: false,
            run_in_own_transaction: false,
        }
    }

    pub fn skip_if_unsupported(mut self) -> Self {
        self.skip_if_unsupported = true;
        self
    }

    pub fn in_own_transaction(mut self) -> Self {
        self.run_in_own_transaction = true;
        self
    }

    pub fn change_type(&self) -> ChangeType {
        self.kind.change_type()
    }

    /// Content hash of this change alone. The flags do not alter what the
    /// change does to the target, so they are not part of it.
    pub fn checksum(&self) -> CheckSum {
        CheckSum::compute(&format!("{}:{}", self.change_type(), self.kind.canonical()))
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            ChangeKind::TagDatabase { tag } => Some(tag),
            _ => None,
        }
    }

    /// Changes that undo this one, in the order they must run.
    pub fn inverse(&self) -> Result<Vec<Change>, CompileError> {
        let inverses = match &self.kind {
            ChangeKind::CreateTable { schema_name, table_name, .. } => {
                vec![ChangeKind::DropTable {
                    schema_name: schema_name.clone(),
                    table_name: table_name.clone(),
                    cascade_constraints: false,
                }]
            }
            ChangeKind::RenameTable { schema_name, old_table_name, new_table_name } => {
                vec![ChangeKind::RenameTable {
                    schema_name: schema_name.clone(),
                    old_table_name: new_table_name.clone(),
                    new_table_name: old_table_name.clone(),
                }]
            }
            ChangeKind::AddColumn { schema_name, table_name, columns } => columns
                .iter()
                .map(|column| ChangeKind::DropColumn {
                    schema_name: schema_name.clone(),
                    table_name: table_name.clone(),
                    column_name: column.name.clone(),
                })
                .collect(),
            ChangeKind::RenameColumn {
                schema_name,
                table_name,
                old_column_name,
                new_column_name,
                column_data_type,
            } => {
                vec![ChangeKind::RenameColumn {
                    schema_name: schema_name.clone(),
                    table_name: table_name.clone(),
                    old_column_name: new_column_name.clone(),
                    new_column_name: old_column_name.clone(),
                    column_data_type: column_data_type.clone(),
                }]
            }
            ChangeKind::CreateIndex { schema_name, table_name, index_name, .. } => {
                vec![ChangeKind::DropIndex {
                    schema_name: schema_name.clone(),
                    table_name: table_name.clone(),
                    index_name: index_name.clone(),
                }]
            }
            ChangeKind::CreateView { schema_name, view_name, .. } => {
                vec![ChangeKind::DropView {
                    schema_name: schema_name.clone(),
                    view_name: view_name.clone(),
                }]
            }
            // Tagging writes only to the ledger, and the ledger row goes away
            // with the rollback itself.
            ChangeKind::TagDatabase { .. } => Vec::new(),
            ChangeKind::DropTable { .. }
            | ChangeKind::DropColumn { .. }
            | ChangeKind::DropIndex { .. }
            | ChangeKind::DropView { .. }
            | ChangeKind::Sql { .. } => {
                return Err(CompileError::NotInvertible(self.to_string()));
            }
        };
        Ok(inverses.into_iter().map(Change::new).collect())
    }

    pub fn is_invertible(&self) -> bool {
        self.inverse().is_ok()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ChangeKind::CreateTable { table_name, .. } | ChangeKind::DropTable { table_name, .. } => {
                write!(f, "{} {}", self.change_type(), table_name)
            }
            ChangeKind::RenameTable { old_table_name, new_table_name, .. } => {
                write!(f, "renameTable {} to {}", old_table_name, new_table_name)
            }
            ChangeKind::AddColumn { table_name, columns, .. } => {
                let names: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{}({})", c.name, c.data_type))
                    .collect();
                write!(f, "addColumn {} on {}", names.join(","), table_name)
            }
            ChangeKind::DropColumn { table_name, column_name, .. } => {
                write!(f, "dropColumn {} on {}", column_name, table_name)
            }
            ChangeKind::RenameColumn { table_name, old_column_name, new_column_name, .. } => {
                write!(
                    f,
                    "renameColumn {} to {} on {}",
                    old_column_name, new_column_name, table_name
                )
            }
            ChangeKind::CreateIndex { index_name, table_name, .. }
            | ChangeKind::DropIndex { index_name, table_name, .. } => {
                write!(f, "{} {} on {}", self.change_type(), index_name, table_name)
            }
            ChangeKind::CreateView { view_name, .. } | ChangeKind::DropView { view_name, .. } => {
                write!(f, "{} {}", self.change_type(), view_name)
            }
            ChangeKind::Sql { .. } => f.write_str("sql"),
            ChangeKind::TagDatabase { tag } => write!(f, "tagDatabase {}", tag),
        }
    }
}

/// Shorthand constructors used by tests and programmatic changelogs.
pub mod build {
    use super::{Change, ChangeKind, ColumnConfig};

    pub fn create_table(table: &str, columns: Vec<ColumnConfig>) -> Change {
        Change::new(ChangeKind::CreateTable {
            schema_name: None,
            table_name: table.to_string(),
            columns,
        })
    }

    pub fn drop_table(table: &str) -> Change {
        Change::new(ChangeKind::DropTable {
            schema_name: None,
            table_name: table.to_string(),
            cascade_constraints: false,
        })
    }

    pub fn add_column(table: &str, column: ColumnConfig) -> Change {
        add_columns(table, vec![column])
    }

    pub fn add_columns(table: &str, columns: Vec<ColumnConfig>) -> Change {
        Change::new(ChangeKind::AddColumn {
            schema_name: None,
            table_name: table.to_string(),
            columns,
        })
    }

    pub fn drop_column(table: &str, column: &str) -> Change {
        Change::new(ChangeKind::DropColumn {
            schema_name: None,
            table_name: table.to_string(),
            column_name: column.to_string(),
        })
    }

    pub fn rename_column(table: &str, from: &str, to: &str) -> Change {
        Change::new(ChangeKind::RenameColumn {
            schema_name: None,
            table_name: table.to_string(),
            old_column_name: from.to_string(),
            new_column_name: to.to_string(),
            column_data_type: None,
        })
    }

    pub fn create_index(table: &str, index: &str, columns: &[&str]) -> Change {
        Change::new(ChangeKind::CreateIndex {
            schema_name: None,
            table_name: table.to_string(),
            index_name: index.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        })
    }

    pub fn create_view(view: &str, select: &str) -> Change {
        Change::new(ChangeKind::CreateView {
            schema_name: None,
            view_name: view.to_string(),
            select_query: select.to_string(),
            replace_if_exists: false,
        })
    }

    pub fn sql(sql: &str) -> Change {
        Change::new(ChangeKind::Sql {
            sql: sql.to_string(),
            split_statements: true,
        })
    }

    pub fn tag_database(tag: &str) -> Change {
        Change::new(ChangeKind::TagDatabase { tag: tag.to_string() })
    }
}
