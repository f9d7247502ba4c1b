use crate::Result;
use crate::change::{Change, ChangeKind};
use crate::changelog::{ChangeLog, ChangeSet, IncludeOrder};
use crate::error::MigrationError;
use crate::precondition::Preconditions;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const SKIP_IF_UNSUPPORTED: &str = "skipIfUnsupported";
const RUN_IN_OWN_TRANSACTION: &str = "runInOwnTransaction";

/// Turns a changelog document into the in-memory model.
pub trait ChangeLogParser {
    fn supports(&self, path: &Path) -> bool;

    fn parse(&self, path: &Path) -> Result<ChangeLog>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    database_change_log: Vec<Entry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
enum Entry {
    PreConditions(Preconditions),
    ChangeSet(ChangeSetEntry),
    Include(IncludeEntry),
    IncludeAll(IncludeAllEntry),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringList {
    One(String),
    Many(Vec<String>),
}

impl StringList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringList::One(text) => text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            StringList::Many(items) => items,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeSetEntry {
    id: String,
    author: String,
    #[serde(default)]
    run_on_change: bool,
    #[serde(default)]
    always_run: bool,
    #[serde(default = "default_true")]
    run_in_transaction: bool,
    #[serde(default, alias = "context")]
    contexts: Option<StringList>,
    #[serde(default)]
    labels: Option<StringList>,
    #[serde(default)]
    dbms: Option<StringList>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    changes: Vec<Value>,
    #[serde(default)]
    rollback: Option<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncludeEntry {
    file: String,
    #[serde(default)]
    relative_to_changelog_file: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncludeAllEntry {
    path: String,
    #[serde(default)]
    relative_to_changelog_file: bool,
}

/// Reads `databaseChangeLog` JSON documents.
///
/// Change set identities carry the file's path relative to the directory of
/// the root changelog, so the same project parses to the same identities
/// wherever it is checked out. Included paths resolve against that directory
/// unless `relativeToChangelogFile` is set.
#[derive(Debug, Default)]
pub struct JsonChangeLogParser;

impl JsonChangeLogParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a document already in memory. `path` names it and anchors
    /// relative includes.
    pub fn parse_str(&self, path: &Path, text: &str) -> Result<ChangeLog> {
        let path = normalize(path);
        let base = base_dir(&path);
        let mut stack = vec![identity_of(&path)];
        self.parse_document(&path, text, &base, &mut stack)
    }

    fn parse_file(&self, path: &Path, base: &Path, stack: &mut Vec<PathBuf>) -> Result<ChangeLog> {
        let key = identity_of(path);
        if stack.contains(&key) {
            return Err(parse_error(base, path, "include cycle detected"));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|err| parse_error(base, path, &format!("cannot read changelog: {}", err)))?;

        stack.push(key);
        let result = self.parse_document(path, &text, base, stack);
        stack.pop();
        result
    }

    fn parse_document(&self, path: &Path, text: &str, base: &Path, stack: &mut Vec<PathBuf>) -> Result<ChangeLog> {
        let logical = logical_path(base, path);
        debug!("Parsing changelog {}", logical);
        let document: Document =
            serde_json::from_str(text).map_err(|err| parse_error(base, path, &err.to_string()))?;

        let mut changelog = ChangeLog::new(logical.clone());
        for entry in document.database_change_log {
            match entry {
                Entry::PreConditions(preconditions) => {
                    changelog.include(ChangeLog::new(logical.clone()).with_preconditions(preconditions));
                }
                Entry::ChangeSet(entry) => {
                    let change_set = build_change_set(&logical, entry)
                        .map_err(|message| parse_error(base, path, &message))?;
                    changelog.add_change_set(change_set);
                }
                Entry::Include(include) => {
                    let target = resolve(base, path, &include.file, include.relative_to_changelog_file)?;
                    let child = self.parse_file(&target, base, stack)?;
                    changelog.include(child);
                }
                Entry::IncludeAll(include) => {
                    let dir = resolve(base, path, &include.path, include.relative_to_changelog_file)?;
                    let mut children = Vec::new();
                    for file in json_files(&dir).map_err(|err| {
                        parse_error(base, path, &format!("cannot list {}: {}", dir.display(), err))
                    })? {
                        children.push(self.parse_file(&file, base, stack)?);
                    }
                    changelog.include_all(children, IncludeOrder::ByPath);
                }
            }
        }
        Ok(changelog)
    }
}

impl ChangeLogParser for JsonChangeLogParser {
    fn supports(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }

    fn parse(&self, path: &Path) -> Result<ChangeLog> {
        let path = normalize(path);
        let base = base_dir(&path);
        self.parse_file(&path, &base, &mut Vec::new())
    }
}

fn build_change_set(logical: &str, entry: ChangeSetEntry) -> std::result::Result<ChangeSet, String> {
    let changes = entry
        .changes
        .into_iter()
        .map(parse_change)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| format!("change set {}: {}", entry.id, err))?;

    let mut change_set = ChangeSet::new(logical, entry.id.clone(), entry.author)
        .with_changes(changes)
        .run_on_change(entry.run_on_change)
        .always_run(entry.always_run)
        .run_in_transaction(entry.run_in_transaction)
        .with_contexts(entry.contexts.map(StringList::into_vec).unwrap_or_default())
        .with_labels(entry.labels.map(StringList::into_vec).unwrap_or_default())
        .with_dbms(entry.dbms.map(StringList::into_vec).unwrap_or_default());
    if let Some(comment) = entry.comment {
        change_set = change_set.with_comment(comment);
    }
    if let Some(rollback) = entry.rollback {
        let rollback = rollback
            .into_iter()
            .map(parse_change)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| format!("rollback of change set {}: {}", entry.id, err))?;
        change_set = change_set.with_rollback(rollback);
    }
    Ok(change_set)
}

/// A change entry is an object with exactly one change key, plus optional
/// flags. A bare string is raw SQL.
fn parse_change(value: Value) -> std::result::Result<Change, String> {
    let mut entry: Map<String, Value> = match value {
        Value::String(sql) => {
            return Ok(Change::new(ChangeKind::Sql {
                sql,
                split_statements: true,
            }));
        }
        Value::Object(entry) => entry,
        other => return Err(format!("expected a change object, found {}", other)),
    };

    let skip = take_flag(&mut entry, SKIP_IF_UNSUPPORTED)?;
    let own_transaction = take_flag(&mut entry, RUN_IN_OWN_TRANSACTION)?;
    if entry.len() != 1 {
        let keys: Vec<&String> = entry.keys().collect();
        return Err(format!("expected exactly one change type, found {:?}", keys));
    }

    let kind: ChangeKind = serde_json::from_value(Value::Object(entry)).map_err(|err| err.to_string())?;
    let mut change = Change::new(kind);
    change.skip_if_unsupported = skip;
    change.run_in_own_transaction = own_transaction;
    Ok(change)
}

fn take_flag(entry: &mut Map<String, Value>, key: &str) -> std::result::Result<bool, String> {
    match entry.remove(key) {
        None => Ok(false),
        Some(Value::Bool(flag)) => Ok(flag),
        Some(other) => Err(format!("{} must be a boolean, found {}", key, other)),
    }
}

fn base_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn identity_of(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Lexically drop `.` and fold `..` into the preceding component.
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Included paths must stay inside the root changelog's directory.
fn resolve(base: &Path, including: &Path, target: &str, relative_to_file: bool) -> Result<PathBuf> {
    let joined = if relative_to_file {
        base_dir(including).join(target)
    } else {
        base.join(target)
    };
    let resolved = normalize(&joined);
    let inside = resolved
        .strip_prefix(base)
        .is_ok_and(|rest| !rest.components().any(|c| c == Component::ParentDir));
    if !inside {
        return Err(parse_error(
            base,
            including,
            &format!("include {} escapes the changelog directory", target),
        ));
    }
    Ok(resolved)
}

fn logical_path(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn json_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn parse_error(base: &Path, path: &Path, message: &str) -> MigrationError {
    MigrationError::Parse {
        path: logical_path(base, path),
        message: message.to_string(),
    }
}
