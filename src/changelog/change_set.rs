use crate::change::Change;
use crate::checksum::CheckSum;
use once_cell::sync::OnceCell;
use std::collections::BTreeSet;
use std::fmt;

/// Tracking identity of a change set: (changelog path, id, author).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeSetId {
    pub file_path: String,
    pub id: String,
    pub author: String,
}

impl ChangeSetId {
    pub fn new(file_path: impl Into<String>, id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            id: id.into(),
            author: author.into(),
        }
    }
}

impl fmt::Display for ChangeSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.file_path, self.id, self.author)
    }
}

/// Smallest unit of migration. Built once while a changelog is loaded and
/// not changed afterwards; the checksum is derived from the changes on first
/// use and memoized.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    id: ChangeSetId,
    changes: Vec<Change>,
    always_run: bool,
    run_on_change: bool,
    run_in_transaction: bool,
    contexts: BTreeSet<String>,
    labels: BTreeSet<String>,
    dbms: BTreeSet<String>,
    rollback: Option<Vec<Change>>,
    comment: Option<String>,
    checksum: OnceCell<CheckSum>,
}

fn normalized(values: impl IntoIterator<Item = impl AsRef<str>>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

impl ChangeSet {
    pub fn new(file_path: impl Into<String>, id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: ChangeSetId::new(file_path, id, author),
            changes: Vec::new(),
            always_run: false,
            run_on_change: false,
            run_in_transaction: true,
            contexts: BTreeSet::new(),
            labels: BTreeSet::new(),
            dbms: BTreeSet::new(),
            rollback: None,
            comment: None,
            checksum: OnceCell::new(),
        }
    }

    pub fn with_change(mut self, change: Change) -> Self {
        self.changes.push(change);
        self.checksum = OnceCell::new();
        self
    }

    pub fn with_changes(mut self, changes: impl IntoIterator<Item = Change>) -> Self {
        self.changes.extend(changes);
        self.checksum = OnceCell::new();
        self
    }

    pub fn always_run(mut self, always_run: bool) -> Self {
        self.always_run = always_run;
        self
    }

    pub fn run_on_change(mut self, run_on_change: bool) -> Self {
        self.run_on_change = run_on_change;
        self
    }

    pub fn run_in_transaction(mut self, run_in_transaction: bool) -> Self {
        self.run_in_transaction = run_in_transaction;
        self
    }

    pub fn with_contexts(mut self, contexts: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.contexts = normalized(contexts);
        self
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.labels = normalized(labels);
        self
    }

    pub fn with_dbms(mut self, dbms: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.dbms = normalized(dbms);
        self
    }

    /// Explicit rollback, replacing the per-change inverses. An empty list is
    /// a valid rollback that does nothing.
    pub fn with_rollback(mut self, rollback: Vec<Change>) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn identity(&self) -> &ChangeSetId {
        &self.id
    }

    pub fn id(&self) -> &str {
        &self.id.id
    }

    pub fn author(&self) -> &str {
        &self.id.author
    }

    pub fn file_path(&self) -> &str {
        &self.id.file_path
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_always_run(&self) -> bool {
        self.always_run
    }

    pub fn is_run_on_change(&self) -> bool {
        self.run_on_change
    }

    pub fn is_run_in_transaction(&self) -> bool {
        self.run_in_transaction
    }

    pub fn contexts(&self) -> &BTreeSet<String> {
        &self.contexts
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn dbms(&self) -> &BTreeSet<String> {
        &self.dbms
    }

    pub fn rollback(&self) -> Option<&[Change]> {
        self.rollback.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Hash over the concatenated checksums of the contained changes.
    pub fn checksum(&self) -> &CheckSum {
        self.checksum.get_or_init(|| {
            let parts: Vec<CheckSum> = self.changes.iter().map(Change::checksum).collect();
            CheckSum::combine(parts.iter())
        })
    }

    /// A stored checksum is valid when it is absent (cleared) or matches.
    pub fn is_checksum_valid(&self, stored: Option<&CheckSum>) -> bool {
        stored.is_none_or(|stored| stored == self.checksum())
    }

    /// Rollback is possible with an explicit block or when every change can
    /// produce its own inverse.
    pub fn is_rollback_capable(&self) -> bool {
        self.rollback.is_some() || self.changes.iter().all(Change::is_invertible)
    }

    /// Tag carried by a `tagDatabase` change, if any.
    pub fn tag(&self) -> Option<&str> {
        self.changes.iter().find_map(Change::tag)
    }

    /// Short summary stored in the ledger's description column.
    pub fn description(&self) -> String {
        let names: Vec<String> = self.changes.iter().map(|c| c.change_type().to_string()).collect();
        if names.is_empty() {
            "empty".to_string()
        } else {
            names.join(", ")
        }
    }
}

impl PartialEq for ChangeSet {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChangeSet {}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::build::*;
    use crate::change::ColumnConfig;

    fn one_column() -> ChangeSet {
        ChangeSet::new("db/changelog.json", "1", "a")
            .with_change(add_column("t", ColumnConfig::new("NEWCOL", "TYP")))
    }

    #[test]
    fn test_checksum_is_memoized_and_stable() {
        let cs = one_column();
        let first = cs.checksum().clone();
        assert_eq!(&first, cs.checksum());
        assert_eq!(first, *one_column().checksum());
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let base = one_column();
        let extended = one_column().with_change(add_column("t", ColumnConfig::new("NEWCOL2", "TYP")));
        assert_ne!(base.checksum(), extended.checksum());

        let reordered = ChangeSet::new("db/changelog.json", "1", "a")
            .with_change(add_column("t", ColumnConfig::new("NEWCOL2", "TYP")))
            .with_change(add_column("t", ColumnConfig::new("NEWCOL", "TYP")));
        assert_ne!(extended.checksum(), reordered.checksum());
    }

    #[test]
    fn test_checksum_ignores_metadata() {
        let plain = one_column();
        let decorated = one_column()
            .with_contexts(["test"])
            .with_comment("hello")
            .run_on_change(true);
        assert_eq!(plain.checksum(), decorated.checksum());
    }

    #[test]
    fn test_adding_change_after_checksum_resets_cache() {
        let cs = one_column();
        let before = cs.checksum().clone();
        let cs = cs.with_change(drop_table("x"));
        assert_ne!(&before, cs.checksum());
    }

    #[test]
    fn test_cleared_checksum_is_valid() {
        let cs = one_column();
        assert!(cs.is_checksum_valid(None));
        assert!(cs.is_checksum_valid(Some(&cs.checksum().clone())));
        assert!(!cs.is_checksum_valid(Some(&CheckSum::compute("other"))));
    }

    #[test]
    fn test_rollback_capability() {
        assert!(one_column().is_rollback_capable());
        let destructive = ChangeSet::new("f", "2", "a").with_change(drop_table("t"));
        assert!(!destructive.is_rollback_capable());
        assert!(destructive.with_rollback(vec![]).is_rollback_capable());
    }

    #[test]
    fn test_identity_equality_ignores_content() {
        let a = one_column();
        let b = ChangeSet::new("db/changelog.json", "1", "a").with_change(drop_table("x"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "db/changelog.json::1::a");
    }

    #[test]
    fn test_contexts_are_normalized() {
        let cs = one_column().with_contexts([" Test ", "", "PROD"]);
        let contexts: Vec<&str> = cs.contexts().iter().map(String::as_str).collect();
        assert_eq!(contexts, vec!["prod", "test"]);
    }
}
