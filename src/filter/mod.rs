// Change set selection

use crate::changelog::{ChangeSet, ChangeSetId, RanChangeSet};
use crate::checksum::CheckSum;
use crate::error::ValidationProblem;
use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetFilterResult {
    pub accepted: bool,
    pub message: String,
    pub filter: &'static str,
}

impl ChangeSetFilterResult {
    fn accept(filter: &'static str, message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
            filter,
        }
    }

    fn reject(filter: &'static str, message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
            filter,
        }
    }
}

pub trait ChangeSetFilter {
    fn name(&self) -> &'static str;

    fn accepts(&self, change_set: &ChangeSet) -> ChangeSetFilterResult;
}

/// Never ran, always runs, or runs on change and its content changed.
pub struct ShouldRunFilter {
    ran: HashMap<ChangeSetId, Option<CheckSum>>,
}

impl ShouldRunFilter {
    pub fn new(ran: &[RanChangeSet]) -> Self {
        Self {
            ran: ran.iter().map(|r| (r.id.clone(), r.checksum.clone())).collect(),
        }
    }
}

impl ChangeSetFilter for ShouldRunFilter {
    fn name(&self) -> &'static str {
        "shouldRun"
    }

    fn accepts(&self, change_set: &ChangeSet) -> ChangeSetFilterResult {
        let Some(stored) = self.ran.get(change_set.identity()) else {
            return ChangeSetFilterResult::accept(self.name(), "Change set has not ran yet");
        };
        if change_set.is_always_run() {
            return ChangeSetFilterResult::accept(self.name(), "Change set always runs");
        }
        if change_set.is_run_on_change() && stored.as_ref().is_some_and(|s| s != change_set.checksum()) {
            return ChangeSetFilterResult::accept(self.name(), "Change set checksum changed");
        }
        ChangeSetFilterResult::reject(self.name(), "Change set already ran")
    }
}

fn normalized(values: impl IntoIterator<Item = impl AsRef<str>>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

fn matches_any(
    filter: &'static str,
    requested: &BTreeSet<String>,
    declared: &BTreeSet<String>,
) -> ChangeSetFilterResult {
    if requested.is_empty() {
        return ChangeSetFilterResult::accept(filter, "No runtime values specified, all allowed");
    }
    if declared.is_empty() {
        return ChangeSetFilterResult::accept(filter, "Change set applies to all values");
    }
    if declared.iter().any(|value| requested.contains(value)) {
        ChangeSetFilterResult::accept(filter, "Change set matches a runtime value")
    } else {
        let declared: Vec<&str> = declared.iter().map(String::as_str).collect();
        ChangeSetFilterResult::reject(filter, format!("Change set requires one of {}", declared.join(", ")))
    }
}

/// Match-any against caller contexts. Nothing requested means no filtering.
pub struct ContextFilter {
    contexts: BTreeSet<String>,
}

impl ContextFilter {
    pub fn new(contexts: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            contexts: normalized(contexts),
        }
    }
}

impl ChangeSetFilter for ContextFilter {
    fn name(&self) -> &'static str {
        "context"
    }

    fn accepts(&self, change_set: &ChangeSet) -> ChangeSetFilterResult {
        matches_any(self.name(), &self.contexts, change_set.contexts())
    }
}

pub struct LabelFilter {
    labels: BTreeSet<String>,
}

impl LabelFilter {
    pub fn new(labels: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            labels: normalized(labels),
        }
    }
}

impl ChangeSetFilter for LabelFilter {
    fn name(&self) -> &'static str {
        "label"
    }

    fn accepts(&self, change_set: &ChangeSet) -> ChangeSetFilterResult {
        matches_any(self.name(), &self.labels, change_set.labels())
    }
}

/// Target restriction declared on a change set. `!name` excludes a target.
pub struct DbmsFilter {
    target: String,
}

impl DbmsFilter {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_ascii_lowercase(),
        }
    }
}

impl ChangeSetFilter for DbmsFilter {
    fn name(&self) -> &'static str {
        "dbms"
    }

    fn accepts(&self, change_set: &ChangeSet) -> ChangeSetFilterResult {
        let declared = change_set.dbms();
        if declared.is_empty() {
            return ChangeSetFilterResult::accept(self.name(), "Change set runs on any database");
        }
        if declared.contains(&format!("!{}", self.target)) {
            return ChangeSetFilterResult::reject(self.name(), format!("Change set excludes {}", self.target));
        }
        let positives: Vec<&String> = declared.iter().filter(|d| !d.starts_with('!')).collect();
        if positives.is_empty() || positives.iter().any(|d| **d == self.target || *d == "all") {
            ChangeSetFilterResult::accept(self.name(), format!("Change set runs on {}", self.target))
        } else {
            ChangeSetFilterResult::reject(self.name(), format!("Change set does not run on {}", self.target))
        }
    }
}

/// Admits the first `limit` change sets it is asked about.
pub struct CountFilter {
    limit: usize,
    seen: Cell<usize>,
}

impl CountFilter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            seen: Cell::new(0),
        }
    }
}

impl ChangeSetFilter for CountFilter {
    fn name(&self) -> &'static str {
        "count"
    }

    fn accepts(&self, _change_set: &ChangeSet) -> ChangeSetFilterResult {
        let seen = self.seen.get();
        if seen < self.limit {
            self.seen.set(seen + 1);
            ChangeSetFilterResult::accept(self.name(), format!("Only running {} change sets", self.limit))
        } else {
            ChangeSetFilterResult::reject(self.name(), format!("Only running {} change sets", self.limit))
        }
    }
}

pub struct AlreadyRanFilter {
    ran: HashSet<ChangeSetId>,
}

impl AlreadyRanFilter {
    pub fn new(ran: &[RanChangeSet]) -> Self {
        Self {
            ran: ran.iter().map(|r| r.id.clone()).collect(),
        }
    }
}

impl ChangeSetFilter for AlreadyRanFilter {
    fn name(&self) -> &'static str {
        "alreadyRan"
    }

    fn accepts(&self, change_set: &ChangeSet) -> ChangeSetFilterResult {
        if self.ran.contains(change_set.identity()) {
            ChangeSetFilterResult::accept(self.name(), "Change set already ran")
        } else {
            ChangeSetFilterResult::reject(self.name(), "Change set has not ran")
        }
    }
}

/// Change sets executed after the last ledger row carrying `tag`.
pub struct AfterTagFilter {
    tag: String,
    after: HashSet<ChangeSetId>,
}

impl AfterTagFilter {
    /// `ran` must be in execution order.
    pub fn new(tag: &str, ran: &[RanChangeSet]) -> Result<Self, ValidationProblem> {
        let position = ran
            .iter()
            .rposition(|r| r.tag.as_deref() == Some(tag))
            .ok_or_else(|| ValidationProblem::UnknownTag(tag.to_string()))?;
        Ok(Self {
            tag: tag.to_string(),
            after: ran[position + 1..].iter().map(|r| r.id.clone()).collect(),
        })
    }
}

impl ChangeSetFilter for AfterTagFilter {
    fn name(&self) -> &'static str {
        "afterTag"
    }

    fn accepts(&self, change_set: &ChangeSet) -> ChangeSetFilterResult {
        if self.after.contains(change_set.identity()) {
            ChangeSetFilterResult::accept(self.name(), format!("Change set ran after tag '{}'", self.tag))
        } else {
            ChangeSetFilterResult::reject(self.name(), format!("Change set did not run after tag '{}'", self.tag))
        }
    }
}

pub struct ExecutedAfterFilter {
    after: DateTime<Utc>,
    executed: HashMap<ChangeSetId, DateTime<Utc>>,
}

impl ExecutedAfterFilter {
    pub fn new(after: DateTime<Utc>, ran: &[RanChangeSet]) -> Self {
        Self {
            after,
            executed: ran.iter().map(|r| (r.id.clone(), r.date_executed)).collect(),
        }
    }
}

impl ChangeSetFilter for ExecutedAfterFilter {
    fn name(&self) -> &'static str {
        "executedAfter"
    }

    fn accepts(&self, change_set: &ChangeSet) -> ChangeSetFilterResult {
        match self.executed.get(change_set.identity()) {
            Some(date) if *date > self.after => {
                ChangeSetFilterResult::accept(self.name(), format!("Change set ran after {}", self.after))
            }
            _ => ChangeSetFilterResult::reject(self.name(), format!("Change set did not run after {}", self.after)),
        }
    }
}

/// AND-composition of filters. A count limit, if any, is consulted last so
/// it only counts change sets every other filter accepted.
#[derive(Default)]
pub struct FilterPipeline {
    filters: Vec<Box<dyn ChangeSetFilter>>,
    count: Option<CountFilter>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl ChangeSetFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn with_count(mut self, limit: Option<usize>) -> Self {
        self.count = limit.map(CountFilter::new);
        self
    }

    pub fn accepts(&self, change_set: &ChangeSet) -> bool {
        let mut filters: Vec<&dyn ChangeSetFilter> = self.filters.iter().map(|f| f.as_ref() as &dyn ChangeSetFilter).collect();
        if let Some(count) = &self.count {
            filters.push(count);
        }
        for filter in filters {
            let result = filter.accepts(change_set);
            if !result.accepted {
                debug!("Skipping {} ({}): {}", change_set, result.filter, result.message);
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::build::*;
    use crate::changelog::ExecType;
    use chrono::TimeZone;

    fn cs(id: &str) -> ChangeSet {
        ChangeSet::new("changelog.json", id, "a").with_change(sql(&format!("SELECT {}", id)))
    }

    fn ran(change_set: &ChangeSet, order: i64) -> RanChangeSet {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, order as u32).unwrap();
        RanChangeSet::from_change_set(change_set, ExecType::Executed, date, order, "d")
    }

    #[test]
    fn test_should_run() {
        let done = cs("1");
        let mut drifted = ran(&cs("2"), 2);
        drifted.checksum = Some(CheckSum::compute("old"));
        let rows = vec![ran(&done, 1), drifted, ran(&cs("3"), 3)];
        let filter = ShouldRunFilter::new(&rows);

        assert!(filter.accepts(&cs("4")).accepted);
        assert!(!filter.accepts(&done).accepted);
        assert!(filter.accepts(&cs("1").always_run(true)).accepted);
        assert!(!filter.accepts(&cs("2")).accepted);
        assert!(filter.accepts(&cs("2").run_on_change(true)).accepted);
        assert!(!filter.accepts(&cs("3").run_on_change(true)).accepted);
    }

    #[test]
    fn test_should_run_ignores_cleared_checksum() {
        let mut row = ran(&cs("1"), 1);
        row.checksum = None;
        let filter = ShouldRunFilter::new(&[row]);
        assert!(!filter.accepts(&cs("1").run_on_change(true)).accepted);
    }

    #[test]
    fn test_context_filter() {
        let filter = ContextFilter::new(["Test"]);
        assert!(filter.accepts(&cs("1")).accepted);
        assert!(filter.accepts(&cs("1").with_contexts(["prod", "test"])).accepted);
        assert!(!filter.accepts(&cs("1").with_contexts(["prod"])).accepted);
        assert!(ContextFilter::new(Vec::<String>::new()).accepts(&cs("1").with_contexts(["prod"])).accepted);
    }

    #[test]
    fn test_label_filter() {
        let filter = LabelFilter::new(["v2"]);
        assert!(filter.accepts(&cs("1").with_labels(["v1", "v2"])).accepted);
        assert!(!filter.accepts(&cs("1").with_labels(["v1"])).accepted);
    }

    #[test]
    fn test_dbms_filter() {
        let filter = DbmsFilter::new("SQLite");
        assert!(filter.accepts(&cs("1")).accepted);
        assert!(filter.accepts(&cs("1").with_dbms(["postgresql", "sqlite"])).accepted);
        assert!(!filter.accepts(&cs("1").with_dbms(["postgresql"])).accepted);
        assert!(!filter.accepts(&cs("1").with_dbms(["!sqlite"])).accepted);
        assert!(filter.accepts(&cs("1").with_dbms(["!db2"])).accepted);
        assert!(filter.accepts(&cs("1").with_dbms(["all"])).accepted);
    }

    #[test]
    fn test_count_applies_last() {
        let pipeline = FilterPipeline::new()
            .with_count(Some(1))
            .with(ContextFilter::new(["test"]));
        let skipped = cs("1").with_contexts(["prod"]);
        let taken = cs("2").with_contexts(["test"]);
        let over = cs("3");
        assert!(!pipeline.accepts(&skipped));
        assert!(pipeline.accepts(&taken));
        assert!(!pipeline.accepts(&over));
    }

    #[test]
    fn test_after_tag() {
        let mut tagged = ran(&cs("2"), 2);
        tagged.tag = Some("v1".to_string());
        let rows = vec![ran(&cs("1"), 1), tagged, ran(&cs("3"), 3), ran(&cs("4"), 4)];
        let filter = AfterTagFilter::new("v1", &rows).unwrap();
        assert!(!filter.accepts(&cs("1")).accepted);
        assert!(!filter.accepts(&cs("2")).accepted);
        assert!(filter.accepts(&cs("3")).accepted);
        assert!(filter.accepts(&cs("4")).accepted);

        assert_eq!(
            AfterTagFilter::new("v9", &rows).err(),
            Some(ValidationProblem::UnknownTag("v9".to_string()))
        );
    }

    #[test]
    fn test_executed_after_and_already_ran() {
        let rows = vec![ran(&cs("1"), 1), ran(&cs("2"), 5)];
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 3).unwrap();
        let filter = ExecutedAfterFilter::new(cutoff, &rows);
        assert!(!filter.accepts(&cs("1")).accepted);
        assert!(filter.accepts(&cs("2")).accepted);

        let ran_filter = AlreadyRanFilter::new(&rows);
        assert!(ran_filter.accepts(&cs("1")).accepted);
        assert!(!ran_filter.accepts(&cs("9")).accepted);
    }
}
