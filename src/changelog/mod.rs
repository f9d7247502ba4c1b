mod change_set;
mod ran_change_set;

pub use change_set::{ChangeSet, ChangeSetId};
pub use ran_change_set::{ExecType, RanChangeSet};

use crate::precondition::Preconditions;

/// How the children of an `include_all` are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeOrder {
    /// Keep the order the children were handed over in.
    #[default]
    Declared,
    /// Sort children by their physical path.
    ByPath,
}

/// An ordered changelog: its own change sets interleaved with the change sets
/// of included changelogs, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    physical_path: String,
    change_sets: Vec<ChangeSet>,
    preconditions: Option<Preconditions>,
}

impl ChangeLog {
    pub fn new(physical_path: impl Into<String>) -> Self {
        Self {
            physical_path: physical_path.into(),
            change_sets: Vec::new(),
            preconditions: None,
        }
    }

    pub fn physical_path(&self) -> &str {
        &self.physical_path
    }

    pub fn add_change_set(&mut self, change_set: ChangeSet) {
        self.change_sets.push(change_set);
    }

    pub fn with_change_set(mut self, change_set: ChangeSet) -> Self {
        self.add_change_set(change_set);
        self
    }

    pub fn set_preconditions(&mut self, preconditions: Preconditions) {
        self.preconditions = Some(preconditions);
    }

    pub fn with_preconditions(mut self, preconditions: Preconditions) -> Self {
        self.set_preconditions(preconditions);
        self
    }

    /// Root gate evaluated once before any filtering.
    pub fn preconditions(&self) -> Option<&Preconditions> {
        self.preconditions.as_ref()
    }

    /// Append a sub-changelog's change sets at the current position. Its root
    /// preconditions join this changelog's.
    pub fn include(&mut self, child: ChangeLog) {
        if let Some(child_preconditions) = child.preconditions {
            self.preconditions = Some(match self.preconditions.take() {
                Some(existing) => existing.merge(child_preconditions),
                None => child_preconditions,
            });
        }
        self.change_sets.extend(child.change_sets);
    }

    pub fn include_all(&mut self, mut children: Vec<ChangeLog>, order: IncludeOrder) {
        if order == IncludeOrder::ByPath {
            children.sort_by(|a, b| a.physical_path.cmp(&b.physical_path));
        }
        for child in children {
            self.include(child);
        }
    }

    pub fn change_sets(&self) -> &[ChangeSet] {
        &self.change_sets
    }

    pub fn get(&self, id: &ChangeSetId) -> Option<&ChangeSet> {
        self.change_sets.iter().find(|cs| cs.identity() == id)
    }

    pub fn len(&self) -> usize {
        self.change_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.change_sets.is_empty()
    }
}
