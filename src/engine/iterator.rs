use super::visitor::ChangeSetVisitor;
use crate::changelog::{ChangeLog, ChangeSet};
use crate::filter::FilterPipeline;
use crate::lock::LockService;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Walks a changelog in one direction, selecting change sets through a
/// filter pipeline and handing them to a visitor one at a time.
pub struct ChangeLogIterator<'a> {
    changelog: &'a ChangeLog,
    pipeline: FilterPipeline,
}

impl<'a> ChangeLogIterator<'a> {
    pub fn new(changelog: &'a ChangeLog, pipeline: FilterPipeline) -> Self {
        Self { changelog, pipeline }
    }

    /// Change sets the pipeline accepts, in visiting order. Filters with
    /// state (the count limit) see change sets in that order too.
    pub fn select(&self, direction: Direction) -> Vec<&'a ChangeSet> {
        let change_sets = self.changelog.change_sets();
        let ordered: Box<dyn Iterator<Item = &'a ChangeSet>> = match direction {
            Direction::Forward => Box::new(change_sets.iter()),
            Direction::Reverse => Box::new(change_sets.iter().rev()),
        };
        ordered.filter(|cs| self.pipeline.accepts(cs)).collect()
    }

    /// Visit `selected` in order. The lock is checked before every visit;
    /// losing it ends the pass with an error.
    pub fn walk(selected: &[&ChangeSet], visitor: &mut dyn ChangeSetVisitor, lock: &LockService) -> Result<usize> {
        let mut visited = 0;
        for change_set in selected {
            lock.verify()?;
            visitor.visit(change_set)?;
            visited += 1;
        }
        Ok(visited)
    }
}
