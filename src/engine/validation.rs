use crate::changelog::{ChangeLog, ChangeSetId, RanChangeSet};
use crate::checksum::CheckSum;
use crate::compiler::StatementCompiler;
use crate::error::{ValidationErrors, ValidationProblem};
use crate::filter::FilterPipeline;
use std::collections::{HashMap, HashSet};

/// Checks a changelog against the ledger before anything is executed.
///
/// Identity problems are reported for every change set. Change sets the
/// `scope` pipeline rejects are otherwise ignored. Of the rest, those that
/// would execute are checked for unsupported changes, and those that already
/// ran are checked for checksum drift unless they run on change.
pub fn validate_changelog(
    changelog: &ChangeLog,
    ran: &[RanChangeSet],
    scope: &FilterPipeline,
    compiler: &StatementCompiler,
    target: &str,
    ignore_checksums: bool,
) -> ValidationErrors {
    let mut errors = ValidationErrors::default();
    let stored: HashMap<&ChangeSetId, Option<&CheckSum>> =
        ran.iter().map(|r| (&r.id, r.checksum.as_ref())).collect();
    let mut seen = HashSet::new();

    for change_set in changelog.change_sets() {
        let id = change_set.identity();
        if id.id.trim().is_empty() || id.author.trim().is_empty() {
            errors.push(ValidationProblem::EmptyIdentity(id.clone()));
        }
        if !seen.insert(id) {
            errors.push(ValidationProblem::DuplicateChangeSet(id.clone()));
            continue;
        }
        for dbms in change_set.dbms() {
            let name = dbms.trim_start_matches('!');
            if !(name == "all" || name == "none" || compiler.dialects().is_known(name)) {
                errors.push(ValidationProblem::UnknownDbms {
                    change_set: id.clone(),
                    dbms: name.to_string(),
                });
            }
        }

        if !scope.accepts(change_set) {
            continue;
        }

        let previous = stored.get(id);
        let will_execute =
            previous.is_none() || change_set.is_always_run() || change_set.is_run_on_change();
        if will_execute {
            for change in change_set.changes() {
                if change.skip_if_unsupported {
                    continue;
                }
                if let Err(error) = compiler.compile(change, target) {
                    errors.push(ValidationProblem::Unsupported {
                        change_set: id.clone(),
                        error,
                    });
                }
            }
        }

        if let Some(Some(checksum)) = previous {
            if !ignore_checksums && !change_set.is_run_on_change() && !change_set.is_checksum_valid(Some(*checksum)) {
                errors.push(ValidationProblem::ChecksumDrift {
                    change_set: id.clone(),
                    stored: checksum.to_string(),
                    current: change_set.checksum().to_string(),
                });
            }
        }
    }
    errors
}
