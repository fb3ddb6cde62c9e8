//! Migration status tracking

use crate::migration::MigrationFile;

/// Applied versus pending migration files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// File names recorded in the bookkeeping table, sorted
    pub applied: Vec<String>,

    /// Files after the last applied one, in execution order
    pub pending: Vec<MigrationFile>,
}

impl MigrationStatus {
    #[must_use]
    pub fn new(applied: Vec<String>, pending: Vec<MigrationFile>) -> Self {
        Self { applied, pending }
    }

    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn latest_applied(&self) -> Option<&str> {
        self.applied.last().map(String::as_str)
    }

    #[must_use]
    pub fn next_pending(&self) -> Option<&MigrationFile> {
        self.pending.first()
    }
}

/// Files that come after the last applied one.
///
/// When the last applied name is not among `files`, every file is pending.
pub(crate) fn pending_files(files: &[MigrationFile], applied: &[String]) -> Vec<MigrationFile> {
    let start = applied
        .iter()
        .max()
        .and_then(|last| files.iter().position(|f| &f.name == last))
        .map_or(0, |idx| idx + 1);
    files[start..].to_vec()
}
