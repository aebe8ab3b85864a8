use serde::Serialize;
use tracing::warn;

use crate::domain::UpsertAction;

/// Row accounting for one import operation.
///
/// `skipped` counts rows dropped because a referenced natural key could not
/// be resolved; every skipped row also carries a warning. Warnings recorded
/// through [`ImportReport::note`] do not skip anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub operation: String,
    pub created: usize,
    pub updated: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl ImportReport {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            ..Self::default()
        }
    }

    pub fn count(&mut self, action: UpsertAction) {
        match action {
            UpsertAction::Created => self.created += 1,
            UpsertAction::Updated => self.updated += 1,
        }
    }

    pub fn skip(&mut self, message: String) {
        warn!(operation = %self.operation, "{message}");
        self.skipped += 1;
        self.warnings.push(message);
    }

    pub fn note(&mut self, message: String) {
        warn!(operation = %self.operation, "{message}");
        self.warnings.push(message);
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: created={} updated={} inserted={} skipped={} warnings={}",
            self.operation,
            self.created,
            self.updated,
            self.inserted,
            self.skipped,
            self.warnings.len()
        )
    }
}
