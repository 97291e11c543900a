// Log import orchestration
//
// parse -> classify -> accept -> score, in file order. Accepts already
// committed always stand: cancellation and timeouts stop further
// processing and report a resumable marker, they never roll back.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::adif::{parse_log, ParseWarning};
use crate::config::EngineConfig;
use crate::dedup::{accept_contact, classify, AcceptOutcome};
use crate::error::CoreError;
use crate::model::UserId;
use crate::progress::{DiplomaUpdate, ProgressCalculator};
use crate::store::Store;

/// Result of one import call, consumed by the upload-handling layer.
#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub accepted_count: usize,
    pub duplicate_count: usize,
    pub warnings: Vec<ParseWarning>,
    pub diploma_updates: Vec<DiplomaUpdate>,
    /// Fingerprints confirmed accepted by this call, in order.
    pub accepted_fingerprints: Vec<String>,
    /// Set when the import stopped early (timeout or cancellation):
    /// index into the deduplicated fresh sequence of the first contact
    /// that was not processed. The caller may retry from there; a full
    /// re-submission also works since accepts are idempotent.
    pub resume_from: Option<usize>,
}

pub struct Importer<'a, S: Store> {
    store: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: Store> Importer<'a, S> {
    pub fn new(store: &'a S, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    pub async fn import(&self, user: UserId, raw_log: &str) -> Result<ImportReport, CoreError> {
        self.import_with_cancel(user, raw_log, &CancellationToken::new())
            .await
    }

    /// Cancellable import. Cancellation is checked between contacts; prior
    /// atomic accepts are not undone.
    pub async fn import_with_cancel(
        &self,
        user: UserId,
        raw_log: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportReport, CoreError> {
        let parsed = parse_log(raw_log)?;
        let record_count = parsed.contacts.len();

        let classified = match classify(self.store, user, parsed.contacts, self.config.store_timeout)
            .await
        {
            Ok(c) => c,
            Err(CoreError::PersistenceTimeout(_)) => {
                // nothing was accepted yet; the whole batch is retryable
                return Ok(ImportReport {
                    accepted_count: 0,
                    duplicate_count: 0,
                    warnings: parsed.warnings,
                    diploma_updates: Vec::new(),
                    accepted_fingerprints: Vec::new(),
                    resume_from: Some(0),
                });
            }
            Err(e) => return Err(e),
        };

        let calculator = ProgressCalculator::new(self.store, self.config);
        let mut report = ImportReport {
            accepted_count: 0,
            duplicate_count: classified.duplicates.len(),
            warnings: parsed.warnings,
            diploma_updates: Vec::new(),
            accepted_fingerprints: Vec::new(),
            resume_from: None,
        };

        for (i, contact) in classified.fresh.into_iter().enumerate() {
            if cancel.is_cancelled() {
                report.resume_from = Some(i);
                break;
            }

            match accept_contact(self.store, user, contact, self.config.store_timeout).await {
                Ok(AcceptOutcome::Accepted(accepted)) => {
                    report.accepted_count += 1;
                    report
                        .accepted_fingerprints
                        .push(accepted.contact.fingerprint.clone());
                    match calculator.apply_contact(&accepted).await {
                        Ok(updates) => report.diploma_updates.extend(updates),
                        Err(CoreError::PersistenceTimeout(_)) => {
                            // the contact stands but its scoring did not
                            // finish; recompute repairs the gap
                            report.resume_from = Some(i + 1);
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(AcceptOutcome::Duplicate) => {
                    // lost a race with a concurrent submission
                    report.duplicate_count += 1;
                }
                Err(CoreError::PersistenceTimeout(_)) => {
                    report.resume_from = Some(i);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        log::info!(
            "import for user {}: {} records, {} accepted, {} duplicates, {} warnings{}",
            user,
            record_count,
            report.accepted_count,
            report.duplicate_count,
            report.warnings.len(),
            if report.resume_from.is_some() {
                " (partial)"
            } else {
                ""
            }
        );
        Ok(report)
    }
}
