// Diploma progress calculator
//
// Counting is idempotent: a contact only moves a progress row when its
// qualifying key is not already in the row's counted-key set, so replaying
// the full contact history in any order lands on the same state as the
// incremental updates did. Row saves are versioned conditional writes;
// lost races reload and reapply up to the configured retry bound.

use chrono::Utc;
use serde::Serialize;
use tokio::time::timeout;

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::model::{AcceptedContact, DiplomaProgress, DiplomaType, UserId};
use crate::store::Store;

/// One diploma touched by an accepted contact.
#[derive(Debug, Clone, Serialize)]
pub struct DiplomaUpdate {
    pub diploma_id: i64,
    pub diploma_name: String,
    pub count: u32,
    pub newly_completed: bool,
}

pub struct ProgressCalculator<'a, S: Store> {
    store: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: Store> ProgressCalculator<'a, S> {
    pub fn new(store: &'a S, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Update every diploma whose rule the contact satisfies. Returns the
    /// rows that actually moved.
    pub async fn apply_contact(
        &self,
        contact: &AcceptedContact,
    ) -> Result<Vec<DiplomaUpdate>, CoreError> {
        let diplomas = self.with_timeout(self.store.diploma_types()).await?;
        let mut updates = Vec::new();

        for diploma in &diplomas {
            let Some(key) = diploma.rule.qualifying_key(&contact.contact) else {
                continue;
            };
            if let Some(update) = self
                .count_key(contact.user_id, diploma, &key)
                .await?
            {
                updates.push(update);
            }
        }
        Ok(updates)
    }

    /// Add one qualifying key to a progress row through the conditional
    /// save, retrying lost races. None means the key was already counted.
    async fn count_key(
        &self,
        user: UserId,
        diploma: &DiplomaType,
        key: &str,
    ) -> Result<Option<DiplomaUpdate>, CoreError> {
        let mut attempts = 0;
        loop {
            let mut row = self
                .with_timeout(self.store.load_progress(user, diploma.id))
                .await?
                .unwrap_or_else(|| DiplomaProgress::new(user, diploma.id, Utc::now()));

            if row.counted_keys.contains(key) {
                return Ok(None);
            }

            row.counted_keys.insert(key.to_string());
            row.count = row.counted_keys.len() as u32;
            let newly_completed = !row.completed && row.count >= diploma.rule.threshold();
            if newly_completed {
                row.completed = true;
            }
            row.updated_at = Utc::now();

            if self.with_timeout(self.store.save_progress(&row)).await? {
                if newly_completed {
                    log::info!(
                        "user {} completed diploma '{}' at count {}",
                        user,
                        diploma.name,
                        row.count
                    );
                }
                return Ok(Some(DiplomaUpdate {
                    diploma_id: diploma.id,
                    diploma_name: diploma.name.clone(),
                    count: row.count,
                    newly_completed,
                }));
            }

            attempts += 1;
            if attempts > self.config.conflict_retries {
                return Err(CoreError::PersistenceConflict(attempts));
            }
            log::debug!(
                "progress save conflict for user {} diploma {}, retry {}",
                user,
                diploma.id,
                attempts
            );
        }
    }

    /// Rebuild every progress row for a user from the full set of accepted
    /// contacts. Must land on the same state as the incremental updates;
    /// used for repair and verification.
    pub async fn recompute(&self, user: UserId) -> Result<Vec<DiplomaProgress>, CoreError> {
        let contacts = self.with_timeout(self.store.accepted_contacts(user)).await?;
        let diplomas = self.with_timeout(self.store.diploma_types()).await?;
        let mut result = Vec::new();

        for diploma in &diplomas {
            let mut attempts = 0;
            loop {
                let existing = self
                    .with_timeout(self.store.load_progress(user, diploma.id))
                    .await?;
                let mut row = existing
                    .clone()
                    .unwrap_or_else(|| DiplomaProgress::new(user, diploma.id, Utc::now()));

                row.counted_keys = contacts
                    .iter()
                    .filter_map(|c| diploma.rule.qualifying_key(&c.contact))
                    .collect();
                row.count = row.counted_keys.len() as u32;
                // completion latches; recompute never clears it
                row.completed = row.completed || row.count >= diploma.rule.threshold();
                row.updated_at = Utc::now();

                if row.count == 0 && existing.is_none() {
                    // progress rows are created lazily on first qualifying contact
                    break;
                }
                if self.with_timeout(self.store.save_progress(&row)).await? {
                    result.push(row);
                    break;
                }
                attempts += 1;
                if attempts > self.config.conflict_retries {
                    return Err(CoreError::PersistenceConflict(attempts));
                }
            }
        }
        Ok(result)
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        timeout(self.config.store_timeout, call)
            .await
            .map_err(|_| CoreError::PersistenceTimeout(self.config.store_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::fingerprint;
    use crate::model::{ContactRecord, DiplomaRule};
    use crate::store::SqliteStore;
    use chrono::TimeZone;

    fn accepted(user: UserId, callsign: &str, bunker: &str, minute: u32) -> AcceptedContact {
        let worked_at = Utc.with_ymd_and_hms(2026, 3, 14, 15, minute, 0).unwrap();
        let contact = ContactRecord {
            callsign: callsign.to_string(),
            worked_at,
            band: "40m".to_string(),
            mode: "SSB".to_string(),
            rst_sent: None,
            rst_rcvd: None,
            freq_mhz: None,
            bunker_ref: bunker.to_string(),
            b2b: false,
            fingerprint: fingerprint(callsign, &worked_at, "40m", "SSB", bunker),
        };
        AcceptedContact::new(user, contact, worked_at)
    }

    async fn store_with_activator_diploma() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .upsert_diploma_type(&DiplomaType {
                id: 1,
                name: "Activator Bronze".to_string(),
                rule: DiplomaRule::DistinctBunkers { threshold: 3 },
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_three_distinct_bunkers_complete() {
        let store = store_with_activator_diploma().await;
        let config = EngineConfig::default();
        let calc = ProgressCalculator::new(&store, &config);

        // bunkers A, B, A, C - the repeat must not move the count
        let seq = [
            ("B/SP-0001", 10),
            ("B/SP-0002", 20),
            ("B/SP-0001", 30),
            ("B/SP-0003", 40),
        ];
        let mut completions = Vec::new();
        for (bunker, minute) in seq {
            let updates = calc
                .apply_contact(&accepted(1, "DL1AB", bunker, minute))
                .await
                .unwrap();
            completions.push(updates.iter().any(|u| u.newly_completed));
        }

        // completed on the C contact, not on the second A
        assert_eq!(completions, vec![false, false, false, true]);

        let row = store.load_progress(1, 1).await.unwrap().unwrap();
        assert_eq!(row.count, 3);
        assert!(row.completed);
        assert_eq!(row.count as usize, row.counted_keys.len());
    }

    #[tokio::test]
    async fn test_completion_reported_once() {
        let store = store_with_activator_diploma().await;
        let config = EngineConfig::default();
        let calc = ProgressCalculator::new(&store, &config);

        for (i, bunker) in ["B/SP-0001", "B/SP-0002", "B/SP-0003", "B/SP-0004"]
            .iter()
            .enumerate()
        {
            let updates = calc
                .apply_contact(&accepted(1, "DL1AB", bunker, i as u32))
                .await
                .unwrap();
            let newly = updates.iter().any(|u| u.newly_completed);
            assert_eq!(newly, i == 2, "completion must fire exactly on the third");
        }
    }

    #[tokio::test]
    async fn test_order_independence() {
        let contacts = [
            ("DL1AB", "B/SP-0001", 10),
            ("G4CD", "B/SP-0002", 20),
            ("F5EF", "B/SP-0001", 30),
            ("OK2GH", "B/SP-0003", 40),
        ];
        let orderings: [[usize; 4]; 3] = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]];

        let mut results = Vec::new();
        for order in orderings {
            let store = store_with_activator_diploma().await;
            let config = EngineConfig::default();
            let calc = ProgressCalculator::new(&store, &config);
            for i in order {
                let (call, bunker, minute) = contacts[i];
                calc.apply_contact(&accepted(1, call, bunker, minute))
                    .await
                    .unwrap();
            }
            let row = store.load_progress(1, 1).await.unwrap().unwrap();
            results.push((row.count, row.counted_keys.clone(), row.completed));
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[tokio::test]
    async fn test_recompute_matches_incremental() {
        let store = store_with_activator_diploma().await;
        store
            .upsert_diploma_type(&DiplomaType {
                id: 2,
                name: "Hunter 40m".to_string(),
                rule: DiplomaRule::DistinctBunkersPerBand {
                    band: "40m".to_string(),
                    threshold: 10,
                },
            })
            .await
            .unwrap();
        let config = EngineConfig::default();
        let calc = ProgressCalculator::new(&store, &config);

        for (i, (call, bunker)) in [
            ("DL1AB", "B/SP-0001"),
            ("G4CD", "B/SP-0002"),
            ("F5EF", "B/SP-0003"),
        ]
        .iter()
        .enumerate()
        {
            let c = accepted(1, call, bunker, i as u32);
            store.insert_contact_if_new(&c).await.unwrap();
            calc.apply_contact(&c).await.unwrap();
        }

        let incremental = store.progress_rows(1).await.unwrap();
        let recomputed = calc.recompute(1).await.unwrap();
        assert_eq!(incremental.len(), recomputed.len());
        for (a, b) in incremental.iter().zip(&recomputed) {
            assert_eq!(a.count, b.count);
            assert_eq!(a.counted_keys, b.counted_keys);
            assert_eq!(a.completed, b.completed);
        }
    }
}
