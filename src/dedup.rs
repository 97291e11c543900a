// Deduplication engine
//
// Uniqueness is scoped per user: two users logging the same real-world QSO
// each keep their own copy. The read path (classify) never writes; the
// accept path is a single conditional insert so racing submissions settle
// on exactly one winner per fingerprint.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;

use crate::error::CoreError;
use crate::model::{AcceptedContact, ContactRecord, UserId};
use crate::store::{InsertOutcome, Store};

/// Dedup key: lowercase callsign, UTC date, time truncated to the minute,
/// band, mode, bunker reference. Same fingerprint for the same user means
/// the same logical QSO.
pub fn fingerprint(
    callsign: &str,
    worked_at: &DateTime<Utc>,
    band: &str,
    mode: &str,
    bunker_ref: &str,
) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        callsign.trim().to_lowercase(),
        worked_at.format("%Y%m%d%H%M"),
        band.trim().to_lowercase(),
        mode.trim().to_uppercase(),
        bunker_ref.trim().to_uppercase(),
    )
}

/// Outcome of classifying a batch against prior submissions.
#[derive(Debug, Default)]
pub struct Classified {
    /// Contacts not seen before, file order preserved.
    pub fresh: Vec<ContactRecord>,
    /// Contacts already on file, with the fingerprint they matched.
    pub duplicates: Vec<(ContactRecord, String)>,
}

/// Split a parsed batch into new contacts and duplicates without mutating
/// any state. Repeats within the batch itself count as duplicates too.
pub async fn classify<S: Store>(
    store: &S,
    user: UserId,
    contacts: Vec<ContactRecord>,
    store_timeout: Duration,
) -> Result<Classified, CoreError> {
    let mut seen = timeout(store_timeout, store.fingerprints_for_user(user))
        .await
        .map_err(|_| CoreError::PersistenceTimeout(store_timeout))??;

    let mut classified = Classified::default();
    for contact in contacts {
        if seen.insert(contact.fingerprint.clone()) {
            classified.fresh.push(contact);
        } else {
            let fp = contact.fingerprint.clone();
            classified.duplicates.push((contact, fp));
        }
    }
    Ok(classified)
}

/// Result of the atomic accept step.
#[derive(Debug)]
pub enum AcceptOutcome {
    Accepted(AcceptedContact),
    /// Lost the conditional insert: someone else holds this fingerprint.
    Duplicate,
}

/// Accept one contact through the fingerprint-conditional insert.
pub async fn accept_contact<S: Store>(
    store: &S,
    user: UserId,
    contact: ContactRecord,
    store_timeout: Duration,
) -> Result<AcceptOutcome, CoreError> {
    let accepted = AcceptedContact::new(user, contact, Utc::now());
    let outcome = timeout(store_timeout, store.insert_contact_if_new(&accepted))
        .await
        .map_err(|_| CoreError::PersistenceTimeout(store_timeout))??;
    match outcome {
        InsertOutcome::Inserted => Ok(AcceptOutcome::Accepted(accepted)),
        InsertOutcome::AlreadyPresent => Ok(AcceptOutcome::Duplicate),
    }
}
