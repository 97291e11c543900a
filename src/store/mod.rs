// Persistence gateway
//
// The narrow interface the engine uses to read and write durable state.
// The three contended writes (fingerprint insert, progress save, spot
// expiry) are all single conditional statements, never read-then-write.

pub mod sqlite;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{
    AcceptedContact, Bunker, DiplomaProgress, DiplomaType, Spot, UserId,
};

pub use sqlite::SqliteStore;

/// Outcome of the fingerprint-conditional contact insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another submission already holds this (user, fingerprint) pair.
    AlreadyPresent,
}

#[allow(async_fn_in_trait)]
pub trait Store {
    // -- accepted contacts -------------------------------------------------

    /// Insert unless a contact with the same (user, fingerprint) exists.
    /// This is the atomic accept step: exactly one of two racing
    /// submissions sees `Inserted`.
    async fn insert_contact_if_new(
        &self,
        contact: &AcceptedContact,
    ) -> Result<InsertOutcome, CoreError>;

    async fn fingerprints_for_user(&self, user: UserId) -> Result<HashSet<String>, CoreError>;

    async fn accepted_contacts(&self, user: UserId) -> Result<Vec<AcceptedContact>, CoreError>;

    // -- bunkers and diploma configuration (plain reads) -------------------

    async fn bunker_by_ref(&self, reference: &str) -> Result<Option<Bunker>, CoreError>;

    async fn upsert_bunker(&self, bunker: &Bunker) -> Result<(), CoreError>;

    async fn diploma_types(&self) -> Result<Vec<DiplomaType>, CoreError>;

    async fn upsert_diploma_type(&self, diploma: &DiplomaType) -> Result<(), CoreError>;

    // -- diploma progress --------------------------------------------------

    async fn load_progress(
        &self,
        user: UserId,
        diploma_id: i64,
    ) -> Result<Option<DiplomaProgress>, CoreError>;

    async fn progress_rows(&self, user: UserId) -> Result<Vec<DiplomaProgress>, CoreError>;

    /// Conditional save: succeeds only when the stored version still equals
    /// `row.version` (or the row is absent and `row.version` is 0).
    /// Returns false when the write lost a race and must be retried.
    async fn save_progress(&self, row: &DiplomaProgress) -> Result<bool, CoreError>;

    // -- spots -------------------------------------------------------------

    async fn insert_spot(&self, spot: &Spot) -> Result<(), CoreError>;

    /// Active, unexpired spot for (activator, bunker) whose frequency is
    /// within `tolerance_mhz` of `freq_mhz`, if any. A missing frequency on
    /// either side matches anything. Used by the re-spot path.
    async fn find_active_spot(
        &self,
        activator_callsign: &str,
        bunker_ref: &str,
        freq_mhz: Option<f64>,
        tolerance_mhz: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<Spot>, CoreError>;

    /// Refresh an active spot in place: new expiry, optional new frequency
    /// and comment, respot counter bumped. Returns false if the spot is no
    /// longer active.
    async fn touch_spot(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
        freq_mhz: Option<f64>,
        comment: &str,
    ) -> Result<bool, CoreError>;

    /// Active spots whose expiry has not passed, newest first.
    async fn list_active_spots(&self, now: DateTime<Utc>) -> Result<Vec<Spot>, CoreError>;

    /// Ids of active spots whose expiry timestamp has passed.
    async fn due_spots(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, CoreError>;

    /// Claim-if-still-active transition: atomically mark the spot expired
    /// and write its history record. Returns false when some other sweep
    /// (or a manual cancel) already claimed it.
    async fn expire_spot(&self, id: Uuid, expired_at: DateTime<Utc>) -> Result<bool, CoreError>;

    async fn spot_history_count(&self, bunker_ref: &str) -> Result<i64, CoreError>;
}
