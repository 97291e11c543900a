// Domain model for the award engine
//
// ContactRecord is produced by the ADIF parser and immutable once accepted.
// AcceptedContact rows are never deleted; retraction is an administrative
// action outside this core.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = i64;

/// One parsed QSO from an uploaded log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Callsign of the other station, uppercased.
    pub callsign: String,
    /// QSO date/time in UTC.
    pub worked_at: DateTime<Utc>,
    /// Band in lowercase ADIF form, e.g. "40m".
    pub band: String,
    /// Normalized mode, e.g. "SSB", "CW", "FT8".
    pub mode: String,
    pub rst_sent: Option<String>,
    pub rst_rcvd: Option<String>,
    pub freq_mhz: Option<f64>,
    /// Bunker reference being activated, e.g. "B/SP-0039".
    pub bunker_ref: String,
    /// Other station was also at a bunker (SIG=WWBOTA with a valid ref).
    pub b2b: bool,
    /// Dedup key derived from (callsign, date, minute, band, mode, bunker).
    pub fingerprint: String,
}

/// A ContactRecord that passed deduplication and was persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedContact {
    pub id: Uuid,
    pub user_id: UserId,
    pub contact: ContactRecord,
    pub accepted_at: DateTime<Utc>,
}

impl AcceptedContact {
    pub fn new(user_id: UserId, contact: ContactRecord, accepted_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            contact,
            accepted_at,
        }
    }
}

/// Approval status of a bunker site. Lifecycle owned by the admin workflow;
/// read-only here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BunkerStatus {
    Pending,
    Approved,
    Rejected,
}

impl BunkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BunkerStatus::Pending => "pending",
            BunkerStatus::Approved => "approved",
            BunkerStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BunkerStatus::Pending),
            "approved" => Some(BunkerStatus::Approved),
            "rejected" => Some(BunkerStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bunker {
    /// Reference code, e.g. "B/SP-0039".
    pub reference: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: BunkerStatus,
}

/// Check a program reference of the form B/XX-NNNN.
pub fn is_bunker_reference(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 9
        && b[0] == b'B'
        && b[1] == b'/'
        && b[2].is_ascii_uppercase()
        && b[3].is_ascii_uppercase()
        && b[4] == b'-'
        && b[5..9].iter().all(|c| c.is_ascii_digit())
}

/// How qualifying contacts are counted for one diploma.
///
/// Closed set: the visible data model evidences distinct-bunker counts,
/// per-contact point totals and B2B totals; band endorsements and
/// per-bunker hunter counts are the standard award variants of those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiplomaRule {
    /// Distinct bunkers activated.
    DistinctBunkers { threshold: u32 },
    /// Distinct bunkers activated on one specific band.
    DistinctBunkersPerBand { band: String, threshold: u32 },
    /// Total distinct contacts, any bunker.
    TotalContacts { threshold: u32 },
    /// Distinct stations worked from one specific bunker.
    DistinctContactsPerBunker { bunker_ref: String, threshold: u32 },
    /// Total bunker-to-bunker contacts.
    B2bContacts { threshold: u32 },
}

impl DiplomaRule {
    pub fn threshold(&self) -> u32 {
        match self {
            DiplomaRule::DistinctBunkers { threshold }
            | DiplomaRule::DistinctBunkersPerBand { threshold, .. }
            | DiplomaRule::TotalContacts { threshold }
            | DiplomaRule::DistinctContactsPerBunker { threshold, .. }
            | DiplomaRule::B2bContacts { threshold } => *threshold,
        }
    }

    /// The key that makes a contact count once toward this diploma, or None
    /// if the contact does not qualify at all.
    pub fn qualifying_key(&self, contact: &ContactRecord) -> Option<String> {
        match self {
            DiplomaRule::DistinctBunkers { .. } => Some(contact.bunker_ref.clone()),
            DiplomaRule::DistinctBunkersPerBand { band, .. } => {
                if contact.band.eq_ignore_ascii_case(band) {
                    Some(contact.bunker_ref.clone())
                } else {
                    None
                }
            }
            DiplomaRule::TotalContacts { .. } => Some(contact.fingerprint.clone()),
            DiplomaRule::DistinctContactsPerBunker { bunker_ref, .. } => {
                if contact.bunker_ref.eq_ignore_ascii_case(bunker_ref) {
                    Some(contact.callsign.to_lowercase())
                } else {
                    None
                }
            }
            DiplomaRule::B2bContacts { .. } => {
                if contact.b2b {
                    Some(contact.fingerprint.clone())
                } else {
                    None
                }
            }
        }
    }
}

/// A named award definition. Static configuration, read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiplomaType {
    pub id: i64,
    pub name: String,
    pub rule: DiplomaRule,
}

/// Per (user, diploma) progress aggregate.
///
/// Invariant: `count == counted_keys.len()` and the count never decreases.
/// `version` backs the conditional save in the persistence gateway; 0 means
/// the row has never been stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiplomaProgress {
    pub user_id: UserId,
    pub diploma_id: i64,
    pub count: u32,
    pub counted_keys: BTreeSet<String>,
    pub completed: bool,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl DiplomaProgress {
    pub fn new(user_id: UserId, diploma_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            diploma_id,
            count: 0,
            counted_keys: BTreeSet::new(),
            completed: false,
            version: 0,
            updated_at: now,
        }
    }
}

/// State of a live spot. Active -> Expired is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotStatus {
    Active,
    Expired,
}

impl SpotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpotStatus::Active => "active",
            SpotStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SpotStatus::Active),
            "expired" => Some(SpotStatus::Expired),
            _ => None,
        }
    }
}

/// A live activity report: someone is on the air at a bunker right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spot {
    pub id: Uuid,
    /// Submitter (spotter) user.
    pub user_id: UserId,
    /// Station reported active, uppercased.
    pub activator_callsign: String,
    pub bunker_ref: String,
    pub band: String,
    pub mode: String,
    pub freq_mhz: Option<f64>,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Times this spot was refreshed instead of re-created.
    pub respot_count: u32,
    pub status: SpotStatus,
}

/// Archival record written exactly once when a spot expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotHistory {
    pub id: Uuid,
    pub user_id: UserId,
    pub activator_callsign: String,
    pub bunker_ref: String,
    pub band: String,
    pub mode: String,
    pub freq_mhz: Option<f64>,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub respot_count: u32,
    pub expired_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::fingerprint;
    use chrono::TimeZone;

    fn contact(bunker: &str, band: &str, b2b: bool) -> ContactRecord {
        let worked_at = Utc.with_ymd_and_hms(2026, 3, 14, 15, 26, 0).unwrap();
        ContactRecord {
            callsign: "SP5XYZ".to_string(),
            worked_at,
            band: band.to_string(),
            mode: "SSB".to_string(),
            rst_sent: None,
            rst_rcvd: None,
            freq_mhz: None,
            bunker_ref: bunker.to_string(),
            b2b,
            fingerprint: fingerprint("SP5XYZ", &worked_at, band, "SSB", bunker),
        }
    }

    #[test]
    fn test_bunker_reference_format() {
        assert!(is_bunker_reference("B/SP-0039"));
        assert!(is_bunker_reference("B/DL-1234"));
        assert!(!is_bunker_reference("B/sp-0039"));
        assert!(!is_bunker_reference("B/SP-39"));
        assert!(!is_bunker_reference("SP-0039"));
        assert!(!is_bunker_reference(""));
    }

    #[test]
    fn test_distinct_bunkers_key() {
        let rule = DiplomaRule::DistinctBunkers { threshold: 3 };
        let c = contact("B/SP-0001", "40m", false);
        assert_eq!(rule.qualifying_key(&c), Some("B/SP-0001".to_string()));
    }

    #[test]
    fn test_band_rule_filters_other_bands() {
        let rule = DiplomaRule::DistinctBunkersPerBand {
            band: "80m".to_string(),
            threshold: 5,
        };
        assert_eq!(rule.qualifying_key(&contact("B/SP-0001", "40m", false)), None);
        assert!(rule.qualifying_key(&contact("B/SP-0001", "80m", false)).is_some());
    }

    #[test]
    fn test_b2b_rule_requires_flag() {
        let rule = DiplomaRule::B2bContacts { threshold: 10 };
        assert_eq!(rule.qualifying_key(&contact("B/SP-0001", "40m", false)), None);
        assert!(rule.qualifying_key(&contact("B/SP-0001", "40m", true)).is_some());
    }
}
