// ADIF log parser
//
// Turns raw log text into ContactRecord values plus per-record warnings.
// Pure function of its input: no persistence, same text always yields the
// same records. A bad record is skipped and reported with its 1-based
// index; the whole file fails only when nothing in it looks like ADIF.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use super::bands::{freq_to_band, normalize_band};
use super::modes::normalize_mode;
use crate::dedup::fingerprint;
use crate::error::CoreError;
use crate::model::{is_bunker_reference, ContactRecord};

/// One skipped record: which record (1-based, in file order) and why.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ParseWarning {
    pub index: usize,
    pub reason: String,
}

/// Result of parsing one uploaded log.
#[derive(Debug, Clone)]
pub struct ParsedLog {
    /// Header fields (before <EOH>), uppercase keys.
    pub header: HashMap<String, String>,
    /// Valid contacts in file order.
    pub contacts: Vec<ContactRecord>,
    pub warnings: Vec<ParseWarning>,
}

/// Parse raw ADIF text into contacts and warnings.
pub fn parse_log(content: &str) -> Result<ParsedLog, CoreError> {
    let mut header = HashMap::new();
    let mut markers_found = false;

    // Split off the header, if any
    let body_start = match find_marker(content, 0, "<EOH>") {
        Some(pos) => {
            markers_found = true;
            parse_fields_into(&content[..pos], &mut header);
            pos + 5
        }
        None => 0,
    };
    let body = &content[body_start..];

    // Split the body on <EOR>. A trailing segment without the marker is
    // still treated as a record if it carries any fields.
    let mut raw_records: Vec<HashMap<String, String>> = Vec::new();
    let mut pos = 0;
    while let Some(eor) = find_marker(body, pos, "<EOR>") {
        markers_found = true;
        push_record(&body[pos..eor], &mut raw_records);
        pos = eor + 5;
    }
    push_record(&body[pos..], &mut raw_records);

    if raw_records.is_empty() && header.is_empty() && !markers_found {
        return Err(CoreError::Parse(
            "no ADIF fields or record markers found".to_string(),
        ));
    }

    // One bunker per uploaded log: a reference found in any record backfills
    // records that omit the program tag.
    let file_bunker = raw_records
        .iter()
        .filter_map(|r| r.get("MY_SIG_INFO"))
        .map(|v| v.trim().to_uppercase())
        .find(|v| is_bunker_reference(v));

    let mut contacts = Vec::new();
    let mut warnings = Vec::new();
    for (i, raw) in raw_records.iter().enumerate() {
        match build_contact(raw, file_bunker.as_deref()) {
            Ok(contact) => contacts.push(contact),
            Err(reason) => warnings.push(ParseWarning {
                index: i + 1,
                reason,
            }),
        }
    }

    Ok(ParsedLog {
        header,
        contacts,
        warnings,
    })
}

fn push_record(text: &str, records: &mut Vec<HashMap<String, String>>) {
    if text.trim().is_empty() {
        return;
    }
    let mut fields = HashMap::new();
    parse_fields_into(text, &mut fields);
    if !fields.is_empty() {
        records.push(fields);
    }
}

fn build_contact(
    raw: &HashMap<String, String>,
    file_bunker: Option<&str>,
) -> Result<ContactRecord, String> {
    let callsign = raw
        .get("CALL")
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .ok_or("missing callsign")?;

    let date = raw.get("QSO_DATE").ok_or("missing date")?;
    let time = raw.get("TIME_ON").ok_or("missing time")?;
    let worked_at = parse_datetime_utc(date, time).ok_or("invalid date/time")?;

    let freq_mhz = raw.get("FREQ").and_then(|f| f.trim().parse::<f64>().ok());
    let band = match raw.get("BAND").map(|b| normalize_band(b)) {
        Some(b) if !b.is_empty() => b,
        _ => match freq_mhz {
            Some(f) => freq_to_band(f).ok_or("unrecognized frequency")?.to_string(),
            None => return Err("missing band".to_string()),
        },
    };

    let mode = raw
        .get("MODE")
        .map(|m| normalize_mode(m))
        .filter(|m| !m.is_empty())
        .ok_or("missing mode")?;

    let bunker_ref = raw
        .get("MY_SIG_INFO")
        .map(|v| v.trim().to_uppercase())
        .filter(|v| is_bunker_reference(v))
        .or_else(|| file_bunker.map(str::to_string))
        .ok_or("missing bunker reference")?;

    let b2b = raw
        .get("SIG")
        .is_some_and(|s| s.trim().eq_ignore_ascii_case("WWBOTA"))
        && raw
            .get("SIG_INFO")
            .is_some_and(|v| is_bunker_reference(&v.trim().to_uppercase()));

    let fp = fingerprint(&callsign, &worked_at, &band, &mode, &bunker_ref);

    Ok(ContactRecord {
        callsign,
        worked_at,
        band,
        mode,
        rst_sent: raw.get("RST_SENT").map(|s| s.trim().to_string()),
        rst_rcvd: raw.get("RST_RCVD").map(|s| s.trim().to_string()),
        freq_mhz,
        bunker_ref,
        b2b,
        fingerprint: fp,
    })
}

/// QSO_DATE is YYYYMMDD; TIME_ON is HHMMSS or HHMM (padded with zeros).
/// Ham logs are UTC by convention.
fn parse_datetime_utc(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = date.trim();
    let mut time = time.trim().to_string();
    if time.len() == 4 {
        time.push_str("00");
    }
    let d = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let t = NaiveTime::parse_from_str(&time, "%H%M%S").ok()?;
    Some(d.and_time(t).and_utc())
}

/// Find `marker` (e.g. "<EOR>") case-insensitively at or after `from`.
fn find_marker(haystack: &str, from: usize, marker: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let m = marker.as_bytes();
    if h.len() < m.len() {
        return None;
    }
    (from..=h.len() - m.len()).find(|&i| h[i..i + m.len()].eq_ignore_ascii_case(m))
}

/// Parse ADIF fields from a text section into a map (uppercase keys).
/// Field spec is NAME:LENGTH or NAME:LENGTH:TYPE; bare names (<EOH>, <EOR>)
/// are skipped.
fn parse_fields_into(content: &str, map: &mut HashMap<String, String>) {
    let bytes = content.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos..].iter().position(|&b| b == b'<') {
            Some(offset) => pos += offset + 1,
            None => break,
        }

        let field_end = match bytes[pos..].iter().position(|&b| b == b'>') {
            Some(offset) => pos + offset,
            None => break,
        };

        let field_spec = &content[pos..field_end];
        pos = field_end + 1;

        let mut parts = field_spec.split(':');
        let field_name = match parts.next() {
            Some(name) if !name.is_empty() => name.to_uppercase(),
            _ => continue,
        };
        if field_name == "EOH" || field_name == "EOR" {
            continue;
        }

        let length: usize = parts.next().and_then(|l| l.parse().ok()).unwrap_or(0);
        if length == 0 {
            map.insert(field_name, String::new());
            continue;
        }
        // ADIF lengths count characters, not bytes; a declared length that
        // overruns the remaining input drops the field.
        if let Some((offset, last)) = content[pos..].char_indices().nth(length - 1) {
            let value_end = pos + offset + last.len_utf8();
            map.insert(field_name, content[pos..value_end].trim().to_string());
            pos = value_end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_LOG: &str = "\
<CALL:6>SP5XYZ<QSO_DATE:8>20260314<TIME_ON:4>1526<BAND:3>40M<MODE:3>SSB<MY_SIG_INFO:9>B/SP-0039<EOR>\n\
<CALL:5>DL1AB<QSO_DATE:8>20260314<TIME_ON:6>153102<BAND:3>40M<MODE:2>CW<MY_SIG_INFO:9>B/SP-0039<EOR>\n";

    #[test]
    fn test_parse_simple_log() {
        let parsed = parse_log(SIMPLE_LOG).unwrap();
        assert_eq!(parsed.contacts.len(), 2);
        assert!(parsed.warnings.is_empty());

        let c = &parsed.contacts[0];
        assert_eq!(c.callsign, "SP5XYZ");
        assert_eq!(c.band, "40m");
        assert_eq!(c.mode, "SSB");
        assert_eq!(c.bunker_ref, "B/SP-0039");
        assert_eq!(c.worked_at.format("%Y%m%d %H%M%S").to_string(), "20260314 152600");
    }

    #[test]
    fn test_parse_is_deterministic() {
        let a = parse_log(SIMPLE_LOG).unwrap();
        let b = parse_log(SIMPLE_LOG).unwrap();
        assert_eq!(a.contacts, b.contacts);
        assert_eq!(a.warnings, b.warnings);
    }

    #[test]
    fn test_missing_callsign_reported_with_index() {
        let adif = "\
<CALL:6>SP5XYZ<QSO_DATE:8>20260314<TIME_ON:4>1526<BAND:3>40M<MODE:3>SSB<MY_SIG_INFO:9>B/SP-0039<EOR>\n\
<CALL:5>DL1AB<QSO_DATE:8>20260314<TIME_ON:4>1530<BAND:3>40M<MODE:3>SSB<MY_SIG_INFO:9>B/SP-0039<EOR>\n\
<CALL:4>G4CD<QSO_DATE:8>20260314<TIME_ON:4>1535<BAND:3>40M<MODE:3>SSB<MY_SIG_INFO:9>B/SP-0039<EOR>\n\
<QSO_DATE:8>20260314<TIME_ON:4>1540<BAND:3>40M<MODE:3>SSB<MY_SIG_INFO:9>B/SP-0039<EOR>\n";
        let parsed = parse_log(adif).unwrap();
        assert_eq!(parsed.contacts.len(), 3);
        assert_eq!(
            parsed.warnings,
            vec![ParseWarning {
                index: 4,
                reason: "missing callsign".to_string()
            }]
        );
    }

    #[test]
    fn test_malformed_datetime_skipped() {
        let adif = "<CALL:6>SP5XYZ<QSO_DATE:8>2026AB14<TIME_ON:4>1526<BAND:3>40M\
<MODE:3>SSB<MY_SIG_INFO:9>B/SP-0039<EOR>";
        let parsed = parse_log(adif).unwrap();
        assert!(parsed.contacts.is_empty());
        assert_eq!(parsed.warnings[0].reason, "invalid date/time");
    }

    #[test]
    fn test_band_derived_from_frequency() {
        let adif = "<CALL:6>SP5XYZ<QSO_DATE:8>20260314<TIME_ON:4>1526<FREQ:5>7.074\
<MODE:3>FT8<MY_SIG_INFO:9>B/SP-0039<EOR>";
        let parsed = parse_log(adif).unwrap();
        assert_eq!(parsed.contacts[0].band, "40m");
        assert_eq!(parsed.contacts[0].freq_mhz, Some(7.074));
    }

    #[test]
    fn test_file_bunker_backfills_records() {
        let adif = "\
<CALL:6>SP5XYZ<QSO_DATE:8>20260314<TIME_ON:4>1526<BAND:3>40M<MODE:3>SSB<MY_SIG_INFO:9>B/SP-0039<EOR>\n\
<CALL:5>DL1AB<QSO_DATE:8>20260314<TIME_ON:4>1530<BAND:3>40M<MODE:3>SSB<EOR>\n";
        let parsed = parse_log(adif).unwrap();
        assert_eq!(parsed.contacts.len(), 2);
        assert_eq!(parsed.contacts[1].bunker_ref, "B/SP-0039");
    }

    #[test]
    fn test_b2b_detected() {
        let adif = "<CALL:6>SP5XYZ<QSO_DATE:8>20260314<TIME_ON:4>1526<BAND:3>40M<MODE:3>SSB\
<MY_SIG_INFO:9>B/SP-0039<SIG:6>WWBOTA<SIG_INFO:9>B/DL-0007<EOR>";
        let parsed = parse_log(adif).unwrap();
        assert!(parsed.contacts[0].b2b);
    }

    #[test]
    fn test_header_parsed_and_kept() {
        let adif = "<PROGRAMID:4>BOTA<OPERATOR:6>SP9BOT<EOH>\n\
<CALL:6>SP5XYZ<QSO_DATE:8>20260314<TIME_ON:4>1526<BAND:3>40M<MODE:3>SSB<MY_SIG_INFO:9>B/SP-0039<EOR>";
        let parsed = parse_log(adif).unwrap();
        assert_eq!(parsed.header.get("OPERATOR"), Some(&"SP9BOT".to_string()));
        assert_eq!(parsed.contacts.len(), 1);
    }

    #[test]
    fn test_unrecognizable_input_fails() {
        assert!(matches!(
            parse_log("this is not an adif file at all"),
            Err(CoreError::Parse(_))
        ));
    }

    #[test]
    fn test_multibyte_field_value_counted_in_chars() {
        // COMMENT is 3 characters but 6 bytes; the fields after it must
        // still be picked up
        let adif = "<CALL:6>SP5XYZ<QSO_DATE:8>20260314<TIME_ON:4>1526<BAND:3>40M\
<COMMENT:3>żół<MODE:3>SSB<MY_SIG_INFO:9>B/SP-0039<EOR>";
        let parsed = parse_log(adif).unwrap();
        assert_eq!(parsed.contacts.len(), 1);
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.contacts[0].mode, "SSB");
        assert_eq!(parsed.contacts[0].bunker_ref, "B/SP-0039");
    }

    #[test]
    fn test_overlong_declared_length_drops_field_only() {
        let adif = "<CALL:6>SP5XYZ<QSO_DATE:8>20260314<TIME_ON:4>1526<BAND:3>40M\
<MODE:3>SSB<MY_SIG_INFO:9>B/SP-0039<EOR><COMMENT:99>short";
        let parsed = parse_log(adif).unwrap();
        assert_eq!(parsed.contacts.len(), 1);
    }

    #[test]
    fn test_unknown_fields_ignored_not_rejected() {
        let adif = "<CALL:6>SP5XYZ<QSO_DATE:8>20260314<TIME_ON:4>1526<BAND:3>40M<MODE:3>SSB\
<MY_SIG_INFO:9>B/SP-0039<GRIDSQUARE:4>JO91<TX_PWR:3>100<EOR>";
        let parsed = parse_log(adif).unwrap();
        assert_eq!(parsed.contacts.len(), 1);
        assert!(parsed.warnings.is_empty());
    }
}
