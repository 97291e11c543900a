// Amateur radio band definitions
// Reference: ARRL Band Plan and ADIF 3.1.4 Specification

/// Returns the ADIF band name for a given frequency in MHz.
pub fn freq_to_band(freq_mhz: f64) -> Option<&'static str> {
    match freq_mhz {
        // HF bands
        f if (1.8..=2.0).contains(&f) => Some("160m"),
        f if (3.5..=4.0).contains(&f) => Some("80m"),
        f if (5.0..=5.5).contains(&f) => Some("60m"),
        f if (7.0..=7.3).contains(&f) => Some("40m"),
        f if (10.1..=10.15).contains(&f) => Some("30m"),
        f if (14.0..=14.35).contains(&f) => Some("20m"),
        f if (18.068..=18.168).contains(&f) => Some("17m"),
        f if (21.0..=21.45).contains(&f) => Some("15m"),
        f if (24.89..=24.99).contains(&f) => Some("12m"),
        f if (28.0..=29.7).contains(&f) => Some("10m"),
        // VHF/UHF bands
        f if (50.0..=54.0).contains(&f) => Some("6m"),
        f if (144.0..=148.0).contains(&f) => Some("2m"),
        f if (420.0..=450.0).contains(&f) => Some("70cm"),
        _ => None,
    }
}

/// Normalize an ADIF BAND value to the lowercase form used in fingerprints
/// and award keys ("40M" -> "40m").
pub fn normalize_band(band: &str) -> String {
    band.trim().to_lowercase()
}
