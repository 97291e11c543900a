// ADIF mode normalization
//
// Fingerprints and award keys compare modes textually, so sideband variants
// collapse to their parent mode before anything else sees them.

/// Normalize a mode string to its canonical ADIF form.
pub fn normalize_mode(mode: &str) -> String {
    let upper = mode.trim().to_uppercase();
    match upper.as_str() {
        // Sideband variants of SSB
        "USB" | "LSB" => "SSB".to_string(),
        // Legacy names for digital modes
        "PSK31" => "PSK".to_string(),
        "JT65A" => "JT65".to_string(),
        _ => upper,
    }
}
