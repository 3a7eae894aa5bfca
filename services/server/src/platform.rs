//! Printer platform names.
//!
//! Stored values are always the canonical dashed lowercase form
//! (`esp32-c3`); firmware lookups widen to the variants printers announce
//! (`esp32c3`, `esp32_c3`).

/// Canonicalize an announced platform string.
///
/// Lowercases, maps underscores to dashes, and re-inserts the dash into
/// fused ESP32-family suffixes (`esp32c3` -> `esp32-c3`).  Unknown families
/// pass through in dashed lowercase form.
#[must_use]
pub fn canonicalize(raw: &str) -> String {
    let mut platform = raw.trim().to_ascii_lowercase().replace('_', "-");
    if let Some(suffix) = platform.strip_prefix("esp32") {
        if !suffix.is_empty() && !suffix.starts_with('-') {
            platform = format!("esp32-{suffix}");
        }
    }
    platform
}

/// All accepted spellings of a canonical platform, canonical form first.
#[must_use]
pub fn variants(canonical: &str) -> Vec<String> {
    let mut out = vec![canonical.to_owned()];
    for variant in [canonical.replace('-', ""), canonical.replace('-', "_")] {
        if !out.contains(&variant) {
            out.push(variant);
        }
    }
    out
}
