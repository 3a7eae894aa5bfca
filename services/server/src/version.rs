//! Firmware version ordering.
//!
//! Versions on the wire are dotted numeric triples (`1.5.0`), but old
//! firmware builds occasionally announce two components or a `v` prefix.

use semver::Version;

/// Parse a dotted numeric version, padding missing components
/// (`1.4` -> `1.4.0`).  Returns `None` for anything non-numeric.
#[must_use]
pub fn parse(raw: &str) -> Option<Version> {
    let s = raw.trim().trim_start_matches('v');
    if let Ok(v) = Version::parse(s) {
        return Some(v);
    }
    let parts: Vec<&str> = s.split('.').collect();
    if parts.is_empty()
        || parts.len() > 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }
    let mut padded = parts;
    while padded.len() < 3 {
        padded.push("0");
    }
    Version::parse(&padded.join(".")).ok()
}

/// Lenient parse for stored printer versions; unparseable means the printer
/// has never reported one and sorts below everything (`0.0.0`).
#[must_use]
pub fn parse_or_zero(raw: &str) -> Version {
    parse(raw).unwrap_or_else(|| Version::new(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triples_parse_and_order() {
        let a = parse("1.0.0").unwrap();
        let b = parse("1.5.0").unwrap();
        let c = parse("1.10.0").unwrap();
        assert!(a < b);
        assert!(b < c, "components compare numerically, not lexically");
    }

    #[test]
    fn short_and_prefixed_forms_pad_out() {
        assert_eq!(parse("1.4").unwrap(), Version::new(1, 4, 0));
        assert_eq!(parse("2").unwrap(), Version::new(2, 0, 0));
        assert_eq!(parse("v1.2.3").unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn junk_is_rejected_or_zeroed() {
        assert!(parse("").is_none());
        assert!(parse("abc").is_none());
        assert!(parse("1..2").is_none());
        assert!(parse("1.2.3.4").is_none());
        assert_eq!(parse_or_zero("unknown"), Version::new(0, 0, 0));
    }
}
