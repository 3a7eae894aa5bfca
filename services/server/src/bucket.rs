//! Gradual-rollout bucketing.

use uuid::Uuid;

/// Deterministic 0-99 bucket for a printer.
///
/// The MD5 of the hyphenated lowercase UUID string, read as a big-endian
/// 128-bit integer, modulo 100.  Depends only on the printer id, so bucket
/// membership is stable across reconnects and server restarts.
#[must_use]
pub fn bucket(printer_id: Uuid) -> u8 {
    let digest = md5::compute(printer_id.to_string().as_bytes());
    (u128::from_be_bytes(digest.0) % 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_a_fixed_uuid() {
        let id = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert_eq!(bucket(id), bucket(id));
    }

    #[test]
    fn always_below_one_hundred() {
        for _ in 0..256 {
            assert!(bucket(Uuid::new_v4()) < 100);
        }
    }

    #[test]
    fn distinct_uuids_spread_across_buckets() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..512 {
            seen.insert(bucket(Uuid::new_v4()));
        }
        // 512 draws over 100 buckets; a handful of distinct values proves
        // the hash is not collapsing.
        assert!(seen.len() > 20);
    }
}
