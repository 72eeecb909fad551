//! GID projection: aria2 clients address downloads by 16-hex-digit
//! strings; falcon task ids are integers.

use falcon_core::TaskId;

/// Zero-padded 16-hex-digit projection of a task id.
pub fn to_gid(id: TaskId) -> String {
    format!("{:016x}", id)
}

/// Parses a GID back to a task id. Accepts an optional `0x` prefix;
/// rejects non-hex, overlong, and zero values.
pub fn parse_gid(gid: &str) -> Option<TaskId> {
    let s = gid
        .strip_prefix("0x")
        .or_else(|| gid.strip_prefix("0X"))
        .unwrap_or(gid);
    if s.is_empty() || s.len() > 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match u64::from_str_radix(s, 16) {
        Ok(0) => None,
        Ok(v) => Some(v),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gid_is_sixteen_hex_digits() {
        assert_eq!(to_gid(1), "0000000000000001");
        assert_eq!(to_gid(0xdead_beef), "00000000deadbeef");
        assert_eq!(to_gid(u64::MAX), "ffffffffffffffff");
    }

    #[test]
    fn round_trip_is_identity() {
        for id in [1u64, 42, 6800, u64::MAX / 2, u64::MAX] {
            assert_eq!(parse_gid(&to_gid(id)), Some(id));
        }
    }

    #[test]
    fn distinct_ids_project_to_distinct_gids() {
        assert_ne!(to_gid(1), to_gid(2));
        assert_ne!(to_gid(0x10), to_gid(0x100));
    }

    #[test]
    fn rejects_malformed_gids() {
        assert_eq!(parse_gid(""), None);
        assert_eq!(parse_gid("0000000000000000"), None); // zero id
        assert_eq!(parse_gid("not-hex-not-hex!"), None);
        assert_eq!(parse_gid("12345678901234567"), None); // 17 digits
    }

    #[test]
    fn accepts_hex_prefix() {
        assert_eq!(parse_gid("0x2a"), Some(42));
        assert_eq!(parse_gid("0X2A"), Some(42));
    }
}
