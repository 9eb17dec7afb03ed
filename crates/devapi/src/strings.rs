//! Bounded byte-string search.
//!
//! Request bytes arrive in arbitrary fragments and are never terminated, so every
//! search here is limited to the slice it is given and treats embedded zero bytes
//! as ordinary data.

use std::cmp::Ordering;

/// Returns the offset of the first occurrence of `needle` in `haystack`.
///
/// An empty needle matches at offset 0.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Case-insensitive (ASCII) variant of [`find`].
pub fn find_ci(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window.eq_ignore_ascii_case(needle))
}

/// Compares at most `n` bytes of `a` and `b` ignoring ASCII case.
///
/// The end of a slice compares like a terminating zero byte, and the comparison
/// stops at the first terminator both sides share.
pub fn compare_ci(a: &[u8], b: &[u8], n: usize) -> Ordering {
    for i in 0..n {
        let left = a.get(i).map_or(0, u8::to_ascii_lowercase);
        let right = b.get(i).map_or(0, u8::to_ascii_lowercase);
        match left.cmp(&right) {
            Ordering::Equal if left == 0 => return Ordering::Equal,
            Ordering::Equal => {}
            unequal => return unequal,
        }
    }
    Ordering::Equal
}

/// Returns true when `haystack` starts with `prefix`, ignoring ASCII case.
#[inline]
pub fn starts_with_ci(haystack: &[u8], prefix: &[u8]) -> bool {
    haystack.len() >= prefix.len() && compare_ci(haystack, prefix, prefix.len()) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_is_bounded_by_the_slice() {
        let data = b"GET / HTTP/1.1\r\n\r\ntrailing";
        assert_eq!(find(data, b"\r\n\r\n"), Some(14));
        assert_eq!(find(&data[..16], b"\r\n\r\n"), None);
        assert_eq!(find(data, b""), Some(0));
        assert_eq!(find(b"ab", b"abc"), None);
    }

    #[test]
    fn find_sees_past_zero_bytes() {
        assert_eq!(find(b"a\0b\0needle", b"needle"), Some(4));
    }

    #[test]
    fn find_ci_folds_ascii_case() {
        let headers = b"Host: x\r\nCONTENT-length: 10\r\n";
        assert_eq!(find_ci(headers, b"content-length:"), Some(9));
        assert_eq!(find_ci(headers, b"authorization:"), None);
        assert_eq!(find_ci(b"", b""), Some(0));
    }

    #[test]
    fn compare_ci_orders_like_strncasecmp() {
        assert_eq!(compare_ci(b"Basic", b"bASIC", 5), Ordering::Equal);
        assert_eq!(compare_ci(b"abc", b"abd", 3), Ordering::Less);
        assert_eq!(compare_ci(b"abd", b"abc", 2), Ordering::Equal);
        assert_eq!(compare_ci(b"ab", b"abc", 3), Ordering::Less);
        assert_eq!(compare_ci(b"ab", b"ab", 10), Ordering::Equal);
        assert_eq!(compare_ci(b"x", b"y", 0), Ordering::Equal);
    }

    #[test]
    fn starts_with_ci_checks_length() {
        assert!(starts_with_ci(b"Basic dXNlcg==", b"basic "));
        assert!(!starts_with_ci(b"Bas", b"basic "));
    }
}
