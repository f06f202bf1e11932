#![forbid(unsafe_code)]

//! Fractional ordering keys for sibling blocks.
//!
//! Keys are lowercase-ASCII strings compared lexicographically. Inserting
//! between any two neighbors is O(1): the key deepens (grows by one
//! character) instead of renumbering siblings.

const FIRST: u8 = b'a';
const LAST: u8 = b'z';
const MID: u8 = b'm';
/// One past the largest digit; stands in for +inf once the upper bound
/// stops constraining the walk.
const TOP: u8 = LAST + 1;

/// Key for the first element of an empty sibling list.
pub fn initial() -> String {
    (MID as char).to_string()
}

/// A key strictly between `before` and `after`. An empty `before` means
/// -inf, an empty `after` means +inf. When both are non-empty the caller
/// must pass `before < after`.
pub fn between(before: &str, after: &str) -> String {
    if before.is_empty() && after.is_empty() {
        return initial();
    }
    if before.is_empty() {
        return key_before(after);
    }
    if after.is_empty() {
        return key_after(before);
    }
    debug_assert!(before < after, "between requires before < after");

    let a = before.as_bytes();
    let b = after.as_bytes();
    let mut out = Vec::with_capacity(a.len().max(b.len()) + 1);
    // Once the walk takes the smaller character at a differing position the
    // upper bound no longer constrains the suffix.
    let mut upper_open = false;
    let mut i = 0;
    loop {
        let ca = a.get(i).copied().unwrap_or(FIRST);
        let cb = if upper_open {
            TOP
        } else {
            b.get(i).copied().unwrap_or(TOP)
        };
        if ca == cb {
            out.push(ca);
            i += 1;
            continue;
        }
        let mid = ((u16::from(ca) + u16::from(cb)) / 2) as u8;
        if mid > ca {
            out.push(mid);
            return String::from_utf8(out).unwrap_or_else(|_| initial());
        }
        // Adjacent digits: carry the smaller one and deepen.
        out.push(ca);
        upper_open = true;
        i += 1;
    }
}

/// A key strictly before `pos` (convenience for `between("", pos)`).
pub fn before(pos: &str) -> String {
    if pos.is_empty() {
        return initial();
    }
    key_before(pos)
}

/// A key strictly after `pos` (convenience for `between(pos, "")`).
pub fn after(pos: &str) -> String {
    if pos.is_empty() {
        return initial();
    }
    key_after(pos)
}

fn key_before(pos: &str) -> String {
    let bytes = pos.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + 1);
    for &cb in bytes {
        if cb == FIRST {
            out.push(FIRST);
            continue;
        }
        let mid = ((u16::from(FIRST) + u16::from(cb)) / 2) as u8;
        if mid > FIRST {
            out.push(mid);
            return String::from_utf8(out).unwrap_or_else(|_| initial());
        }
        // cb == 'b': take 'a' and extend so the key does not end in 'a'.
        out.push(FIRST);
        out.push(MID);
        return String::from_utf8(out).unwrap_or_else(|_| initial());
    }
    // All-'a' keys have no predecessor in this alphabet; none of the
    // generators below ever produce one.
    debug_assert!(false, "key_before called with an all-'a' key");
    initial()
}

fn key_after(pos: &str) -> String {
    // Bump the rightmost non-'z' character; an all-'z' key deepens instead.
    let mut bytes = pos.as_bytes().to_vec();
    for i in (0..bytes.len()).rev() {
        if bytes[i] < LAST {
            bytes[i] += 1;
            return String::from_utf8(bytes).unwrap_or_else(|_| initial());
        }
    }
    let mut out = pos.to_string();
    out.push(MID as char);
    out
}

/// True iff the keys are strictly increasing.
pub fn validate_order<S: AsRef<str>>(positions: &[S]) -> bool {
    positions
        .windows(2)
        .all(|w| w[0].as_ref() < w[1].as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_between(a: &str, b: &str) -> String {
        let s = between(a, b);
        assert!(
            (a.is_empty() || a < s.as_str()) && (b.is_empty() || s.as_str() < b),
            "between({a:?}, {b:?}) = {s:?} is not strictly inside"
        );
        s
    }

    #[test]
    fn initial_is_mid() {
        assert_eq!(initial(), "m");
    }

    #[test]
    fn between_basic_cases() {
        assert_eq!(check_between("b", "d"), "c");
        assert_eq!(check_between("a", "b"), "am");
        check_between("am", "b");
        check_between("az", "b");
        check_between("aa", "ab");
        check_between("m", "n");
        check_between("abc", "abd");
        check_between("x", "xb");
    }

    #[test]
    fn before_and_after_stay_ordered() {
        assert!(before("m") < "m".to_string());
        assert!(after("m") > "m".to_string());
        assert!(before("b").as_str() < "b");
        assert!(before("ab").as_str() < "ab");
        assert_eq!(after("zz"), "zzm");
        assert!(after("mz") > "mz".to_string());
    }

    #[test]
    fn repeated_prepends_keep_order() {
        let mut pos = initial();
        let mut all = vec![pos.clone()];
        for _ in 0..64 {
            pos = before(&pos);
            all.push(pos.clone());
        }
        all.reverse();
        assert!(validate_order(&all));
    }

    #[test]
    fn repeated_appends_keep_order() {
        let mut pos = initial();
        let mut all = vec![pos.clone()];
        for _ in 0..64 {
            pos = after(&pos);
            all.push(pos.clone());
        }
        assert!(validate_order(&all));
    }

    #[test]
    fn repeated_bisection_stays_strictly_inside() {
        // Squeeze many keys into the same bracket from both ends.
        let (mut lo, hi) = ("b".to_string(), "c".to_string());
        let mut seen = vec![lo.clone()];
        for _ in 0..64 {
            lo = check_between(&lo, &hi);
            assert!(!seen.contains(&lo), "duplicate key {lo:?}");
            seen.push(lo.clone());
        }
        let (lo2, mut hi2) = ("b".to_string(), "c".to_string());
        for _ in 0..64 {
            hi2 = check_between(&lo2, &hi2);
        }
    }

    #[test]
    fn validate_order_rejects_ties_and_reversals() {
        assert!(validate_order(&["a", "b", "c"]));
        assert!(!validate_order(&["a", "a"]));
        assert!(!validate_order(&["b", "a"]));
        assert!(validate_order(&[] as &[&str]));
        assert!(validate_order(&["m"]));
    }
}
