//! Glob matching and cursor paging for stores without native scans
//!
//! Embedded stores and the ASCII protocol store have no `SCAN`, so the
//! engine pages through their key iterators itself. The cursor is an offset
//! into the sequence of matching keys:
//!
//! - skip `cursor` matches, then collect up to `count`
//! - when the page filled up, `cursor_out = cursor + count`
//! - when the keys ran out first, `cursor_out = 0`
//!
//! The key iterator is never assumed to be sorted.

use std::sync::atomic::{AtomicBool, Ordering};

use kvbridge_core::{Error, Result, ScanPage};

/// Pattern matching every key.
pub const ALL_KEYS_PATTERN: &str = "*";

/// Match `text` against a glob: `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\x`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    match_from(&p, &t)
}

fn match_from(p: &[char], t: &[char]) -> bool {
    let (mut pi, mut ti) = (0, 0);
    // position of the last `*` and the text index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    backtrack = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(p, pi, t[ti]) {
                        if matched {
                            pi = next;
                            ti += 1;
                            continue;
                        }
                    } else if t[ti] == '[' {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c => {
                    if c == t[ti] {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
            }
        }
        match backtrack {
            Some((star, tried)) => {
                pi = star + 1;
                ti = tried + 1;
                backtrack = Some((star, tried + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

/// Match `c` against the class opening at `p[start] == '['`.
///
/// Returns `(matched, index after ']')`, or `None` if the class is unterminated.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(p.get(i), Some('^') | Some('!'));
    if negate {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < p.len() {
        if p[i] == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;
        let lo = if p[i] == '\\' && i + 1 < p.len() {
            i += 1;
            p[i]
        } else {
            p[i]
        };
        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let hi = p[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if lo <= c && c <= hi {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

/// Page through `keys`, honouring the interrupt flag between keys.
///
/// # Errors
///
/// `Interrupted` when the flag is raised mid-scan; `NativeFailure` when the
/// key iterator yields an error.
pub fn scan_keys<I>(
    keys: I,
    cursor: u64,
    pattern: &str,
    count: u64,
    interrupt: &AtomicBool,
) -> Result<ScanPage>
where
    I: IntoIterator<Item = Result<String>>,
{
    let mut page = ScanPage {
        cursor_in: cursor,
        cursor_out: 0,
        keys: Vec::new(),
    };
    if count == 0 {
        return Ok(page);
    }

    let mut offset = cursor;
    for key in keys {
        if interrupt.load(Ordering::Acquire) {
            return Err(Error::Interrupted);
        }
        let key = key?;
        if !glob_match(pattern, &key) {
            continue;
        }
        if offset > 0 {
            offset -= 1;
            continue;
        }
        page.keys.push(key);
        if page.keys.len() as u64 == count {
            page.cursor_out = cursor + count;
            break;
        }
    }
    Ok(page)
}

/// Keys strictly between `start` and `end`, at most `limit` of them.
pub fn keys_in_range<I>(
    keys: I,
    start: &str,
    end: &str,
    limit: u64,
    interrupt: &AtomicBool,
) -> Result<Vec<String>>
where
    I: IntoIterator<Item = Result<String>>,
{
    let mut found = Vec::new();
    if limit == 0 {
        return Ok(found);
    }
    for key in keys {
        if interrupt.load(Ordering::Acquire) {
            return Err(Error::Interrupted);
        }
        let key = key?;
        if start < key.as_str() && key.as_str() < end {
            found.push(key);
            if found.len() as u64 == limit {
                break;
            }
        }
    }
    Ok(found)
}

/// Parse `SCAN` arguments: `<cursor> [MATCH pattern] [COUNT count]`.
pub fn parse_scan_args(args: &[String], default_count: u64) -> Result<(u64, String, u64)> {
    let cursor = parse_number(&args[0], "cursor")?;
    let mut pattern = ALL_KEYS_PATTERN.to_string();
    let mut count = default_count;

    let mut rest = args[1..].iter();
    while let Some(option) = rest.next() {
        let value = rest
            .next()
            .ok_or_else(|| Error::invalid_argument(format!("{} needs a value", option)))?;
        if option.eq_ignore_ascii_case("MATCH") {
            pattern = value.clone();
        } else if option.eq_ignore_ascii_case("COUNT") {
            count = parse_number(value, "count")?;
        } else {
            return Err(Error::invalid_argument(format!("unknown SCAN option '{}'", option)));
        }
    }
    Ok((cursor, pattern, count))
}

/// Parse an unsigned argument.
pub fn parse_number(text: &str, what: &str) -> Result<u64> {
    text.parse()
        .map_err(|_| Error::invalid_argument(format!("{} must be a non-negative integer, got '{}'", what, text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ok_keys(keys: &[&str]) -> Vec<Result<String>> {
        keys.iter().map(|k| Ok(k.to_string())).collect()
    }

    #[test]
    fn test_glob_basics() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("user:*", "user:42"));
        assert!(!glob_match("user:*", "usr:42"));
        assert!(glob_match("h?llo", "hello"));
        assert!(!glob_match("h?llo", "hllo"));
        assert!(glob_match("*a*b*", "xxaxxbxx"));
        assert!(!glob_match("*a*b", "xxbxxa"));
    }

    #[test]
    fn test_glob_classes_and_escapes() {
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("k[0-9]", "k7"));
        assert!(!glob_match("k[0-9]", "kx"));
        assert!(glob_match(r"a\*", "a*"));
        assert!(!glob_match(r"a\*", "ab"));
        assert!(glob_match("[", "["));
    }

    #[test]
    fn test_scan_pages_with_cursor() {
        let flag = AtomicBool::new(false);
        let keys = ["a1", "b1", "a2", "a3", "a4"];

        let first = scan_keys(ok_keys(&keys), 0, "a*", 2, &flag).unwrap();
        assert_eq!(first.keys, vec!["a1", "a2"]);
        assert_eq!(first.cursor_out, 2);

        let second = scan_keys(ok_keys(&keys), first.cursor_out, "a*", 2, &flag).unwrap();
        assert_eq!(second.keys, vec!["a3", "a4"]);
        assert_eq!(second.cursor_out, 4);

        let last = scan_keys(ok_keys(&keys), second.cursor_out, "a*", 2, &flag).unwrap();
        assert!(last.keys.is_empty());
        assert_eq!(last.cursor_out, 0);
    }

    #[test]
    fn test_scan_zero_count_is_empty() {
        let flag = AtomicBool::new(false);
        let page = scan_keys(ok_keys(&["a", "b"]), 0, "*", 0, &flag).unwrap();
        assert!(page.keys.is_empty());
        assert_eq!(page.cursor_out, 0);
    }

    #[test]
    fn test_scan_interrupted_between_keys() {
        let flag = AtomicBool::new(true);
        let err = scan_keys(ok_keys(&["a"]), 0, "*", 10, &flag).unwrap_err();
        assert_eq!(err, Error::Interrupted);
    }

    #[test]
    fn test_keys_in_range_is_exclusive_and_limited() {
        let flag = AtomicBool::new(false);
        let keys = ["a", "b", "c", "d", "e"];
        assert_eq!(
            keys_in_range(ok_keys(&keys), "a", "e", 10, &flag).unwrap(),
            vec!["b", "c", "d"]
        );
        assert_eq!(
            keys_in_range(ok_keys(&keys), "a", "e", 2, &flag).unwrap(),
            vec!["b", "c"]
        );
        assert!(keys_in_range(ok_keys(&keys), "a", "e", 0, &flag).unwrap().is_empty());
    }

    #[test]
    fn test_parse_scan_args() {
        let args: Vec<String> = ["5", "match", "u:*", "COUNT", "7"].iter().map(|s| s.to_string()).collect();
        assert_eq!(parse_scan_args(&args, 100).unwrap(), (5, "u:*".to_string(), 7));

        let args = vec!["0".to_string()];
        assert_eq!(parse_scan_args(&args, 100).unwrap(), (0, "*".to_string(), 100));

        let bad = vec!["0".to_string(), "COUNT".to_string()];
        assert!(parse_scan_args(&bad, 100).is_err());
        let bad = vec!["x".to_string()];
        assert!(parse_scan_args(&bad, 100).is_err());
    }

    proptest! {
        #[test]
        fn scan_never_exceeds_limit(n_keys in 0usize..50, limit in 0u64..20, cursor in 0u64..60) {
            let flag = AtomicBool::new(false);
            let keys: Vec<Result<String>> = (0..n_keys).map(|i| Ok(format!("k{}", i))).collect();
            let page = scan_keys(keys, cursor, "*", limit, &flag).unwrap();
            prop_assert!(page.keys.len() as u64 <= limit);
            if limit == 0 {
                prop_assert!(page.keys.is_empty());
            }
        }
    }
}
