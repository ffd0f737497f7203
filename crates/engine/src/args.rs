//! Command line tokenizer
//!
//! Splits a command line into argument words the same way interactive
//! key-value shells do:
//! - words are separated by ASCII whitespace
//! - `"double quoted"` words understand `\n`, `\r`, `\t`, `\"`, `\\` and `\xHH`
//! - `'single quoted'` words are literal except for `\'`
//! - a closing quote must be followed by whitespace or end of line
//!
//! [`quote_arg`] is the inverse: it renders one word so that
//! [`split_args`] recovers it exactly.

use kvbridge_core::{Error, Result};

/// Split `line` into argument words.
///
/// # Errors
///
/// `InvalidArgument` on an unbalanced quote or a closing quote glued to
/// the next word.
pub fn split_args(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_ascii_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            return Ok(args);
        };

        let mut word = String::new();
        match first {
            '"' => {
                chars.next();
                loop {
                    match chars.next() {
                        None => return Err(unbalanced(line)),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => word.push('\n'),
                            Some('r') => word.push('\r'),
                            Some('t') => word.push('\t'),
                            Some('x') => {
                                let hi = chars.next();
                                let lo = chars.next();
                                match (hi.and_then(|c| c.to_digit(16)), lo.and_then(|c| c.to_digit(16))) {
                                    (Some(h), Some(l)) => word.push(char::from((h * 16 + l) as u8)),
                                    _ => {
                                        word.push('x');
                                        word.extend(hi);
                                        word.extend(lo);
                                    }
                                }
                            }
                            Some(other) => word.push(other),
                            None => return Err(unbalanced(line)),
                        },
                        Some(c) => word.push(c),
                    }
                }
                ensure_separated(&mut chars, line)?;
            }
            '\'' => {
                chars.next();
                loop {
                    match chars.next() {
                        None => return Err(unbalanced(line)),
                        Some('\'') => break,
                        Some('\\') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            word.push('\'');
                        }
                        Some(c) => word.push(c),
                    }
                }
                ensure_separated(&mut chars, line)?;
            }
            _ => {
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_whitespace() {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
            }
        }
        args.push(word);
    }
}

fn ensure_separated(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, line: &str) -> Result<()> {
    match chars.peek() {
        None => Ok(()),
        Some(c) if c.is_ascii_whitespace() => Ok(()),
        Some(_) => Err(Error::invalid_argument(format!(
            "closing quote must be followed by a space: {}",
            line
        ))),
    }
}

fn unbalanced(line: &str) -> Error {
    Error::invalid_argument(format!("unbalanced quotes in command line: {}", line))
}

/// Render `word` so that [`split_args`] reads it back unchanged.
pub fn quote_arg(word: &str) -> String {
    let needs_quotes = word.is_empty()
        || word
            .chars()
            .any(|c| c.is_ascii_whitespace() || c == '"' || c == '\'' || c.is_control());
    if !needs_quotes {
        return word.to_string();
    }

    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('"');
    for c in word.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                quoted.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Join words into one command line, quoting where needed.
pub fn join_args<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| quote_arg(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
