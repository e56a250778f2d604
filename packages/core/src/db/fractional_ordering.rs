//! Fractional Position Keys
//!
//! Sibling order is kept with opaque string keys that sort lexicographically
//! (plain byte order). Between any two keys another key can always be generated,
//! so inserting or moving a page never requires renumbering its siblings.
//!
//! # Key Format
//!
//! Keys are base-62 numbers (`0-9A-Za-z`, which is also ASCII order):
//!
//! - An **integer part** whose head character encodes its own length:
//!   `a`..`z` are non-negative integers with 1..26 digits, `A`..`Z` are negative
//!   integers with 26..1 digits. `"a0"` is zero.
//! - An optional **fractional part** that never ends in `0`.
//!
//! Appending at the end only increments the integer part, so keys stay short for
//! the common "add page at the bottom" case. Inserting between two neighbours
//! extends the fractional part.
//!
//! # Jitter
//!
//! Two writers inserting into the same gap at the same moment would compute the
//! same midpoint. [`PositionKeyAllocator`] adds a few random bisection steps inside
//! the open interval after computing the midpoint, so concurrent writers land on one
//! of `2^jitter_rounds` distinct keys. Collisions stay possible, just rare; the store
//! reports them as unique violations and the service retries.
//!
//! # Examples
//!
//! ```rust
//! use pagespace_core::db::fractional_ordering::generate_key_between;
//!
//! let first = generate_key_between(None, None).unwrap();
//! assert_eq!(first, "a0");
//!
//! let second = generate_key_between(Some(&first), None).unwrap();
//! let middle = generate_key_between(Some(&first), Some(&second)).unwrap();
//! assert!(first < middle && middle < second);
//! ```

use rand::Rng;
use thiserror::Error;

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = 62;
const ZERO: u8 = b'0';
const MAX_DIGIT: u8 = b'z';
const INTEGER_ZERO: &str = "a0";
const SMALLEST_INTEGER: &str = "A00000000000000000000000000";

/// Upper bound for configured jitter rounds
pub const MAX_JITTER_ROUNDS: u32 = 32;

/// Errors produced while generating or validating position keys
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Lower bound is not strictly below the upper bound
    #[error("Invalid key range: '{lower}' is not less than '{upper}'")]
    InvalidRange { lower: String, upper: String },

    /// Key is not a well-formed position key
    #[error("Invalid position key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Integer space exhausted at one end (practically unreachable)
    #[error("Position key space exhausted beyond '{key}'")]
    Exhausted { key: String },
}

impl KeyError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

fn digit_index(c: u8) -> Option<usize> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as usize),
        b'A'..=b'Z' => Some((c - b'A') as usize + 10),
        b'a'..=b'z' => Some((c - b'a') as usize + 36),
        _ => None,
    }
}

/// Digit value of an already validated key byte
fn digit_value(c: u8) -> usize {
    debug_assert!(digit_index(c).is_some(), "unvalidated key byte {c}");
    digit_index(c).unwrap_or(0)
}

fn integer_length(head: u8) -> Option<usize> {
    match head {
        b'a'..=b'z' => Some((head - b'a') as usize + 2),
        b'A'..=b'Z' => Some((b'Z' - head) as usize + 2),
        _ => None,
    }
}

fn integer_part(key: &str) -> Result<&str, KeyError> {
    let head = *key
        .as_bytes()
        .first()
        .ok_or_else(|| KeyError::invalid(key, "key is empty"))?;
    let len = integer_length(head)
        .ok_or_else(|| KeyError::invalid(key, "invalid integer head"))?;
    if len > key.len() {
        return Err(KeyError::invalid(key, "integer part is truncated"));
    }
    Ok(&key[..len])
}

/// Check that `key` is a well-formed position key
pub fn validate_key(key: &str) -> Result<(), KeyError> {
    if !key.bytes().all(|b| digit_index(b).is_some()) {
        return Err(KeyError::invalid(key, "contains non base-62 characters"));
    }
    if key == SMALLEST_INTEGER {
        return Err(KeyError::invalid(key, "smallest integer is reserved"));
    }
    let integer = integer_part(key)?;
    if key[integer.len()..].ends_with('0') {
        return Err(KeyError::invalid(key, "fractional part has a trailing zero"));
    }
    Ok(())
}

/// Midpoint of two fractional parts. `a` may be empty, `b = None` means 1.
///
/// Requires `a < b` and neither ending in zero.
fn midpoint(a: &[u8], b: Option<&[u8]>) -> Vec<u8> {
    if let Some(b) = b {
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(ZERO) == b[n] {
            n += 1;
        }
        if n > 0 {
            let mut out = b[..n].to_vec();
            out.extend(midpoint(a.get(n..).unwrap_or(&[]), Some(&b[n..])));
            return out;
        }
    }

    let digit_a = a.first().map(|&c| digit_value(c)).unwrap_or(0);
    let digit_b = match b.and_then(|b| b.first()) {
        Some(&c) => digit_value(c),
        None => BASE,
    };

    if digit_b > digit_a + 1 {
        vec![DIGITS[(digit_a + digit_b + 1) / 2]]
    } else if let Some(b) = b.filter(|b| b.len() > 1) {
        vec![b[0]]
    } else {
        let mut out = vec![DIGITS[digit_a]];
        out.extend(midpoint(a.get(1..).unwrap_or(&[]), None));
        out
    }
}

fn increment_integer(x: &str) -> Option<String> {
    let bytes = x.as_bytes();
    let head = bytes[0];
    let mut digits = bytes[1..].to_vec();

    let mut carry = true;
    for d in digits.iter_mut().rev() {
        let next = digit_value(*d) + 1;
        if next == BASE {
            *d = ZERO;
        } else {
            *d = DIGITS[next];
            carry = false;
            break;
        }
    }

    if carry {
        if head == b'Z' {
            return Some(INTEGER_ZERO.to_string());
        }
        if head == b'z' {
            return None;
        }
        let next_head = head + 1;
        if next_head > b'a' {
            digits.push(ZERO);
        } else {
            digits.pop();
        }
        return Some(assemble(next_head, &digits));
    }
    Some(assemble(head, &digits))
}

fn decrement_integer(x: &str) -> Option<String> {
    let bytes = x.as_bytes();
    let head = bytes[0];
    let mut digits = bytes[1..].to_vec();

    let mut borrow = true;
    for d in digits.iter_mut().rev() {
        let value = digit_value(*d);
        if value == 0 {
            *d = MAX_DIGIT;
        } else {
            *d = DIGITS[value - 1];
            borrow = false;
            break;
        }
    }

    if borrow {
        if head == b'a' {
            return Some(assemble(b'Z', &[MAX_DIGIT]));
        }
        if head == b'A' {
            return None;
        }
        let next_head = head - 1;
        if next_head < b'Z' {
            digits.push(MAX_DIGIT);
        } else {
            digits.pop();
        }
        return Some(assemble(next_head, &digits));
    }
    Some(assemble(head, &digits))
}

fn assemble(head: u8, digits: &[u8]) -> String {
    let mut out = Vec::with_capacity(digits.len() + 1);
    out.push(head);
    out.extend_from_slice(digits);
    // All bytes come from the base-62 alphabet
    String::from_utf8(out).unwrap_or_default()
}

fn concat(integer: &str, fraction: Vec<u8>) -> String {
    let mut out = integer.as_bytes().to_vec();
    out.extend(fraction);
    String::from_utf8(out).unwrap_or_default()
}

/// Generate a key strictly between `lower` and `upper` (deterministic, no jitter)
///
/// `None` is an open boundary on that side.
///
/// # Errors
///
/// - [`KeyError::InvalidKey`] if either bound is malformed
/// - [`KeyError::InvalidRange`] if both bounds are given and `lower >= upper`
pub fn generate_key_between(lower: Option<&str>, upper: Option<&str>) -> Result<String, KeyError> {
    if let Some(a) = lower {
        validate_key(a)?;
    }
    if let Some(b) = upper {
        validate_key(b)?;
    }

    match (lower, upper) {
        (None, None) => Ok(INTEGER_ZERO.to_string()),
        (None, Some(b)) => {
            let ib = integer_part(b)?;
            let fb = &b[ib.len()..];
            if ib == SMALLEST_INTEGER {
                return Ok(concat(ib, midpoint(&[], Some(fb.as_bytes()))));
            }
            if ib.len() < b.len() {
                return Ok(ib.to_string());
            }
            decrement_integer(ib).ok_or_else(|| KeyError::Exhausted { key: b.to_string() })
        }
        (Some(a), None) => {
            let ia = integer_part(a)?;
            let fa = &a[ia.len()..];
            match increment_integer(ia) {
                Some(next) => Ok(next),
                None => Ok(concat(ia, midpoint(fa.as_bytes(), None))),
            }
        }
        (Some(a), Some(b)) => {
            if a >= b {
                return Err(KeyError::InvalidRange {
                    lower: a.to_string(),
                    upper: b.to_string(),
                });
            }
            let ia = integer_part(a)?;
            let fa = &a[ia.len()..];
            let ib = integer_part(b)?;
            let fb = &b[ib.len()..];
            if ia == ib {
                return Ok(concat(ia, midpoint(fa.as_bytes(), Some(fb.as_bytes()))));
            }
            let next = increment_integer(ia).ok_or_else(|| KeyError::Exhausted {
                key: a.to_string(),
            })?;
            if next.as_str() < b {
                return Ok(next);
            }
            Ok(concat(ia, midpoint(fa.as_bytes(), None)))
        }
    }
}

/// Allocates sibling position keys with randomized jitter
#[derive(Debug, Clone)]
pub struct PositionKeyAllocator {
    jitter_rounds: u32,
}

impl Default for PositionKeyAllocator {
    fn default() -> Self {
        Self::new(12)
    }
}

impl PositionKeyAllocator {
    /// Create an allocator performing `jitter_rounds` random bisections per key
    ///
    /// Rounds are capped at [`MAX_JITTER_ROUNDS`]. Zero rounds gives deterministic keys.
    pub fn new(jitter_rounds: u32) -> Self {
        Self {
            jitter_rounds: jitter_rounds.min(MAX_JITTER_ROUNDS),
        }
    }

    pub fn jitter_rounds(&self) -> u32 {
        self.jitter_rounds
    }

    /// Generate a jittered key strictly between `lower` and `upper`
    ///
    /// Each round narrows the open interval to one side of the current key and
    /// bisects again, so the result always stays inside the original bounds.
    pub fn generate_key_between(
        &self,
        lower: Option<&str>,
        upper: Option<&str>,
    ) -> Result<String, KeyError> {
        let mut key = generate_key_between(lower, upper)?;
        if self.jitter_rounds == 0 {
            return Ok(key);
        }

        let mut lo = lower.map(str::to_string);
        let mut hi = upper.map(str::to_string);
        let mut rng = rand::thread_rng();
        for _ in 0..self.jitter_rounds {
            if rng.gen::<bool>() {
                lo = Some(key);
            } else {
                hi = Some(key);
            }
            key = generate_key_between(lo.as_deref(), hi.as_deref())?;
        }
        Ok(key)
    }

    /// Key for a new last sibling, after `last` (or the first key when `None`)
    pub fn next_sibling_key(&self, last: Option<&str>) -> Result<String, KeyError> {
        self.generate_key_between(last, None)
    }

    /// Reject caller-supplied positions that could not serve as a lower bound
    pub fn validate_position(&self, untrusted: &str) -> Result<(), KeyError> {
        generate_key_between(Some(untrusted), None).map(|_| ())
    }
}
