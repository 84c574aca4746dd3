//! Variable classification and 64-bit variable encoding.
//!
//! Every token of a log message is encoded into one 64-bit slot:
//!
//! - **Integer variables** store the token's signed value directly. Only
//!   canonical spellings qualify (no redundant leading zeros, no `-0`), so
//!   decoding reproduces the original token exactly.
//! - **Float variables** pack sign, digit count, fraction length, and the
//!   digits with the decimal point removed:
//!
//!   ```text
//!   bit 63    bits 62..59      bits 58..55          bits 54..0
//!   sign      num_digits - 1   digits_after_pt - 1  digits as integer
//!   ```
//!
//!   Packing the spelling rather than a binary float is what lets
//!   `-00.120` decode back to `-00.120` instead of `-0.12`.
//! - **Dictionary variables** store a variable-dictionary ID; everything
//!   that is not a representable integer or float takes this form.
//!
//! In log-type templates each variable is replaced by a single placeholder
//! byte identifying its kind. The placeholder bytes are control characters
//! that do not occur in log text.

use crate::error::Result;

/// Placeholder byte for integer variables.
pub const PLACEHOLDER_INT: u8 = 0x11;
/// Placeholder byte for float variables.
pub const PLACEHOLDER_FLOAT: u8 = 0x12;
/// Placeholder byte for dictionary variables.
pub const PLACEHOLDER_DICT: u8 = 0x13;

/// Maximum total digits a representable float may carry.
pub const MAX_FLOAT_DIGITS: u32 = 16;

/// The kind of variable a placeholder byte stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    /// Inline-encoded signed integer.
    Int,
    /// Inline-encoded packed decimal fraction.
    Float,
    /// Variable-dictionary ID.
    Dict,
}

impl PlaceholderKind {
    /// The placeholder byte for this kind.
    pub fn as_byte(self) -> u8 {
        match self {
            PlaceholderKind::Int => PLACEHOLDER_INT,
            PlaceholderKind::Float => PLACEHOLDER_FLOAT,
            PlaceholderKind::Dict => PLACEHOLDER_DICT,
        }
    }

    /// Maps a placeholder byte back to its kind.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            PLACEHOLDER_INT => Some(PlaceholderKind::Int),
            PLACEHOLDER_FLOAT => Some(PlaceholderKind::Float),
            PLACEHOLDER_DICT => Some(PlaceholderKind::Dict),
            _ => None,
        }
    }

}

/// Classification of one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    /// Representable integer with its encoded value.
    Int(i64),
    /// Representable float with its packed encoding.
    Float(u64),
    /// Everything else; goes to the variable dictionary.
    Dict,
}

/// Classifies a token the way the encoder will store it: integer first,
/// then float, otherwise dictionary.
pub fn classify_token(token: &str) -> TokenClass {
    if let Some(value) = encode_integer_var(token) {
        return TokenClass::Int(value);
    }
    if let Some(packed) = encode_float_var(token) {
        return TokenClass::Float(packed);
    }
    TokenClass::Dict
}

/// Encodes a token as an integer variable, if its spelling is canonical
/// and its magnitude fits a signed 64-bit value.
pub fn encode_integer_var(token: &str) -> Option<i64> {
    let digits = token.strip_prefix('-').unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Only canonical spellings round-trip: no redundant leading zeros and
    // no negative zero.
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    if token.starts_with('-') && digits == "0" {
        return None;
    }
    token.parse::<i64>().ok()
}

/// Decodes an integer variable back to its original spelling.
pub fn decode_integer_var(slot: u64) -> String {
    (slot as i64).to_string()
}

/// Encodes a token of the form `[-]digits.digits` as a packed float
/// variable, if it carries at most [`MAX_FLOAT_DIGITS`] digits.
pub fn encode_float_var(token: &str) -> Option<u64> {
    let (negative, rest) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let (whole, fraction) = rest.split_once('.')?;
    if whole.is_empty()
        || fraction.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let num_digits = (whole.len() + fraction.len()) as u32;
    if num_digits > MAX_FLOAT_DIGITS {
        return None;
    }

    let mut digits = 0u64;
    for b in whole.bytes().chain(fraction.bytes()) {
        digits = digits * 10 + u64::from(b - b'0');
    }

    let sign = u64::from(negative);
    let num_digits_field = u64::from(num_digits - 1);
    let fraction_field = fraction.len() as u64 - 1;
    Some(sign << 63 | num_digits_field << 59 | fraction_field << 55 | digits)
}

/// Decodes a packed float variable back to its original spelling,
/// leading zeros included.
pub fn decode_float_var(slot: u64) -> String {
    let negative = slot >> 63 != 0;
    let num_digits = (slot >> 59 & 0xf) as usize + 1;
    let num_fraction_digits = (slot >> 55 & 0xf) as usize + 1;
    let digits = slot & 0x007f_ffff_ffff_ffff;

    let mut out = String::with_capacity(num_digits + 2);
    if negative {
        out.push('-');
    }
    let digit_str = format!("{:0width$}", digits, width = num_digits);
    let point_ix = num_digits - num_fraction_digits;
    out.push_str(&digit_str[..point_ix]);
    out.push('.');
    out.push_str(&digit_str[point_ix..]);
    out
}

/// Decodes a 64-bit variable slot of the given kind back to its original
/// token text, resolving dictionary IDs through `lookup`.
pub fn decode_var(
    kind: PlaceholderKind,
    slot: u64,
    lookup: impl FnOnce(u64) -> Result<String>,
) -> Result<String> {
    match kind {
        PlaceholderKind::Int => Ok(decode_integer_var(slot)),
        PlaceholderKind::Float => Ok(decode_float_var(slot)),
        PlaceholderKind::Dict => lookup(slot),
    }
}
