//! Shared numeric helpers.

/// An error from [`parse_i64`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NumberError {
    #[error("invalid number")]
    Invalid,
    #[error("number overflows i64")]
    Overflow,
}

/// Parse an ASCII decimal integer into an `i64`.
///
/// Overflow is detected on both the multiply and the add. `i64::MIN`
/// cannot be represented.
pub fn parse_i64(b: &[u8]) -> Result<i64, NumberError> {
    let (digits, negative) = match b.split_first() {
        Some((b'-', rest)) => (rest, true),
        Some(_) => (b, false),
        None => return Err(NumberError::Invalid),
    };
    if digits.is_empty() {
        return Err(NumberError::Invalid);
    }

    let mut n: i64 = 0;
    for &ch in digits {
        if !ch.is_ascii_digit() {
            return Err(NumberError::Invalid);
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add(i64::from(ch - b'0')))
            .ok_or(NumberError::Overflow)?;
    }

    Ok(if negative { -n } else { n })
}
