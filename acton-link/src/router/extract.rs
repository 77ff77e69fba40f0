//! Challenge code extraction from free text

use crate::linking::challenge::CODE_LENGTH;

/// First standalone run of exactly six ASCII digits in `text`
///
/// A run is standalone when it is not part of a longer digit sequence, so
/// "code 123456!" yields `123456` while "1234567" yields nothing.
#[must_use]
pub fn extract_challenge_code(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }

        let end = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |offset| start + offset);

        if end - start == CODE_LENGTH {
            // ASCII digits are single bytes, so both ends are char boundaries
            return text.get(start..end);
        }
        start = end;
    }

    None
}
