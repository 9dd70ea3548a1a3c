use crate::domain::error::DeviceError;

/// Interpret a device reading as an integer.
///
/// Accepts a bare number (`"1"`) or a labelled value where the number follows
/// the last colon (`"IR:1"`, `"IR_VALUE: 0"`). Anything else is reported
/// rather than guessed.
pub fn parse_reading(raw: &str) -> Result<i64, DeviceError> {
    let text = raw.trim();
    let unparseable = || DeviceError::UnparseableResponse {
        raw: text.to_string(),
    };

    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().map_err(|_| unparseable());
    }

    match text.rsplit_once(':') {
        Some((_, value)) => value.trim().parse().map_err(|_| unparseable()),
        None => Err(unparseable()),
    }
}
