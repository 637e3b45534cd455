use crate::error::DecodeError;
use crate::types::{DecodedRecord, RawSample};

/// Wire records are `channel,q1,q2,q3,q4`
pub const FIELD_COUNT: usize = 5;

/// Parse one framed line.
///
/// Float parsing is locale independent (`.` decimal separator) and only
/// finite values are accepted. The channel index is returned as-is; range
/// checks belong to the caller.
pub fn decode(line: &str) -> Result<DecodedRecord, DecodeError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != FIELD_COUNT {
        return Err(DecodeError::FieldCount(fields.len()));
    }

    let channel_field = fields[0].trim();
    let channel = channel_field
        .parse::<i64>()
        .map_err(|_| DecodeError::BadChannel(channel_field.to_string()))?;

    let mut q = [0.0f64; 4];
    for (index, (slot, raw)) in q.iter_mut().zip(&fields[1..]).enumerate() {
        let raw = raw.trim();
        let bad = || DecodeError::BadComponent {
            index: index + 1,
            value: raw.to_string(),
        };
        let value = raw.parse::<f64>().map_err(|_| bad())?;
        // NaN or inf would poison the filter state for good
        if !value.is_finite() {
            return Err(bad());
        }
        *slot = value;
    }

    Ok(DecodedRecord {
        channel,
        sample: RawSample::new(q[0], q[1], q[2], q[3]),
    })
}
