use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::*;

// Trade amounts are stored as fixed point integers with 7 decimal places
pub const AMOUNT_SCALE: u32 = 7;

// Round a millis timestamp up to the start of the next bucket. An aligned timestamp
// is already a bucket start and is left alone. Used for the lower bound of an
// aggregation window so the first bucket returned is never partial.
pub fn round_up_to_resolution(millis: i64, resolution: i64) -> i64 {
    if millis % resolution != 0 {
        (millis / resolution) * resolution + resolution
    } else {
        millis
    }
}

// Round a millis timestamp down to the start of its bucket. Used for the upper bound
// of an aggregation window so the last bucket returned is never partial.
pub fn round_down_to_resolution(millis: i64, resolution: i64) -> i64 {
    (millis / resolution) * resolution
}

pub fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis(millis)
}

pub fn millis_from_timestamp(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

// Convert a stored fixed point amount to its decimal representation
pub fn amount_to_decimal(amount: i64) -> Decimal {
    Decimal::new(amount, AMOUNT_SCALE)
}
