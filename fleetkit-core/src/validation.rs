use chrono::{DateTime, SecondsFormat, TimeZone};

use crate::metadata::Metadata;
use crate::structured_error::{StructuredError, ERROR_DOMAIN};

const ERROR_SUB_DOMAIN: &str = "validation";

pub const ERROR_END_TIME_BEFORE_START_TIME: &str = "end_time_before_start_time";

/// Whether `now` lies in `[start, end)`.
///
/// Fails with `400 end_time_before_start_time` when the range is inverted.
pub fn within_time_range<Tz: TimeZone>(
    now: &DateTime<Tz>,
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> Result<bool, StructuredError>
where
    Tz::Offset: std::fmt::Display,
{
    if end < start {
        let meta = Metadata::from_iter([
            ("start_time", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("end_time", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ]);
        return Err(StructuredError::new(
            400,
            ERROR_DOMAIN,
            ERROR_SUB_DOMAIN,
            ERROR_END_TIME_BEFORE_START_TIME,
            Some(meta),
        ));
    }

    Ok(now == start || (now > start && now < end))
}
