use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub const UNKNOWN: &str = "Unknown";

/// Rounds half away from zero to `decimals` places.
///
/// Change detection compares these values exactly, so every producer of a
/// numeric property must go through this function.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Seconds as hours, one decimal.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn hours(seconds: i64) -> f64 {
    round_to(seconds as f64 / 3600.0, 1)
}

/// Seconds as `Hh Mm`, counting whole minutes only.
#[must_use]
pub fn format_duration(seconds: i64) -> String {
    let minutes = seconds.max(0) / 60;
    format!("{}h {}m", minutes / 60, minutes % 60)
}

/// Average speed in m/s as `M:SS min/km`; empty when the speed is not positive.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn format_pace(average_speed: f64) -> String {
    if average_speed <= 0.0 || !average_speed.is_finite() {
        return String::new();
    }

    let pace_min_km = 1000.0 / (average_speed * 60.0);
    let minutes = pace_min_km.trunc();
    let seconds = ((pace_min_km - minutes) * 60.0).trunc();
    format!("{}:{:02} min/km", minutes as i64, seconds as i64)
}

/// Epoch milliseconds as `YYYY-MM-DDTHH:MM:SS.000Z`. Zero means "no timestamp".
#[must_use]
pub fn format_timestamp_utc(epoch_ms: i64) -> Option<String> {
    let instant = instant_from_millis(epoch_ms)?;
    instant
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].000Z"
        ))
        .ok()
}

/// Epoch milliseconds as wall-clock `HH:MM` in `offset`, or `Unknown`.
#[must_use]
pub fn format_clock(epoch_ms: i64, offset: UtcOffset) -> String {
    instant_from_millis(epoch_ms)
        .and_then(|instant| {
            instant
                .to_offset(offset)
                .format(format_description!("[hour]:[minute]"))
                .ok()
        })
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// `2024-01-15` as `15.01.2024`, or `Unknown` when it does not parse.
#[must_use]
pub fn format_day_title(calendar_date: &str) -> String {
    parse_calendar_date(calendar_date)
        .and_then(|date| {
            date.format(format_description!("[day].[month].[year]"))
                .ok()
        })
        .unwrap_or_else(|| UNKNOWN.to_string())
}

#[must_use]
pub fn parse_calendar_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

/// Parses the service's `YYYY-MM-DD HH:MM:SS` GMT timestamps, falling back to
/// RFC3339.
#[must_use]
pub fn parse_service_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let trimmed = raw.trim();
    PrimitiveDateTime::parse(
        trimmed,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .map(PrimitiveDateTime::assume_utc)
    .or_else(|_| OffsetDateTime::parse(trimmed, &Rfc3339))
    .ok()
}

#[must_use]
pub fn format_rfc3339_utc(value: OffsetDateTime) -> Option<String> {
    value.to_offset(UtcOffset::UTC).format(&Rfc3339).ok()
}

#[must_use]
pub fn format_calendar_date(value: Date) -> Option<String> {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .ok()
}

/// Title-cases like the service's own labels: the first letter of every
/// alphabetic run is upper-cased and the rest lower-cased.
#[must_use]
pub fn title_case(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let mut previous_alphabetic = false;
    for ch in raw.chars() {
        if ch.is_alphabetic() {
            if previous_alphabetic {
                result.extend(ch.to_lowercase());
            } else {
                result.extend(ch.to_uppercase());
            }
            previous_alphabetic = true;
        } else {
            result.push(ch);
            previous_alphabetic = false;
        }
    }
    result
}

/// Replaces `_` separators and title-cases; `Unknown` for blank input.
#[must_use]
pub fn normalize_label(raw: &str) -> String {
    let spaced = raw.replace('_', " ");
    let trimmed = spaced.trim();
    if trimmed.is_empty() {
        return UNKNOWN.to_string();
    }
    title_case(trimmed)
}

fn instant_from_millis(epoch_ms: i64) -> Option<OffsetDateTime> {
    if epoch_ms == 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(epoch_ms) * 1_000_000).ok()
}
