//! ISO-8601 duration text, e.g. `PT15S`, `PT0.5S`, `-PT10S`, `P1DT2H`.
//!
//! Durations are signed: the remaining commit budget goes negative once it
//! is exhausted.

use chrono::TimeDelta;

use super::codec::CodecError;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Format a duration as `[-]PT<seconds>[.<fraction>]S`.
pub fn format_duration(duration: TimeDelta) -> String {
    let negative = duration < TimeDelta::zero();
    let magnitude = duration.abs();
    let seconds = magnitude.num_seconds();
    let nanos = magnitude.subsec_nanos();

    let mut text = String::new();
    if negative {
        text.push('-');
    }
    text.push_str("PT");
    text.push_str(&seconds.to_string());
    if nanos != 0 {
        let fraction = format!("{:09}", nanos);
        text.push('.');
        text.push_str(fraction.trim_end_matches('0'));
    }
    text.push('S');
    text
}

/// Parse `[-]P[nW][nD][T[nH][nM][n[.f]S]]`.
pub fn parse_duration(text: &str) -> Result<TimeDelta, CodecError> {
    let invalid = || CodecError::InvalidDuration(text.to_string());

    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let body = unsigned
        .strip_prefix(['P', 'p'])
        .filter(|b| !b.is_empty())
        .ok_or_else(invalid)?;

    let (date_part, time_part) = match body.split_once(['T', 't']) {
        Some((_, time)) if time.is_empty() => return Err(invalid()),
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };

    let mut total = sum_components(date_part, |unit| match unit {
        'W' | 'w' => Some(7 * 86_400),
        'D' | 'd' => Some(86_400),
        _ => None,
    })
    .ok_or_else(invalid)?;

    if let Some(time) = time_part {
        total += sum_components(time, |unit| match unit {
            'H' | 'h' => Some(3_600),
            'M' | 'm' => Some(60),
            'S' | 's' => Some(1),
            _ => None,
        })
        .ok_or_else(invalid)?;
    }

    if negative {
        total = -total;
    }
    let nanos = i64::try_from(total).map_err(|_| invalid())?;
    Ok(TimeDelta::nanoseconds(nanos))
}

fn sum_components(part: &str, unit_seconds: impl Fn(char) -> Option<i128>) -> Option<i128> {
    let mut total = 0i128;
    let mut number = String::new();

    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(if c == ',' { '.' } else { c });
            continue;
        }
        let scale = unit_seconds(c)?;
        total += component_nanos(&number)? * scale;
        number.clear();
    }

    // Trailing digits without a unit designator.
    if number.is_empty() {
        Some(total)
    } else {
        None
    }
}

fn component_nanos(number: &str) -> Option<i128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.len() > 9 || fraction.contains('.') {
        return None;
    }
    let whole: i128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction: i128 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<9}", fraction).parse().ok()?
    };
    Some(whole * NANOS_PER_SEC + fraction)
}
