//! Go 风格时长字符串（`1h30m`、`200ms`、`-15m`）。

use chrono::TimeDelta;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid duration: {0}")]
    Invalid(String),
    #[error("negative duration not allowed: {0}")]
    Negative(String),
}

/// 解析带符号时长，返回纳秒数。
fn parse_nanos(input: &str) -> Result<i128, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());
    let text = input.trim();
    let (negative, mut rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if rest == "0" {
        return Ok(0);
    }
    if rest.is_empty() {
        return Err(invalid());
    }
    let mut total: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        total += number * scale;
        rest = &rest[unit_len..];
    }
    let nanos = total.round() as i128;
    Ok(if negative { -nanos } else { nanos })
}

/// 解析非负时长。
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let nanos = parse_nanos(input)?;
    if nanos < 0 {
        return Err(DurationError::Negative(input.to_string()));
    }
    Ok(Duration::from_nanos(nanos as u64))
}

/// 解析时长，失败或为空时使用默认值。
pub fn parse_duration_or(input: &str, default: Duration) -> Duration {
    if input.trim().is_empty() {
        return default;
    }
    parse_duration(input).unwrap_or(default)
}

/// 解析带符号偏移（日出日落偏移量）。
pub fn parse_offset(input: &str) -> Result<TimeDelta, DurationError> {
    if input.trim().is_empty() {
        return Ok(TimeDelta::zero());
    }
    let nanos = parse_nanos(input)?;
    Ok(TimeDelta::nanoseconds(nanos as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("1h30m").expect("parse"), Duration::from_secs(5400));
        assert_eq!(parse_duration("200ms").expect("parse"), Duration::from_millis(200));
        assert_eq!(parse_duration("1.5s").expect("parse"), Duration::from_millis(1500));
        assert_eq!(parse_duration("0").expect("parse"), Duration::ZERO);
    }

    #[test]
    fn rejects_garbage_and_negative() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10").is_err());
        assert!(matches!(parse_duration("-5s"), Err(DurationError::Negative(_))));
        assert_eq!(parse_offset("-15m").expect("parse"), TimeDelta::minutes(-15));
    }
}
