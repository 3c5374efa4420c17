//! 计划类型 → 核心调度器表达式，以及有效期判断。
//!
//! 表达式按本地时区解释：
//! - `repeat`：`@every <interval>`
//! - `cron`：原样使用
//! - `simple`：`秒 分 时 日 月 周`，`on_date` 追加年份（7 段）
//! - `sunrise` / `sunset`：当天日出日落加偏移，按每日 `simple` 生成

use crate::error::ScheduleError;
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use domain::duration::{parse_duration, parse_offset};
use domain::schedule::DateRange;
use domain::sun::{Location, sun_times};
use domain::{Frequency, ScheduleConfig, ScheduleType, Validity};

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// 生成核心调度器表达式。`today` 用于日出日落计算。
pub fn derive_spec(
    config: &ScheduleConfig,
    location: Option<Location>,
    today: NaiveDate,
) -> Result<String, ScheduleError> {
    let invalid = |text: String| ScheduleError::Config(config.id.clone(), text);
    let spec = &config.spec;
    match config.schedule_type {
        ScheduleType::Repeat => {
            let interval = spec.repeat_interval.trim();
            let parsed = parse_duration(interval).map_err(|err| invalid(err.to_string()))?;
            if parsed.is_zero() {
                return Err(invalid("repeat interval must be positive".to_string()));
            }
            Ok(format!("@every {interval}"))
        }
        ScheduleType::Cron => {
            let expression = spec.cron_expression.trim();
            if expression.is_empty() {
                return Err(invalid("empty cron expression".to_string()));
            }
            Ok(expression.to_string())
        }
        ScheduleType::Simple => {
            let time = parse_time(&spec.time).map_err(invalid)?;
            let base = format!("{} {} {}", time.second(), time.minute(), time.hour());
            match spec.frequency {
                Frequency::Daily => Ok(format!("{base} * * *")),
                Frequency::Weekly => {
                    let days = weekdays(&spec.day_of_week).map_err(invalid)?;
                    Ok(format!("{base} * * {days}"))
                }
                Frequency::Monthly => {
                    let dates = month_dates(&spec.date_of_month).map_err(invalid)?;
                    Ok(format!("{base} {dates} * *"))
                }
                Frequency::OnDate => {
                    let date = parse_date(&spec.date).map_err(invalid)?;
                    Ok(format!("{base} {} {} * {}", date.day(), date.month(), date.year()))
                }
            }
        }
        ScheduleType::Sunrise | ScheduleType::Sunset => {
            let location = location.ok_or_else(|| ScheduleError::NoLocation(config.id.clone()))?;
            let (sunrise, sunset) = sun_times(today, location)
                .ok_or_else(|| invalid(format!("no sunrise or sunset on {today}")))?;
            let base = if config.schedule_type == ScheduleType::Sunrise {
                sunrise
            } else {
                sunset
            };
            let offset = parse_offset(&spec.offset).map_err(|err| invalid(err.to_string()))?;
            let at = (base + offset).with_timezone(&Local);
            Ok(format!("{} {} {} * * *", at.second(), at.minute(), at.hour()))
        }
    }
}

/// `on_date` 计划的一次性有效期：目标日期当天（本地时区）。
pub fn on_date_window(config: &ScheduleConfig) -> Result<DateRange, ScheduleError> {
    let date = parse_date(&config.spec.date).map_err(|text| ScheduleError::Config(config.id.clone(), text))?;
    Ok(DateRange {
        from: date.and_hms_opt(0, 0, 0).and_then(local_to_utc),
        to: date.and_hms_opt(23, 59, 59).and_then(local_to_utc),
    })
}

fn local_to_utc(naive: chrono::NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

/// 判断 `now` 是否处于有效期内；缺失的边界视为无限。
pub fn is_valid_at(validity: &Validity, now: DateTime<Utc>) -> bool {
    let range = &validity.date;
    if let (Some(from), Some(to)) = (range.from, range.to) {
        if from > to {
            return false;
        }
    }
    if range.from.is_some_and(|from| now < from) || range.to.is_some_and(|to| now > to) {
        return false;
    }
    if !validity.validate_time_everyday {
        return true;
    }
    let local = now.with_timezone(&Local).time();
    let from = parse_time(&validity.time.from).ok();
    let to = parse_time(&validity.time.to).ok();
    match (from, to) {
        (Some(from), Some(to)) if from > to => local >= from || local <= to,
        (from, to) => from.is_none_or(|from| local >= from) && to.is_none_or(|to| local <= to),
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| format!("invalid time `{value}`"))
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| format!("invalid date `{value}`"))
}

/// `0`=周日 ... `6`=周六，或英文缩写 / 全名。
fn weekdays(value: &str) -> Result<String, String> {
    let mut days = Vec::new();
    for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let day = match item.parse::<usize>() {
            Ok(index) if index < 7 => WEEKDAYS[index],
            Ok(7) => WEEKDAYS[0],
            Ok(_) => return Err(format!("invalid day of week `{item}`")),
            Err(_) => WEEKDAYS
                .iter()
                .find(|day| item.get(..3).is_some_and(|prefix| day.eq_ignore_ascii_case(prefix)))
                .copied()
                .ok_or_else(|| format!("invalid day of week `{item}`"))?,
        };
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err("weekly schedule without dayOfWeek".to_string());
    }
    Ok(days.join(","))
}

fn month_dates(value: &str) -> Result<String, String> {
    let mut dates = Vec::new();
    for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        match item.parse::<u32>() {
            Ok(date) if (1..=31).contains(&date) => dates.push(date.to_string()),
            _ => return Err(format!("invalid date of month `{item}`")),
        }
    }
    if dates.is_empty() {
        return Err("monthly schedule without dateOfMonth".to_string());
    }
    Ok(dates.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use domain::ScheduleSpec;
    use domain::schedule::TimeRange;

    fn simple(frequency: Frequency) -> ScheduleConfig {
        ScheduleConfig {
            id: "s1".to_string(),
            schedule_type: ScheduleType::Simple,
            spec: ScheduleSpec {
                frequency,
                time: "09:00:00".to_string(),
                day_of_week: "1,3,Fri".to_string(),
                date_of_month: "1,15".to_string(),
                date: "2030-07-14".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    #[test]
    fn simple_frequencies_become_cron() {
        assert_eq!(derive_spec(&simple(Frequency::Daily), None, today()).expect("daily"), "0 0 9 * * *");
        assert_eq!(
            derive_spec(&simple(Frequency::Weekly), None, today()).expect("weekly"),
            "0 0 9 * * Mon,Wed,Fri"
        );
        assert_eq!(
            derive_spec(&simple(Frequency::Monthly), None, today()).expect("monthly"),
            "0 0 9 1,15 * *"
        );
        assert_eq!(
            derive_spec(&simple(Frequency::OnDate), None, today()).expect("on date"),
            "0 0 9 14 7 * 2030"
        );
        assert!(mc_scheduler::Trigger::parse("0 0 9 14 7 * 2030").is_ok());
    }

    #[test]
    fn repeat_and_cron() {
        let mut config = ScheduleConfig {
            id: "r".to_string(),
            ..Default::default()
        };
        config.spec.repeat_interval = "30s".to_string();
        assert_eq!(derive_spec(&config, None, today()).expect("repeat"), "@every 30s");
        config.spec.repeat_interval = "0s".to_string();
        assert!(derive_spec(&config, None, today()).is_err());

        config.schedule_type = ScheduleType::Cron;
        config.spec.cron_expression = " 0 */5 * * * * ".to_string();
        assert_eq!(derive_spec(&config, None, today()).expect("cron"), "0 */5 * * * *");
    }

    #[test]
    fn sunrise_requires_location() {
        let config = ScheduleConfig {
            id: "sun".to_string(),
            schedule_type: ScheduleType::Sunrise,
            ..Default::default()
        };
        assert!(matches!(
            derive_spec(&config, None, today()),
            Err(ScheduleError::NoLocation(_))
        ));
        let location = Location {
            latitude: 52.52,
            longitude: 13.405,
        };
        let date = NaiveDate::from_ymd_opt(2030, 6, 21).expect("date");
        let spec = derive_spec(&config, Some(location), date).expect("sunrise");
        assert!(spec.ends_with(" * * *"));
        assert!(mc_scheduler::Trigger::parse(&spec).is_ok());
    }

    #[test]
    fn inverted_date_range_never_matches() {
        let now = Utc::now();
        let validity = Validity {
            date: DateRange {
                from: Some(now + TimeDelta::days(1)),
                to: Some(now - TimeDelta::days(1)),
            },
            ..Default::default()
        };
        assert!(!is_valid_at(&validity, now));
        assert!(is_valid_at(&Validity::default(), now));
    }

    #[test]
    fn daily_time_window_is_checked_when_enabled() {
        let now = Utc::now();
        let local = now.with_timezone(&Local).time();
        let around = |minutes: i64| {
            (local + TimeDelta::minutes(minutes))
                .format("%H:%M:%S")
                .to_string()
        };
        let mut validity = Validity {
            time: TimeRange {
                from: around(-1),
                to: around(1),
            },
            validate_time_everyday: true,
            ..Default::default()
        };
        assert!(is_valid_at(&validity, now));
        validity.time = TimeRange {
            from: around(2),
            to: around(3),
        };
        assert!(!is_valid_at(&validity, now));
        validity.validate_time_everyday = false;
        assert!(is_valid_at(&validity, now));
    }

    #[test]
    fn on_date_window_covers_the_day() {
        let window = on_date_window(&simple(Frequency::OnDate)).expect("window");
        let from = window.from.expect("from").with_timezone(&Local);
        let to = window.to.expect("to").with_timezone(&Local);
        assert_eq!(from.date_naive(), NaiveDate::from_ymd_opt(2030, 7, 14).expect("date"));
        assert_eq!(to.time(), NaiveTime::from_hms_opt(23, 59, 59).expect("time"));
    }
}
