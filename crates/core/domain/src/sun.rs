//! 日出日落时间（Meeus 简化算法，精度约 1 分钟）。

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const J1970: f64 = 2_440_587.5;
const J2000: f64 = 2_451_545.0;
const OBLIQUITY_DEG: f64 = 23.4397;
const HORIZON_DEG: f64 = -0.833;

/// 地理位置（十进制度，东经为正）。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// 指定日期的日出与日落（UTC）；极昼/极夜时返回 None。
pub fn sun_times(date: NaiveDate, location: Location) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let julian_day = (date - epoch).num_days() as f64 + J1970;
    let cycle = (julian_day - J2000 + 0.0008).ceil();
    let mean_solar_noon = cycle - location.longitude / 360.0;

    let anomaly = (357.5291 + 0.985_600_28 * mean_solar_noon).rem_euclid(360.0);
    let m = anomaly.to_radians();
    let center = 1.9148 * m.sin() + 0.0200 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin();
    let ecliptic = (anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
    let l = ecliptic.to_radians();
    let transit = J2000 + mean_solar_noon + 0.0053 * m.sin() - 0.0069 * (2.0 * l).sin();

    let sin_declination = l.sin() * OBLIQUITY_DEG.to_radians().sin();
    let cos_declination = sin_declination.asin().cos();
    let phi = location.latitude.to_radians();
    let cos_hour_angle = (HORIZON_DEG.to_radians().sin() - phi.sin() * sin_declination)
        / (phi.cos() * cos_declination);
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return None;
    }
    let hour_angle = cos_hour_angle.acos().to_degrees();
    let sunrise = julian_to_utc(transit - hour_angle / 360.0)?;
    let sunset = julian_to_utc(transit + hour_angle / 360.0)?;
    Some((sunrise, sunset))
}

fn julian_to_utc(julian: f64) -> Option<DateTime<Utc>> {
    let millis = ((julian - J1970) * 86_400_000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn minutes(ts: DateTime<Utc>) -> i64 {
        (ts.hour() * 60 + ts.minute()) as i64
    }

    #[test]
    fn greenwich_summer_solstice() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 21).expect("date");
        let (rise, set) = sun_times(
            date,
            Location {
                latitude: 51.4779,
                longitude: 0.0,
            },
        )
        .expect("sun times");
        assert_eq!(rise.date_naive(), date);
        assert!((minutes(rise) - (3 * 60 + 43)).abs() <= 3);
        assert!((minutes(set) - (20 * 60 + 21)).abs() <= 3);
    }

    #[test]
    fn new_york_winter_solstice() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 21).expect("date");
        let (rise, set) = sun_times(
            date,
            Location {
                latitude: 40.71,
                longitude: -74.0,
            },
        )
        .expect("sun times");
        assert!((minutes(rise) - (12 * 60 + 17)).abs() <= 3);
        assert!((minutes(set) - (21 * 60 + 32)).abs() <= 3);
    }

    #[test]
    fn polar_night_has_no_sunrise() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 21).expect("date");
        let location = Location {
            latitude: 78.22,
            longitude: 15.65,
        };
        assert!(sun_times(date, location).is_none());
    }
}
