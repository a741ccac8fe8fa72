use chrono::{Datelike, Duration, NaiveDate};
use std::collections::BTreeSet;
use std::fmt::Debug;

use crate::config::ForecastingConfig;
use crate::errors::ForecastError;

/// Public-holiday membership test for the deployment's country.
pub trait HolidayCalendar: Send + Sync + Debug {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

/// Country rule sets with a built-in calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Country {
    #[strum(serialize = "ke", serialize = "kenya")]
    Kenya,
    /// No public holidays beyond the configured extra dates
    #[strum(serialize = "none", serialize = "")]
    None,
}

// (month, day)
const KENYA_FIXED: [(u32, u32); 8] = [
    (1, 1),   // New Year's Day
    (5, 1),   // Labour Day
    (6, 1),   // Madaraka Day
    (10, 10), // Utamaduni Day
    (10, 20), // Mashujaa Day
    (12, 12), // Jamhuri Day
    (12, 25), // Christmas Day
    (12, 26), // Boxing Day
];

#[derive(Debug, Clone)]
pub struct CountryCalendar {
    country: Country,
    extra_dates: BTreeSet<NaiveDate>,
}

impl CountryCalendar {
    pub fn new(country: Country, extra_dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            country,
            extra_dates: extra_dates.into_iter().collect(),
        }
    }

    pub fn from_config(cfg: &ForecastingConfig) -> Result<Self, ForecastError> {
        let country = cfg
            .holiday_country
            .trim()
            .parse::<Country>()
            .map_err(|_| {
                ForecastError::ConfigError(format!(
                    "unsupported holiday country '{}'",
                    cfg.holiday_country
                ))
            })?;
        Ok(Self::new(country, cfg.extra_holidays.iter().copied()))
    }

    fn is_country_holiday(&self, date: NaiveDate) -> bool {
        match self.country {
            Country::None => false,
            Country::Kenya => {
                if KENYA_FIXED.contains(&(date.month(), date.day())) {
                    return true;
                }
                match easter_sunday(date.year()) {
                    Some(easter) => {
                        date == easter - Duration::days(2) || date == easter + Duration::days(1)
                    }
                    None => false,
                }
            }
        }
    }
}

impl HolidayCalendar for CountryCalendar {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.extra_dates.contains(&date) || self.is_country_holiday(date)
    }
}

/// Western Easter Sunday (anonymous Gregorian computus).
pub fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case(2019, ymd(2019, 4, 21))]
    #[case(2024, ymd(2024, 3, 31))]
    #[case(2025, ymd(2025, 4, 20))]
    fn computes_easter(#[case] year: i32, #[case] expected: NaiveDate) {
        assert_eq!(easter_sunday(year), Some(expected));
    }

    #[rstest]
    #[case(ymd(2024, 1, 1), true)]
    #[case(ymd(2024, 6, 1), true)]
    #[case(ymd(2024, 10, 20), true)]
    #[case(ymd(2024, 12, 12), true)]
    #[case(ymd(2024, 3, 29), true)] // Good Friday
    #[case(ymd(2024, 4, 1), true)] // Easter Monday
    #[case(ymd(2024, 3, 31), false)]
    #[case(ymd(2024, 7, 15), false)]
    fn kenya_calendar(#[case] date: NaiveDate, #[case] expected: bool) {
        let cal = CountryCalendar::new(Country::Kenya, []);
        assert_eq!(cal.is_holiday(date), expected);
    }

    #[test]
    fn extra_dates_apply_without_a_country() {
        let extra = ymd(2024, 7, 15);
        let cal = CountryCalendar::new(Country::None, [extra]);
        assert!(cal.is_holiday(extra));
        assert!(!cal.is_holiday(ymd(2024, 1, 1)));
    }

    #[rstest]
    #[case("KE", Country::Kenya)]
    #[case("kenya", Country::Kenya)]
    #[case("Kenya", Country::Kenya)]
    #[case("none", Country::None)]
    #[case("NONE", Country::None)]
    #[case("", Country::None)]
    fn parses_country_codes(#[case] code: &str, #[case] expected: Country) {
        assert_eq!(code.parse::<Country>().unwrap(), expected);
    }

    #[test]
    fn unknown_country_is_a_config_error() {
        assert!("FR".parse::<Country>().is_err());
        let cfg = ForecastingConfig {
            holiday_country: "FR".to_string(),
            ..ForecastingConfig::default()
        };
        assert!(matches!(
            CountryCalendar::from_config(&cfg),
            Err(ForecastError::ConfigError(_))
        ));
    }
}
