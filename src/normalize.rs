//! Text normalization for listing fields.
//!
//! Listing sites publish dates relative to "now" in Spanish ("Hace 3 horas",
//! "Ayer", "12 de marzo") and salaries as free text. These helpers turn them
//! into comparable values so a run can be filtered before it is persisted.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::types::JobOffer;

const MONTHS: [(&str, u32); 12] = [
    ("enero", 1),
    ("febrero", 2),
    ("marzo", 3),
    ("abril", 4),
    ("mayo", 5),
    ("junio", 6),
    ("julio", 7),
    ("agosto", 8),
    ("septiembre", 9),
    ("octubre", 10),
    ("noviembre", 11),
    ("diciembre", 12),
];

fn first_number(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Absolute timestamp for a relative Spanish date, `None` when it can't be read.
pub fn parse_relative_date(raw: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let raw = raw.trim().to_lowercase();
    if raw.is_empty() {
        return None;
    }

    // scraped numbers can be anything, out of range reads as unparseable
    let ago = |delta: Option<Duration>| now.checked_sub_signed(delta?);

    if raw.contains("ayer") {
        return ago(Duration::try_days(1));
    }
    if raw.contains("hoy") || raw.contains("momento") {
        return Some(now);
    }
    if raw.contains("minuto") {
        return ago(Duration::try_minutes(first_number(&raw)?));
    }
    if raw.contains("hora") {
        return ago(Duration::try_hours(first_number(&raw)?));
    }
    if raw.contains("día") || raw.contains("dia") {
        return ago(Duration::try_days(first_number(&raw)?));
    }

    let month = raw
        .split(|c: char| !c.is_alphabetic())
        .find_map(|word| MONTHS.iter().find(|(name, _)| *name == word))
        .map(|(_, number)| *number)?;
    let day = u32::try_from(first_number(&raw)?).ok()?;
    let mut date = NaiveDate::from_ymd_opt(now.year(), month, day)?;
    // "28 de diciembre" read in January belongs to last year
    if date > now.date() {
        date = NaiveDate::from_ymd_opt(now.year() - 1, month, day)?;
    }
    date.and_hms_opt(0, 0, 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalaryPeriod {
    Monthly,
    Hourly,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Salary {
    pub base: f64,
    pub period: SalaryPeriod,
    pub has_commission: bool,
}

/// Reads the first amount of a salary text. Texts without a period
/// ("Sueldo no mostrado por la empresa") yield a base of 0.
pub fn parse_salary(raw: &str) -> Salary {
    let raw = raw.trim().to_lowercase();
    let period = if raw.contains("mensual") || raw.contains("al mes") {
        SalaryPeriod::Monthly
    } else if raw.contains("hora") {
        SalaryPeriod::Hourly
    } else {
        SalaryPeriod::Unspecified
    };

    let base = match period {
        SalaryPeriod::Unspecified => 0.0,
        _ => first_amount(&raw).unwrap_or(0.0),
    };

    Salary {
        base,
        period,
        has_commission: raw.contains("comisión") || raw.contains("comision"),
    }
}

// "$12,500.50 - $15,000" -> 12500.5
fn first_amount(text: &str) -> Option<f64> {
    let amount: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != ',')
        .collect();
    amount.trim_end_matches('.').parse().ok()
}

/// Post-merge filter. Offers whose date or salary can't be read are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferFilter {
    pub max_age_days: Option<i64>,
    pub min_salary: Option<f64>,
}

impl OfferFilter {
    pub fn is_noop(&self) -> bool {
        self.max_age_days.is_none() && self.min_salary.is_none()
    }

    pub fn accepts(&self, offer: &JobOffer, now: NaiveDateTime) -> bool {
        let max_age = self.max_age_days.and_then(Duration::try_days);
        if let (Some(max_age), Some(raw)) = (max_age, &offer.overview.relative_date) {
            if let Some(published) = parse_relative_date(raw, now) {
                if now.signed_duration_since(published) > max_age {
                    return false;
                }
            }
        }
        if let (Some(min), Some(raw)) = (self.min_salary, &offer.details.salary) {
            let salary = parse_salary(raw);
            if salary.period != SalaryPeriod::Unspecified && salary.base < min {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        identity::OfferIdPolicy,
        types::{OfferDetails, OverviewRecord, RawRecord},
    };

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 27)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap()
    }

    #[test]
    fn relative_dates() {
        assert_eq!(
            parse_relative_date("Hace 3 horas", now()),
            Some(now() - Duration::hours(3))
        );
        assert_eq!(
            parse_relative_date("Hace 20 minutos", now()),
            Some(now() - Duration::minutes(20))
        );
        assert_eq!(
            parse_relative_date("Ayer", now()),
            Some(now() - Duration::days(1))
        );
        assert_eq!(
            parse_relative_date("Hace 5 días", now()),
            Some(now() - Duration::days(5))
        );
        assert_eq!(parse_relative_date("Hoy", now()), Some(now()));
    }

    #[test]
    fn month_names() {
        assert_eq!(
            parse_relative_date("Publicado el 12 de marzo", now()),
            NaiveDate::from_ymd_opt(2025, 3, 12).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(
            parse_relative_date("28 de diciembre", now()),
            NaiveDate::from_ymd_opt(2024, 12, 28).unwrap().and_hms_opt(0, 0, 0)
        );
    }

    #[test]
    fn unreadable_dates() {
        assert_eq!(parse_relative_date("", now()), None);
        assert_eq!(parse_relative_date("Recomendada", now()), None);
        assert_eq!(parse_relative_date("Hace horas", now()), None);
        assert_eq!(parse_relative_date("31 de febrero", now()), None);
    }

    #[test]
    fn out_of_range_amounts_are_unreadable() {
        assert_eq!(parse_relative_date("Hace 999999999 días", now()), None);
        assert_eq!(parse_relative_date("Hace 99999999999999 horas", now()), None);
        assert_eq!(
            parse_relative_date("Hace 99999999999999999999 minutos", now()),
            None
        );
    }

    #[test]
    fn salaries() {
        let s = parse_salary("$12,500.50 - $15,000 Mensual");
        assert_eq!(s.base, 12500.5);
        assert_eq!(s.period, SalaryPeriod::Monthly);
        assert!(!s.has_commission);

        let s = parse_salary("$150 por hora + comisión");
        assert_eq!(s.base, 150.0);
        assert_eq!(s.period, SalaryPeriod::Hourly);
        assert!(s.has_commission);

        let s = parse_salary("Sueldo no mostrado por la empresa");
        assert_eq!(s.base, 0.0);
        assert_eq!(s.period, SalaryPeriod::Unspecified);
    }

    fn offer(relative_date: &str, salary: Option<&str>) -> JobOffer {
        let mut raw = RawRecord::new();
        raw.insert("title".into(), "Dev".into());
        raw.insert("relative_date".into(), relative_date.into());
        JobOffer {
            overview: OverviewRecord::from_raw(&raw, "https://jobs.test", OfferIdPolicy::ContentHash),
            current_datetime: "2025-08-27 23:00:00".into(),
            details: OfferDetails {
                salary: salary.map(Into::into),
                ..OfferDetails::default()
            },
        }
    }

    #[test]
    fn filter_by_age_and_salary() {
        let filter = OfferFilter {
            max_age_days: Some(7),
            min_salary: Some(15_000.0),
        };
        assert!(filter.accepts(&offer("Hace 2 días", Some("$20,000 Mensual")), now()));
        assert!(!filter.accepts(&offer("Hace 10 días", Some("$20,000 Mensual")), now()));
        assert!(!filter.accepts(&offer("Ayer", Some("$9,000 Mensual")), now()));
        // unreadable values pass
        assert!(filter.accepts(&offer("Recomendada", Some("A convenir")), now()));
        assert!(filter.accepts(&offer("Ayer", None), now()));
        assert!(OfferFilter::default().is_noop());
    }

    #[test]
    fn filter_survives_absurd_values() {
        let filter = OfferFilter {
            max_age_days: Some(30),
            min_salary: None,
        };
        assert!(filter.accepts(&offer("Hace 999999999 días", None), now()));

        let unbounded = OfferFilter {
            max_age_days: Some(i64::MAX),
            min_salary: None,
        };
        assert!(unbounded.accepts(&offer("Hace 3 días", None), now()));
    }
}
