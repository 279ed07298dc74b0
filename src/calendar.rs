use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};

/// Week and month coordinates of a calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarKey {
    pub iso_week: u32,
    pub iso_week_year: i32,
    /// Zero-based month (January = 0).
    pub month: u32,
    pub year: i32,
}

impl CalendarKey {
    pub fn week_key(&self) -> String {
        format!("{}-W{:02}", self.iso_week_year, self.iso_week)
    }

    pub fn month_key(&self) -> String {
        format!("{}-{:02}", self.year, self.month + 1)
    }
}

pub fn calendar_key(date: NaiveDate) -> CalendarKey {
    let week = date.iso_week();
    CalendarKey {
        iso_week: week.week(),
        iso_week_year: week.year(),
        month: date.month0(),
        year: date.year(),
    }
}

/// Parses a record date into its UTC calendar date.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps and naive `YYYY-MM-DDTHH:MM:SS`
/// timestamps with optional fractional seconds.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc).date_naive());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|timestamp| timestamp.date())
}

/// Month-name locale for timeline labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    #[default]
    En,
    Fr,
    De,
    Es,
}

const MONTHS_EN: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const MONTHS_FR: [&str; 12] = [
    "janv.", "févr.", "mars", "avr.", "mai", "juin", "juil.", "août", "sept.", "oct.", "nov.",
    "déc.",
];
const MONTHS_DE: [&str; 12] = [
    "Jan.", "Feb.", "März", "Apr.", "Mai", "Juni", "Juli", "Aug.", "Sept.", "Okt.", "Nov.",
    "Dez.",
];
const MONTHS_ES: [&str; 12] = [
    "ene", "feb", "mar", "abr", "may", "jun", "jul", "ago", "sept", "oct", "nov", "dic",
];

impl Locale {
    /// Short month name for a zero-based month.
    pub fn short_month(self, month0: u32) -> &'static str {
        let names = match self {
            Locale::En => &MONTHS_EN,
            Locale::Fr => &MONTHS_FR,
            Locale::De => &MONTHS_DE,
            Locale::Es => &MONTHS_ES,
        };
        names[(month0 % 12) as usize]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported locale '{0}' (expected en, fr, de or es)")]
pub struct UnsupportedLocale(pub String);

impl FromStr for Locale {
    type Err = UnsupportedLocale;

    /// Matches on the language subtag, so `fr-CA` and `fr_FR` both select French.
    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let language = tag
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match language.as_str() {
            "en" => Ok(Locale::En),
            "fr" => Ok(Locale::Fr),
            "de" => Ok(Locale::De),
            "es" => Ok(Locale::Es),
            _ => Err(UnsupportedLocale(tag.to_string())),
        }
    }
}

/// Steps a `(year, zero-based month)` pair back by `months`.
pub fn months_before(year: i32, month0: u32, months: u32) -> (i32, u32) {
    let index = year * 12 + month0 as i32 - months as i32;
    (index.div_euclid(12), index.rem_euclid(12) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn january_first_sunday_belongs_to_previous_iso_year() {
        let key = calendar_key(date(2023, 1, 1));
        assert_eq!(key.iso_week, 52);
        assert_eq!(key.iso_week_year, 2022);
        assert_eq!(key.year, 2023);
        assert_eq!(key.month, 0);
        assert_eq!(key.week_key(), "2022-W52");
        assert_eq!(key.month_key(), "2023-01");
    }

    #[test]
    fn late_december_can_open_next_iso_year() {
        let key = calendar_key(date(2024, 12, 30));
        assert_eq!(key.week_key(), "2025-W01");
        assert_eq!(key.month_key(), "2024-12");
    }

    #[test]
    fn monday_keys_into_its_own_week() {
        let key = calendar_key(date(2024, 3, 4));
        assert_eq!(key.week_key(), "2024-W10");
        assert_eq!(key.month_key(), "2024-03");
    }

    #[test]
    fn fifty_three_week_years_are_numbered() {
        assert_eq!(calendar_key(date(2020, 12, 31)).week_key(), "2020-W53");
        assert_eq!(calendar_key(date(2021, 1, 3)).week_key(), "2020-W53");
    }

    #[test]
    fn parses_supported_date_shapes() {
        assert_eq!(parse_record_date("2024-03-04"), Some(date(2024, 3, 4)));
        assert_eq!(
            parse_record_date("2024-03-04T23:30:00-02:00"),
            Some(date(2024, 3, 5))
        );
        assert_eq!(
            parse_record_date("2024-03-04T10:15:00.250Z"),
            Some(date(2024, 3, 4))
        );
        assert_eq!(
            parse_record_date("2024-03-04T10:15:00"),
            Some(date(2024, 3, 4))
        );
        assert_eq!(
            parse_record_date("2024-03-04 10:15:00"),
            Some(date(2024, 3, 4))
        );
    }

    #[test]
    fn rejects_malformed_dates() {
        assert_eq!(parse_record_date(""), None);
        assert_eq!(parse_record_date("not a date"), None);
        assert_eq!(parse_record_date("2024-02-30"), None);
    }

    #[test]
    fn locale_tags_select_language() {
        assert_eq!("en-US".parse::<Locale>(), Ok(Locale::En));
        assert_eq!("fr_FR".parse::<Locale>(), Ok(Locale::Fr));
        assert_eq!("DE".parse::<Locale>(), Ok(Locale::De));
        assert!("ja-JP".parse::<Locale>().is_err());
        assert_eq!(Locale::Fr.short_month(7), "août");
        assert_eq!(Locale::En.short_month(0), "Jan");
    }

    #[test]
    fn months_before_wraps_years() {
        assert_eq!(months_before(2024, 1, 5), (2023, 8));
        assert_eq!(months_before(2024, 11, 0), (2024, 11));
        assert_eq!(months_before(2024, 0, 24), (2022, 0));
    }
}
