//! Date-text parsing for listing rows.
//!
//! Sources write dates three ways: a relative marker (today/yesterday, German
//! on the live pages), `day.month.` with the year implied, or
//! `day.month.year` with a two- or four-digit year. An implied year resolves
//! to the most recent year that does not put the date in the future. `today`
//! is injected so resolution is deterministic under test.

use std::sync::OnceLock;

use chrono::{Datelike, Days, NaiveDate};
use regex::Regex;

const TODAY_MARKERS: [&str; 2] = ["Heute", "Today"];
const YESTERDAY_MARKERS: [&str; 2] = ["Gestern", "Yesterday"];

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{2,4})?").expect("date pattern is valid")
    })
}

/// Parse a listing date text. `None` means the text carries no usable date;
/// the caller decides whether that skips the row or falls back to a carried
/// date.
pub fn extract_listing_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if TODAY_MARKERS.iter().any(|m| text.contains(m)) {
        return Some(today);
    }
    if YESTERDAY_MARKERS.iter().any(|m| text.contains(m)) {
        return today.checked_sub_days(Days::new(1));
    }

    let captures = date_pattern().captures(text)?;
    let day: u32 = captures.get(1)?.as_str().parse().ok()?;
    let month: u32 = captures.get(2)?.as_str().parse().ok()?;

    match captures.get(3) {
        Some(year_text) => {
            let mut year: i32 = year_text.as_str().parse().ok()?;
            if year_text.as_str().len() == 2 {
                year += 2000;
            }
            NaiveDate::from_ymd_opt(year, month, day)
        }
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            if this_year <= today {
                Some(this_year)
            } else {
                NaiveDate::from_ymd_opt(today.year() - 1, month, day)
            }
        }
    }
}

/// Render a date the way the sources and their search queries write it.
pub fn listing_date_text(date: NaiveDate) -> String {
    format!("{}.{}.{}", date.day(), date.month(), date.year())
}
