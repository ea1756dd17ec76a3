use chrono::{DateTime, Datelike, TimeZone};

/// English ordinal for a day number, e.g. `1st`, `12th`, `23rd`, `112th`.
pub fn ordinal(n: u32) -> String {
    let suffix = if (10..=20).contains(&(n % 100)) {
        "th"
    } else {
        match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{n}{suffix}")
}

/// Date label stored in history entries: `4th Jul 2018`.
pub fn date_label<Tz: TimeZone>(moment: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{} {} {}",
        ordinal(moment.day()),
        moment.format("%b"),
        moment.year()
    )
}

/// Time label stored in history entries: `HH:MM`.
pub fn time_label<Tz: TimeZone>(moment: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    moment.format("%H:%M").to_string()
}
