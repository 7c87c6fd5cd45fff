// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! MEP2 dates
//!
//! The protocol's zone abbreviations predate the IANA database and do not map
//! onto it; each one stands for a fixed offset. Old clients use them to mean
//! exactly that offset, so we honour the offset on input, keep the verbatim
//! tag for round-tripping, and hand out GMT renderings everywhere else.

use std::fmt;

use thiserror::Error;
use time::{Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset, Weekday};

/// MEP2 zone tags and their whole-hour offsets. MST appears with conflicting
/// offsets in period documentation; the North American -7 reading is the one
/// clients actually sent.
const ZONES: &[(&str, i8)] = &[
    ("AHS", -10),
    ("AHD", -9),
    ("YST", -9),
    ("YDT", -8),
    ("PST", -8),
    ("PDT", -7),
    ("MST", -7),
    ("MDT", -6),
    ("CST", -6),
    ("CDT", -5),
    ("EST", -5),
    ("EDT", -4),
    ("AST", -4),
    ("GMT", 0),
    ("BST", 1),
    ("WES", 1),
    ("WED", 2),
    ("EMT", 2),
    ("MTS", 3),
    ("MTD", 4),
    ("JST", 9),
    ("EAD", 10),
];

const WEEKDAYS: &[&str] = &["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

const MONTHS: &[(&str, Month)] = &[
    ("Jan", Month::January),
    ("Feb", Month::February),
    ("Mar", Month::March),
    ("Apr", Month::April),
    ("May", Month::May),
    ("Jun", Month::June),
    ("Jul", Month::July),
    ("Aug", Month::August),
    ("Sep", Month::September),
    ("Oct", Month::October),
    ("Nov", Month::November),
    ("Dec", Month::December),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("Failed to parse date and time")]
    Malformed,
    #[error("Invalid timezone specifier {0}")]
    UnknownZone(String),
}

/// A timestamp at minute precision, remembering the zone tag it arrived with.
#[derive(Debug, Clone)]
pub struct Date {
    orig_zone: String,
    local: OffsetDateTime,
    utc: OffsetDateTime,
}

/// `Ddd Mmm dd, yyyy hh:mm AM ZZZ` and nothing else.
const DATE_LEN: usize = 29;

impl Date {
    pub fn parse(line: &str) -> Result<Date, DateError> {
        let b = line.as_bytes();
        if b.len() != DATE_LEN {
            return Err(DateError::Malformed);
        }

        let weekday = &line[0..3];
        if !WEEKDAYS.iter().any(|wd| wd.eq_ignore_ascii_case(weekday)) {
            return Err(DateError::Malformed);
        }

        let month = &line[4..7];
        let month = MONTHS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(month))
            .map(|&(_, month)| month)
            .ok_or(DateError::Malformed)?;

        if b[3] != b' ' || b[7] != b' ' || b[10] != b',' || b[11] != b' ' || b[16] != b' '
            || b[19] != b':' || b[22] != b' ' || b[25] != b' '
        {
            return Err(DateError::Malformed);
        }

        let day: u8 = parse_digits(&line[8..10])?;
        let year: i32 = parse_digits(&line[12..16])?;
        let hour: u8 = parse_digits(&line[17..19])?;
        let minute: u8 = parse_digits(&line[20..22])?;

        // 12-hour clock: 12 AM is midnight, 12 PM is noon
        if hour < 1 || hour > 12 {
            return Err(DateError::Malformed);
        }
        let hour = match &line[23..25] {
            meridiem if meridiem.eq_ignore_ascii_case("AM") => hour % 12,
            meridiem if meridiem.eq_ignore_ascii_case("PM") => hour % 12 + 12,
            _ => return Err(DateError::Malformed),
        };

        let zone = &line[26..29];
        let offset = ZONES
            .iter()
            .find(|&&(tag, _)| tag == zone)
            .map(|&(_, hours)| hours)
            .ok_or_else(|| DateError::UnknownZone(zone.to_owned()))?;
        let offset = UtcOffset::from_whole_seconds(i32::from(offset) * 3600)
            .expect("zone table offsets are valid");

        let date = time::Date::from_calendar_date(year, month, day)
            .map_err(|_| DateError::Malformed)?;
        let time = Time::from_hms(hour, minute, 0).map_err(|_| DateError::Malformed)?;

        let local = PrimitiveDateTime::new(date, time).assume_offset(offset);

        Ok(Date {
            orig_zone: zone.to_owned(),
            local,
            utc: local.to_offset(UtcOffset::UTC),
        })
    }

    /// The instant in UTC, at minute precision.
    pub fn utc(&self) -> OffsetDateTime {
        self.utc
    }

    pub fn orig_zone(&self) -> &str {
        &self.orig_zone
    }

    /// Render in UTC. Clients only ever see GMT; the original zone label is
    /// not theirs to learn back.
    pub fn to_utc_string(&self) -> String {
        format!("{} GMT", Rendered(self.utc))
    }

    /// Render in the zone the date arrived with.
    pub fn to_orig_string(&self) -> String {
        format!("{} {}", Rendered(self.local), self.orig_zone)
    }
}

impl PartialEq for Date {
    fn eq(&self, rhs: &Date) -> bool {
        self.orig_zone == rhs.orig_zone && self.utc == rhs.utc
    }
}

impl Eq for Date {}

fn parse_digits<T: std::str::FromStr>(text: &str) -> Result<T, DateError> {
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DateError::Malformed);
    }
    text.parse().map_err(|_| DateError::Malformed)
}

struct Rendered(OffsetDateTime);

impl fmt::Display for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let weekday = match self.0.weekday() {
            Weekday::Sunday => "Sun",
            Weekday::Monday => "Mon",
            Weekday::Tuesday => "Tue",
            Weekday::Wednesday => "Wed",
            Weekday::Thursday => "Thu",
            Weekday::Friday => "Fri",
            Weekday::Saturday => "Sat",
        };

        let month = MONTHS[self.0.month() as usize - 1].0;

        let (hour, meridiem) = match self.0.hour() {
            0 => (12, "AM"),
            12 => (12, "PM"),
            hour if hour < 12 => (hour, "AM"),
            hour => (hour - 12, "PM"),
        };

        write!(
            f,
            "{weekday} {month} {:02}, {} {hour:02}:{:02} {meridiem}",
            self.0.day(),
            self.0.year(),
            self.0.minute(),
        )
    }
}
