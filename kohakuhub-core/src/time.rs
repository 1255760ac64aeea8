// Copyright 2025 KohakuHub Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! UTC datetime formatting.
//!
//! All timestamps are stored and served in the wire format
//! `YYYY-MM-DDTHH:MM:SS.ffffffZ`; dates as `YYYY-MM-DD`.

use chrono::{DateTime, NaiveDate, Utc};

pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format a datetime in the hub wire format.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Format a date in the hub wire format.
pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Current UTC time in the wire format.
pub fn now_string() -> String {
    format_datetime(Utc::now())
}

/// Current UTC date in the wire format.
pub fn now_date_string() -> String {
    format_date(Utc::now().date_naive())
}

/// Parse a wire-format datetime back into `DateTime<Utc>`.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Unix timestamp (seconds) for "now + `days` days".
pub fn unix_timestamp_in_days(days: i64) -> i64 {
    (Utc::now() + chrono::Duration::days(days)).timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wire_format_has_microseconds_and_z() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 45).unwrap();
        assert_eq!(format_datetime(dt), "2025-01-15T10:30:45.000000Z");
    }

    #[test]
    fn wire_format_parses_back() {
        let s = now_string();
        let parsed = parse_datetime(&s).unwrap();
        assert_eq!(format_datetime(parsed), s);
    }
}
