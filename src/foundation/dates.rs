use std::fmt;

use chrono::{FixedOffset, NaiveDate, NaiveTime, Offset as _, TimeZone as _, Utc};

use crate::foundation::error::{DatelapseError, DatelapseResult};

/// Expand `[start, end]` into every calendar date, both endpoints included.
///
/// `start == end` yields exactly one date; `end < start` is a configuration error.
pub fn inclusive_date_range(start: NaiveDate, end: NaiveDate) -> DatelapseResult<Vec<NaiveDate>> {
    if end < start {
        return Err(DatelapseError::config(format!(
            "date range end {end} is before start {start}"
        )));
    }
    let len = (end - start).num_days() as usize + 1;
    Ok(start.iter_days().take(len).collect())
}

/// Fixed-offset timezone a job's dates are interpreted in.
///
/// Accepts `UTC`, `GMT`, `Z`, or a fixed offset such as `+02:00`, `-0530`, `UTC+01:00`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timezone(FixedOffset);

impl Timezone {
    /// Coordinated universal time.
    pub fn utc() -> Self {
        Self(Utc.fix())
    }

    /// Parse a timezone name or fixed offset.
    pub fn parse(raw: &str) -> DatelapseResult<Self> {
        let s = raw.trim();
        let upper = s.to_ascii_uppercase();
        if matches!(upper.as_str(), "UTC" | "GMT" | "Z" | "ETC/UTC" | "ETC/GMT") {
            return Ok(Self::utc());
        }

        let rest = upper
            .strip_prefix("UTC")
            .or_else(|| upper.strip_prefix("GMT"))
            .unwrap_or(&upper);
        let (sign, digits) = match rest.as_bytes().first() {
            Some(b'+') => (1, &rest[1..]),
            Some(b'-') => (-1, &rest[1..]),
            _ => {
                return Err(DatelapseError::config(format!(
                    "unsupported timezone '{raw}' (use UTC or a fixed offset like +02:00)"
                )));
            }
        };

        let digits: String = digits.chars().filter(|c| *c != ':').collect();
        if (digits.len() != 2 && digits.len() != 4) || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(DatelapseError::config(format!(
                "malformed timezone offset '{raw}'"
            )));
        }
        let hours: i32 = digits[..2].parse().unwrap_or(0);
        let minutes: i32 = if digits.len() == 4 {
            digits[2..].parse().unwrap_or(0)
        } else {
            0
        };
        if hours > 14 || minutes > 59 {
            return Err(DatelapseError::config(format!(
                "timezone offset '{raw}' is out of range"
            )));
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self)
            .ok_or_else(|| DatelapseError::config(format!("timezone offset '{raw}' is invalid")))
    }

    /// Underlying fixed offset.
    pub fn offset(self) -> FixedOffset {
        self.0
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self::utc()
    }
}

impl fmt::Display for Timezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.local_minus_utc();
        if secs == 0 {
            return f.write_str("UTC");
        }
        let sign = if secs < 0 { '-' } else { '+' };
        let secs = secs.abs();
        write!(f, "{sign}{:02}:{:02}", secs / 3600, (secs % 3600) / 60)
    }
}

impl TryFrom<String> for Timezone {
    type Error = DatelapseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Timezone> for String {
    fn from(value: Timezone) -> Self {
        value.to_string()
    }
}

/// Date format written with human tokens (`YYYY-MM-DD`), translated once to strftime.
///
/// Recognized tokens: `YYYY`, `MM`, `DD`, `HH`, `mm`, `ss`. Everything else is literal.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateFormat {
    raw: String,
    strftime: String,
}

const FORMAT_TOKENS: [(&str, &str); 6] = [
    ("YYYY", "%Y"),
    ("MM", "%m"),
    ("DD", "%d"),
    ("HH", "%H"),
    ("mm", "%M"),
    ("ss", "%S"),
];

impl DateFormat {
    /// Translate a token format into strftime form.
    pub fn parse(raw: &str) -> DatelapseResult<Self> {
        let mut strftime = String::with_capacity(raw.len() + 4);
        let mut saw_date_token = false;
        let mut rest = raw;

        'scan: while !rest.is_empty() {
            for (token, spec) in FORMAT_TOKENS {
                if let Some(tail) = rest.strip_prefix(token) {
                    saw_date_token |= matches!(token, "YYYY" | "MM" | "DD");
                    strftime.push_str(spec);
                    rest = tail;
                    continue 'scan;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                if c == '%' {
                    strftime.push_str("%%");
                } else {
                    strftime.push(c);
                }
            }
            rest = chars.as_str();
        }

        if !saw_date_token {
            return Err(DatelapseError::config(format!(
                "date format '{raw}' contains no YYYY/MM/DD token"
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            strftime,
        })
    }

    /// Render `date` at local midnight in `tz`.
    pub fn render(&self, date: NaiveDate, tz: Timezone) -> String {
        let local = date.and_time(NaiveTime::MIN);
        match tz.offset().from_local_datetime(&local).single() {
            Some(dt) => dt.format(&self.strftime).to_string(),
            None => local.format(&self.strftime).to_string(),
        }
    }

    /// Original token form.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Default for DateFormat {
    fn default() -> Self {
        Self {
            raw: "YYYY-MM-DD".to_string(),
            strftime: "%Y-%m-%d".to_string(),
        }
    }
}

impl TryFrom<String> for DateFormat {
    type Error = DatelapseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DateFormat> for String {
    fn from(value: DateFormat) -> Self {
        value.raw
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/dates.rs"]
mod tests;
