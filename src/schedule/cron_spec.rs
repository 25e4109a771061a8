//! Six-field cron specifications (seconds first).
//!
//! A [`CronSpec`] is validated field by field when it is built, either from
//! discrete fields or from the whitespace-separated string form. Both paths
//! normalise into the same value, so equivalent inputs compare equal and
//! produce the same [`cron::Schedule`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// One comma-separated part of a field: `*`, `N`, `N-M`, optionally `/STEP`.
static PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\*)|(\d{1,2})(?:-(\d{1,2}))?)(?:/(\d{1,2}))?$").unwrap()
});

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// The six positions of a cron expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronField {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl CronField {
    pub const ALL: [CronField; 6] = [
        Self::Second,
        Self::Minute,
        Self::Hour,
        Self::DayOfMonth,
        Self::Month,
        Self::DayOfWeek,
    ];

    /// Inclusive value range accepted for this field.
    pub fn bounds(&self) -> (u8, u8) {
        match self {
            Self::Second | Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::DayOfMonth => (1, 31),
            Self::Month => (1, 12),
            Self::DayOfWeek => (0, 6),
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day of month",
            Self::Month => "month",
            Self::DayOfWeek => "day of week",
        };
        write!(f, "{s}")
    }
}

/// Raw cron fields as supplied by a caller. Missing fields mean `*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronFields {
    pub second: Option<String>,
    pub minute: Option<String>,
    pub hour: Option<String>,
    pub day_of_month: Option<String>,
    pub month: Option<String>,
    pub day_of_week: Option<String>,
}

/// A validated six-field cron specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CronSpec {
    fields: [String; 6],
}

impl CronSpec {
    /// Build a spec from discrete fields, validating each one.
    pub fn from_fields(fields: CronFields) -> Result<Self, JobError> {
        let CronFields {
            second,
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        } = fields;
        Self::from_parts([second, minute, hour, day_of_month, month, day_of_week])
    }

    fn from_parts(parts: [Option<String>; 6]) -> Result<Self, JobError> {
        let mut normalised: [String; 6] = Default::default();
        for ((slot, field), raw) in normalised.iter_mut().zip(CronField::ALL).zip(parts) {
            let value = raw
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "*".to_string());
            expand(field, &value)?;
            *slot = value;
        }
        Ok(Self { fields: normalised })
    }

    /// Raw text of one field.
    pub fn field(&self, field: CronField) -> &str {
        &self.fields[field as usize]
    }

    /// Expanded values of one field, in ascending order.
    pub fn values(&self, field: CronField) -> BTreeSet<u8> {
        // Validated at construction.
        expand(field, self.field(field)).unwrap_or_default()
    }

    /// Compile into a [`cron::Schedule`].
    ///
    /// Restricted fields are rendered as explicit value lists; day-of-week
    /// numbers (0 = Sunday) are rendered as day names so the schedule does
    /// not depend on the cron crate's numeric weekday convention.
    pub fn schedule(&self) -> Result<cron::Schedule, JobError> {
        let rendered: Vec<String> = CronField::ALL
            .iter()
            .map(|&field| {
                let raw = self.field(field);
                if raw == "*" {
                    return raw.to_string();
                }
                let values = self.values(field);
                match field {
                    CronField::DayOfWeek => values
                        .iter()
                        .map(|v| DAY_NAMES[*v as usize])
                        .collect::<Vec<_>>()
                        .join(","),
                    _ => values
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                }
            })
            .collect();
        let expression = rendered.join(" ");
        cron::Schedule::from_str(&expression)
            .map_err(|e| JobError::invalid_cron_expression(&format!("{expression}: {e}")))
    }
}

impl FromStr for CronSpec {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != 6 {
            return Err(JobError::invalid_cron_expression(s));
        }
        let mut owned: [Option<String>; 6] = Default::default();
        for (slot, part) in owned.iter_mut().zip(parts) {
            *slot = Some(part.to_string());
        }
        Self::from_parts(owned)
    }
}

impl fmt::Display for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join(" "))
    }
}

impl Serialize for CronSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CronSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Expand one field into the set of values it matches.
fn expand(field: CronField, raw: &str) -> Result<BTreeSet<u8>, JobError> {
    let (min, max) = field.bounds();
    let invalid = || JobError::invalid_cron_field(field, raw);
    let mut values = BTreeSet::new();

    for part in raw.split(',') {
        let caps = PART.captures(part).ok_or_else(invalid)?;
        let number = |idx: usize| -> Result<Option<u8>, JobError> {
            caps.get(idx)
                .map(|m| m.as_str().parse::<u8>().map_err(|_| invalid()))
                .transpose()
        };

        let step = match number(4)? {
            Some(0) => return Err(invalid()),
            Some(step) => step,
            None => 1,
        };

        let (start, end) = if caps.get(1).is_some() {
            (min, max)
        } else {
            let start = number(2)?.ok_or_else(invalid)?;
            // `N/STEP` runs from N to the end of the range.
            let end = match number(3)? {
                Some(end) => end,
                None if caps.get(4).is_some() => max,
                None => start,
            };
            (start, end)
        };

        if start < min || end > max || start > end {
            return Err(invalid());
        }

        values.extend((start..=end).step_by(step as usize));
    }

    Ok(values)
}
