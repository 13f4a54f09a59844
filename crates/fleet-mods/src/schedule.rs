//! Mod update schedule.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use cron::Schedule;
use fleet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum Frequency {
    Daily,
    Weekly { weekday: Weekday },
    /// Every second week, counted from the last run.
    Biweekly { weekday: Weekday },
    /// Day of month, clamped to the month's last day.
    Monthly { day: u32 },
    /// Seconds-resolution cron expression as accepted by the `cron` crate.
    Cron { expression: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSchedule {
    pub enabled: bool,
    pub frequency: Frequency,
    /// UTC hour, ignored for cron schedules.
    #[serde(default)]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    #[serde(default = "default_test_before_apply")]
    pub test_before_apply: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

fn default_test_before_apply() -> bool {
    true
}

impl UpdateSchedule {
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Daily,
            hour,
            minute,
            test_before_apply: true,
            last_run: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 || self.minute > 59 {
            return Err(Error::InvalidConfig(format!(
                "invalid schedule time {:02}:{:02}",
                self.hour, self.minute
            )));
        }
        match &self.frequency {
            Frequency::Monthly { day } if !(1..=31).contains(day) => Err(Error::InvalidConfig(
                format!("invalid day of month {}", day),
            )),
            Frequency::Cron { expression } => parse_cron(expression).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// First run strictly after `after`. `None` when disabled.
    pub fn next_run(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if !self.enabled {
            return Ok(None);
        }
        self.validate()?;

        let next = match &self.frequency {
            Frequency::Daily => {
                let today = self.at(after.date_naive())?;
                if today > after {
                    today
                } else {
                    self.at(after.date_naive() + Duration::days(1))?
                }
            }
            Frequency::Weekly { weekday } => self.next_weekday(after, *weekday)?,
            Frequency::Biweekly { weekday } => {
                let mut next = self.next_weekday(after, *weekday)?;
                if let Some(last) = self.last_run {
                    while next - last < Duration::days(14) {
                        next += Duration::days(7);
                    }
                }
                next
            }
            Frequency::Monthly { day } => {
                let this_month = self.at(clamped_day(after.year(), after.month(), *day)?)?;
                if this_month > after {
                    this_month
                } else {
                    let (year, month) = if after.month() == 12 {
                        (after.year() + 1, 1)
                    } else {
                        (after.year(), after.month() + 1)
                    };
                    self.at(clamped_day(year, month, *day)?)?
                }
            }
            Frequency::Cron { expression } => {
                return Ok(parse_cron(expression)?.after(&after).next());
            }
        };

        Ok(Some(next))
    }

    /// Whether a run is due at `now`, given the last run.
    pub fn is_due(&self, now: DateTime<Utc>) -> Result<bool> {
        let Some(last) = self.last_run else {
            return Ok(self.enabled);
        };
        Ok(self.next_run(last)?.is_some_and(|next| next <= now))
    }

    fn at(&self, date: NaiveDate) -> Result<DateTime<Utc>> {
        let naive = date
            .and_hms_opt(self.hour, self.minute, 0)
            .ok_or_else(|| Error::InvalidConfig("invalid schedule time".to_string()))?;
        Ok(Utc.from_utc_datetime(&naive))
    }

    fn next_weekday(&self, after: DateTime<Utc>, weekday: Weekday) -> Result<DateTime<Utc>> {
        let today = after.date_naive();
        let offset = (7 + weekday.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64)
            % 7;
        let candidate = self.at(today + Duration::days(offset))?;
        if candidate > after {
            Ok(candidate)
        } else {
            Ok(candidate + Duration::days(7))
        }
    }
}

fn parse_cron(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression)
        .map_err(|e| Error::InvalidConfig(format!("invalid cron expression {}: {}", expression, e)))
}

fn clamped_day(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    (1..=day.min(31))
        .rev()
        .find_map(|d| NaiveDate::from_ymd_opt(year, month, d))
        .ok_or_else(|| Error::InvalidConfig(format!("invalid date {}-{}", year, month)))
}
