// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Due-time computation for scheduled job types.
//!
//! Every frequency maps to a 5-field Unix cron expression, evaluated in the
//! scheduler timezone strictly after the job's last execution.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use vmraid_server_config::SchedulerConfig;
use vmraid_server_db::{Frequency, ScheduledJobType};

use crate::error::{JobError, Result};

pub const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
	pub scheduler_interval_secs: u64,
	pub timezone: Tz,
}

impl Default for ScheduleSettings {
	fn default() -> Self {
		Self {
			scheduler_interval_secs: DEFAULT_SCHEDULER_INTERVAL_SECS,
			timezone: Tz::UTC,
		}
	}
}

impl ScheduleSettings {
	pub fn new(scheduler_interval_secs: u64, timezone: Tz) -> Self {
		Self {
			scheduler_interval_secs,
			timezone,
		}
	}

	pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
		Ok(Self::new(
			config.scheduler_interval_secs,
			parse_timezone(&config.timezone)?,
		))
	}

	/// Minutes between runs of `All` jobs. Zero falls back to the default
	/// interval and the result is never below one minute.
	pub fn interval_minutes(&self) -> u64 {
		let secs = match self.scheduler_interval_secs {
			0 => DEFAULT_SCHEDULER_INTERVAL_SECS,
			secs => secs,
		};
		(secs / 60).max(1)
	}
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
	name.parse()
		.map_err(|_| JobError::InvalidSchedule(format!("invalid timezone: {name}")))
}

/// `2000-01-01 00:00:00`, used for jobs that never ran.
pub fn default_last_execution() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
		.single()
		.unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The fixed expression for `frequency`; `Cron` has none.
pub fn frequency_cron(frequency: Frequency, interval_minutes: u64) -> Option<String> {
	let expr = match frequency {
		Frequency::Yearly | Frequency::Annual => "0 0 1 1 *",
		Frequency::Monthly | Frequency::MonthlyLong => "0 0 1 * *",
		Frequency::Weekly | Frequency::WeeklyLong => "0 0 * * 0",
		Frequency::Daily | Frequency::DailyLong => "0 0 * * *",
		Frequency::Hourly | Frequency::HourlyLong => "0 * * * *",
		Frequency::All => return Some(format!("0/{interval_minutes} * * * *")),
		Frequency::Cron => return None,
	};
	Some(expr.to_string())
}

/// The explicit cron format when set, otherwise the frequency's mapping.
///
/// `All` reads the interval on every call so a changed interval applies at
/// the next check.
pub fn cron_format(job: &ScheduledJobType, settings: &ScheduleSettings) -> Result<String> {
	if let Some(expr) = job.cron_format.as_deref().filter(|e| !e.trim().is_empty()) {
		return Ok(expr.trim().to_string());
	}
	frequency_cron(job.frequency, settings.interval_minutes()).ok_or_else(|| {
		JobError::InvalidSchedule(format!("{} has frequency Cron but no cron format", job.method))
	})
}

pub fn get_next_execution(job: &ScheduledJobType, settings: &ScheduleSettings) -> Result<DateTime<Utc>> {
	let expr = cron_format(job, settings)?;
	let after = job.last_execution.unwrap_or_else(default_last_execution);
	next_occurrence(&expr, after, settings.timezone)
}

pub fn is_event_due(
	job: &ScheduledJobType,
	settings: &ScheduleSettings,
	now: DateTime<Utc>,
) -> Result<bool> {
	Ok(get_next_execution(job, settings)? <= now)
}

pub fn validate_cron_expression(expression: &str) -> Result<()> {
	parse_schedule(expression).map(|_| ())
}

/// First occurrence of `expression` strictly after `after`, evaluated in `tz`.
pub fn next_occurrence(expression: &str, after: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>> {
	let schedule = parse_schedule(expression)?;
	let local_after = after.with_timezone(&tz);
	let next = schedule.after(&local_after).ok_or_else(|| {
		JobError::InvalidSchedule(format!("no occurrence of {expression} after {after}"))
	})?;
	Ok(next.with_timezone(&Utc))
}

/// One or two `cron` crate schedules whose earliest occurrence wins.
///
/// Unix cron fires when either a restricted day of month or a restricted
/// day of week matches, while the `cron` crate requires both. Such
/// expressions are split into a day-of-month and a day-of-week schedule.
struct CronSchedule {
	schedules: Vec<Schedule>,
}

impl CronSchedule {
	fn after(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
		self.schedules
			.iter()
			.filter_map(|schedule| schedule.after(after).next())
			.min()
	}
}

fn parse_schedule(expression: &str) -> Result<CronSchedule> {
	let schedules = to_cron_crate_formats(expression)?
		.iter()
		.map(|converted| {
			Schedule::from_str(converted)
				.map_err(|e| JobError::InvalidSchedule(format!("{expression}: {e}")))
		})
		.collect::<Result<Vec<_>>>()?;
	Ok(CronSchedule { schedules })
}

fn is_restricted(field: &str) -> bool {
	!(field.starts_with('*') || field == "?")
}

/// 5-field Unix cron to the 7-field form of the `cron` crate: seconds are
/// pinned to 0, any year, and weekdays renumbered from 0-7 (Sunday = 0 or 7)
/// to 1-7 (Sunday = 1). A restricted day of month together with a restricted
/// day of week yields one expression per day field. Longer expressions are
/// passed through.
fn to_cron_crate_formats(expression: &str) -> Result<Vec<String>> {
	let fields: Vec<&str> = expression.split_whitespace().collect();
	if fields.len() != 5 {
		return Ok(vec![expression.to_string()]);
	}
	let (minute, hour, day, month) = (fields[0], fields[1], fields[2], fields[3]);
	let weekday = convert_weekday_field(fields[4])?;

	if is_restricted(day) && is_restricted(fields[4]) {
		return Ok(vec![
			format!("0 {minute} {hour} {day} {month} * *"),
			format!("0 {minute} {hour} * {month} {weekday} *"),
		]);
	}
	Ok(vec![format!("0 {minute} {hour} {day} {month} {weekday} *")])
}

/// Numeric items are expanded into an explicit day set so ranges ending on
/// 7 and stepped ranges survive the renumbering. Named days pass through.
fn convert_weekday_field(field: &str) -> Result<String> {
	let mut days = BTreeSet::new();
	let mut named = Vec::new();

	for item in field.split(',') {
		let (base, step) = match item.split_once('/') {
			Some((base, step)) => (base, Some(step)),
			None => (item, None),
		};

		if base.chars().any(|c| c.is_ascii_alphabetic()) {
			named.push(item.to_string());
			continue;
		}
		if (base == "*" || base == "?") && step.is_none() {
			named.push(base.to_string());
			continue;
		}

		let step = match step {
			None => 1,
			Some(step) => match step.parse::<u8>() {
				Ok(step @ 1..=7) => step,
				_ => {
					return Err(JobError::InvalidSchedule(format!(
						"invalid day of week step: {item}"
					)));
				}
			},
		};
		let (start, end) = match base.split_once('-') {
			_ if base == "*" || base == "?" => (0, 6),
			Some((start, end)) => (parse_weekday(start)?, parse_weekday(end)?),
			None if step > 1 => (parse_weekday(base)?, 6),
			None => {
				let day = parse_weekday(base)?;
				(day, day)
			}
		};
		if start > end {
			return Err(JobError::InvalidSchedule(format!(
				"invalid day of week range: {item}"
			)));
		}
		days.extend((start..=end).step_by(usize::from(step)).map(|day| day % 7 + 1));
	}

	Ok(days
		.iter()
		.map(u8::to_string)
		.chain(named)
		.collect::<Vec<_>>()
		.join(","))
}

fn parse_weekday(value: &str) -> Result<u8> {
	match value.parse::<u8>() {
		Ok(day @ 0..=7) => Ok(day),
		_ => Err(JobError::InvalidSchedule(format!("invalid day of week: {value}"))),
	}
}
