use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::error::AvailabilityError;
use crate::models::UtcInterval;

/// Read-only source of each practice's IANA timezone.
#[async_trait]
pub trait PracticeTimezoneProvider: Send + Sync {
    async fn timezone(&self, practice_id: Uuid) -> Result<Option<String>, AvailabilityError>;
}

pub fn parse_timezone(name: &str) -> Result<Tz, AvailabilityError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| AvailabilityError::InvalidTimezone(name.to_string()))
}

/// Interprets a practice-local wall-clock reading as an absolute instant.
///
/// Ambiguous readings (fall-back hour) resolve to the earlier instant.
/// Readings inside a spring-forward gap keep the offset in force before
/// the gap, which moves them forward by the gap length.
pub fn local_to_utc(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let before_gap = local - Duration::hours(3);
            let offset_seconds = tz
                .offset_from_local_datetime(&before_gap)
                .earliest()
                .map(|offset| offset.fix().local_minus_utc())
                .unwrap_or(0);
            (local - Duration::seconds(offset_seconds as i64)).and_utc()
        }
    }
}

/// Absolute interval of a window occurring on `date`.
///
/// When `end_local < start_local` the end rolls to the next calendar day.
/// Returns `None` when the window collapses on that date, which only
/// happens when it sits entirely inside a DST gap.
pub fn window_interval(
    tz: &Tz,
    date: NaiveDate,
    start_local: NaiveTime,
    end_local: NaiveTime,
) -> Option<UtcInterval> {
    let end_date = if end_local < start_local { date.succ_opt()? } else { date };

    let start = local_to_utc(tz, date.and_time(start_local));
    let end = local_to_utc(tz, end_date.and_time(end_local));

    if start < end {
        Some(UtcInterval { start, end })
    } else {
        None
    }
}

pub fn local_date(tz: &Tz, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(tz).date_naive()
}

pub struct TimezoneResolver {
    provider: Arc<dyn PracticeTimezoneProvider>,
    fallback: Tz,
    require: bool,
}

impl std::fmt::Debug for TimezoneResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimezoneResolver")
            .field("fallback", &self.fallback)
            .field("require", &self.require)
            .finish_non_exhaustive()
    }
}

impl TimezoneResolver {
    pub fn new(provider: Arc<dyn PracticeTimezoneProvider>, config: &AppConfig) -> Result<Self, AvailabilityError> {
        Ok(Self {
            provider,
            fallback: parse_timezone(&config.default_practice_timezone)?,
            require: config.require_practice_timezone,
        })
    }

    pub async fn resolve(&self, practice_id: Uuid) -> Result<Tz, AvailabilityError> {
        match self.provider.timezone(practice_id).await? {
            Some(name) => parse_timezone(&name),
            None if self.require => Err(AvailabilityError::MissingTimezone(practice_id)),
            None => {
                debug!("No timezone for practice {}, using {}", practice_id, self.fallback);
                Ok(self.fallback)
            }
        }
    }
}

/// Fixed mapping, for local runs and tests.
#[derive(Default)]
pub struct StaticTimezoneProvider {
    zones: HashMap<Uuid, String>,
}

impl StaticTimezoneProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, practice_id: Uuid, timezone: &str) -> Self {
        self.zones.insert(practice_id, timezone.to_string());
        self
    }
}

#[async_trait]
impl PracticeTimezoneProvider for StaticTimezoneProvider {
    async fn timezone(&self, practice_id: Uuid) -> Result<Option<String>, AvailabilityError> {
        Ok(self.zones.get(&practice_id).cloned())
    }
}

/// Reads `practices.timezone` over PostgREST.
pub struct SupabasePracticeTimezones {
    supabase: Arc<SupabaseClient>,
}

impl SupabasePracticeTimezones {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl PracticeTimezoneProvider for SupabasePracticeTimezones {
    async fn timezone(&self, practice_id: Uuid) -> Result<Option<String>, AvailabilityError> {
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            "/rest/v1/practices",
            &[
                ("id", format!("eq.{}", practice_id)),
                ("select", "timezone".to_string()),
            ],
            None,
        ).await?;

        Ok(result
            .first()
            .and_then(|row| row["timezone"].as_str())
            .map(str::trim)
            .filter(|tz| !tz.is_empty())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn midnight_spanning_window_rolls_end_forward() {
        let tz = parse_timezone("America/Los_Angeles").unwrap();
        let interval = window_interval(&tz, date(2025, 1, 10), time(22, 0), time(2, 0)).unwrap();

        assert_eq!(interval.start, Utc.with_ymd_and_hms(2025, 1, 11, 6, 0, 0).unwrap());
        assert_eq!(interval.end, Utc.with_ymd_and_hms(2025, 1, 11, 10, 0, 0).unwrap());
        assert_eq!(local_date(&tz, interval.end), date(2025, 1, 11));
    }

    #[test]
    fn spring_forward_gap_shifts_forward() {
        let tz = parse_timezone("America/Los_Angeles").unwrap();
        // 02:30 does not exist on 2025-03-09; it lands on 03:30 PDT.
        let at = local_to_utc(&tz, date(2025, 3, 9).and_time(time(2, 30)));
        assert_eq!(at, Utc.with_ymd_and_hms(2025, 3, 9, 10, 30, 0).unwrap());
    }

    #[test]
    fn fall_back_ambiguity_takes_earliest() {
        let tz = parse_timezone("America/Los_Angeles").unwrap();
        // 01:30 happens twice on 2025-11-02; the PDT reading comes first.
        let at = local_to_utc(&tz, date(2025, 11, 2).and_time(time(1, 30)));
        assert_eq!(at, Utc.with_ymd_and_hms(2025, 11, 2, 8, 30, 0).unwrap());
    }

    #[test]
    fn window_inside_gap_collapses() {
        let tz = parse_timezone("America/Los_Angeles").unwrap();
        assert!(window_interval(&tz, date(2025, 3, 9), time(2, 0), time(3, 0)).is_none());
        assert!(window_interval(&tz, date(2025, 3, 10), time(2, 0), time(3, 0)).is_some());
    }

    #[test]
    fn unknown_zone_is_rejected() {
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
        assert!(parse_timezone("Europe/Berlin").is_ok());
    }
}
