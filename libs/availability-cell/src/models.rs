use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AvailabilityError;

/// Half-open `[start, end)` interval in absolute time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtcInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UtcInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AvailabilityError> {
        if start >= end {
            return Err(AvailabilityError::Validation(format!(
                "Interval start {} must be before end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// `a.start < b.end && b.start < a.end`; touching intervals do not overlap.
    pub fn overlaps(&self, other: &UtcInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub weekdays: Vec<Weekday>,
    pub effective_from: NaiveDate,
    pub effective_until: Option<NaiveDate>,
}

impl RecurrenceRule {
    pub fn weekly(weekdays: Vec<Weekday>, effective_from: NaiveDate) -> Self {
        Self {
            weekdays,
            effective_from,
            effective_until: None,
        }
    }

    pub fn until(mut self, effective_until: NaiveDate) -> Self {
        self.effective_until = Some(effective_until);
        self
    }

    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        date >= self.effective_from
            && self.effective_until.map_or(true, |until| date <= until)
            && self.weekdays.contains(&date.weekday())
    }

    pub fn validate(&self) -> Result<(), AvailabilityError> {
        if self.weekdays.is_empty() {
            return Err(AvailabilityError::Validation(
                "Recurrence rule must name at least one weekday".to_string(),
            ));
        }
        if let Some(until) = self.effective_until {
            if until < self.effective_from {
                return Err(AvailabilityError::Validation(format!(
                    "Recurrence ends ({}) before it starts ({})",
                    until, self.effective_from
                )));
            }
        }
        Ok(())
    }
}

/// One-off windows pin a calendar date; recurring windows carry a weekly rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowKind {
    OneOff { date: NaiveDate },
    Recurring(RecurrenceRule),
}

impl WindowKind {
    pub fn is_recurring(&self) -> bool {
        matches!(self, WindowKind::Recurring(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub practice_id: Uuid,
    pub vet_user_id: Uuid,
    pub start_local: NaiveTime,
    pub end_local: NaiveTime,
    pub timezone: String,
    pub spans_midnight: bool,
    pub kind: WindowKind,
    /// Anchor occurrence: the one-off date, or the first recurring date.
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub is_active: bool,
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityWindow {
    pub fn interval(&self) -> UtcInterval {
        UtcInterval {
            start: self.start_utc,
            end: self.end_utc,
        }
    }

    /// Cheap pre-filter: could this window produce an occurrence inside `range`?
    ///
    /// Exact for one-off windows. For recurring windows it only rules out
    /// rules that start after the range or ended well before it; the
    /// occurrence expansion does the precise work.
    pub fn may_intersect(&self, range: &UtcInterval) -> bool {
        if !self.is_active {
            return false;
        }
        match &self.kind {
            WindowKind::OneOff { .. } => self.interval().overlaps(range),
            WindowKind::Recurring(rule) => {
                let earliest_relevant = (range.start - Duration::days(2)).date_naive();
                self.start_utc < range.end
                    && rule.effective_until.map_or(true, |until| until >= earliest_relevant)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefineWindowRequest {
    pub practice_id: Uuid,
    pub vet_user_id: Uuid,
    pub start_local: NaiveTime,
    pub end_local: NaiveTime,
    pub schedule: WindowKind,
}

/// A concrete occurrence of a window on one practice-local date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowOccurrence {
    pub window_id: Uuid,
    pub practice_id: Uuid,
    pub vet_user_id: Uuid,
    pub local_date: NaiveDate,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub spans_midnight: bool,
    pub recurring: bool,
}

impl WindowOccurrence {
    pub fn new(window: &AvailabilityWindow, local_date: NaiveDate, interval: UtcInterval) -> Self {
        Self {
            window_id: window.id,
            practice_id: window.practice_id,
            vet_user_id: window.vet_user_id,
            local_date,
            start_utc: interval.start,
            end_utc: interval.end,
            spans_midnight: window.spans_midnight,
            recurring: window.kind.is_recurring(),
        }
    }

    pub fn interval(&self) -> UtcInterval {
        UtcInterval {
            start: self.start_utc,
            end: self.end_utc,
        }
    }
}

/// Day-of-week as stored: 0 = Sunday, 1 = Monday, etc.
pub fn weekday_to_index(weekday: Weekday) -> i32 {
    weekday.num_days_from_sunday() as i32
}

pub fn weekday_from_index(index: i32) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}
