use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_utils::clock::Clock;

use crate::error::AvailabilityError;
use crate::models::{
    AvailabilityWindow, DefineWindowRequest, UtcInterval, WindowKind, WindowOccurrence,
};
use crate::services::listing::AvailabilityListing;
use crate::services::repository::AvailabilityRepository;
use crate::services::timezone::{window_interval, TimezoneResolver};

/// How far past `effective_from` a recurring rule is searched for its
/// first usable occurrence.
const ANCHOR_SEARCH_DAYS: i64 = 14;

pub struct AvailabilityService {
    repository: Arc<dyn AvailabilityRepository>,
    timezones: TimezoneResolver,
    clock: Arc<dyn Clock>,
}

impl AvailabilityService {
    pub fn new(
        repository: Arc<dyn AvailabilityRepository>,
        timezones: TimezoneResolver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            timezones,
            clock,
        }
    }

    /// Define a one-off or recurring availability window.
    ///
    /// `end_local < start_local` is a window running past local midnight and
    /// is stored as one contiguous UTC interval ending on the next day.
    pub async fn define_window(&self, request: DefineWindowRequest) -> Result<AvailabilityWindow, AvailabilityError> {
        debug!("Defining availability for vet {} in practice {}", request.vet_user_id, request.practice_id);

        if request.start_local == request.end_local {
            return Err(AvailabilityError::Validation(
                "Start and end time must differ".to_string(),
            ));
        }
        if let WindowKind::Recurring(rule) = &request.schedule {
            rule.validate()?;
        }

        let tz = self.timezones.resolve(request.practice_id).await?;
        let anchor = anchor_interval(&tz, &request.schedule, request.start_local, request.end_local)?;

        let now = self.clock.now();
        let window = AvailabilityWindow {
            id: Uuid::new_v4(),
            practice_id: request.practice_id,
            vet_user_id: request.vet_user_id,
            start_local: request.start_local,
            end_local: request.end_local,
            timezone: tz.name().to_string(),
            spans_midnight: request.end_local < request.start_local,
            kind: request.schedule,
            start_utc: anchor.start,
            end_utc: anchor.end,
            is_active: true,
            superseded_by: None,
            created_at: now,
            updated_at: now,
        };

        let stored = self.repository.insert(&window).await?;
        info!(
            "Availability window {} defined ({} - {} {}, spans midnight: {})",
            stored.id, stored.start_local, stored.end_local, stored.timezone, stored.spans_midnight
        );

        Ok(stored)
    }

    /// Every active occurrence of the vet's windows overlapping `interval`.
    ///
    /// Touching intervals (`a.end == b.start`) are not conflicts. An empty
    /// result means the interval is free.
    pub async fn query_conflicts(
        &self,
        vet_user_id: Uuid,
        interval: UtcInterval,
    ) -> Result<Vec<WindowOccurrence>, AvailabilityError> {
        let interval = UtcInterval::new(interval.start, interval.end)?;
        let conflicts: Vec<WindowOccurrence> = self.list_availability(vet_user_id, interval).await?.iter().collect();

        if !conflicts.is_empty() {
            debug!(
                "{} availability occurrences overlap {} - {} for vet {}",
                conflicts.len(), interval.start, interval.end, vet_user_id
            );
        }

        Ok(conflicts)
    }

    /// Occurrences intersecting `range`, expanded lazily in `start_utc` order.
    pub async fn list_availability(
        &self,
        vet_user_id: Uuid,
        range: UtcInterval,
    ) -> Result<AvailabilityListing, AvailabilityError> {
        let range = UtcInterval::new(range.start, range.end)?;
        let windows = self.repository.active_for_vet(vet_user_id, &range).await?;
        AvailabilityListing::new(windows, range)
    }

    /// Replace a window: the replacement is stored first, then the old
    /// window is soft-invalidated and points at its successor.
    pub async fn supersede_window(
        &self,
        window_id: Uuid,
        replacement: DefineWindowRequest,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        let current = self.get_window(window_id).await?;
        if !current.is_active {
            return Err(AvailabilityError::Validation(format!(
                "Availability window {} is no longer active",
                window_id
            )));
        }
        if replacement.vet_user_id != current.vet_user_id || replacement.practice_id != current.practice_id {
            return Err(AvailabilityError::Validation(
                "Replacement must belong to the same vet and practice".to_string(),
            ));
        }

        let successor = self.define_window(replacement).await?;
        if self
            .repository
            .deactivate(window_id, Some(successor.id), self.clock.now())
            .await?
            .is_none()
        {
            warn!("Window {} disappeared while being superseded by {}", window_id, successor.id);
        }

        Ok(successor)
    }

    pub async fn deactivate_window(&self, window_id: Uuid) -> Result<AvailabilityWindow, AvailabilityError> {
        self.repository
            .deactivate(window_id, None, self.clock.now())
            .await?
            .ok_or(AvailabilityError::NotFound(window_id))
    }

    pub async fn get_window(&self, window_id: Uuid) -> Result<AvailabilityWindow, AvailabilityError> {
        self.repository
            .get(window_id)
            .await?
            .ok_or(AvailabilityError::NotFound(window_id))
    }

    pub async fn windows_for_practice(&self, practice_id: Uuid) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        self.repository.active_for_practice(practice_id).await
    }
}

/// Stored interval for a new window: the one-off date itself, or the first
/// recurring date whose occurrence does not collapse in a DST gap.
fn anchor_interval(
    tz: &Tz,
    schedule: &WindowKind,
    start_local: NaiveTime,
    end_local: NaiveTime,
) -> Result<UtcInterval, AvailabilityError> {
    match schedule {
        WindowKind::OneOff { date } => window_interval(tz, *date, start_local, end_local).ok_or_else(|| {
            AvailabilityError::Validation(format!(
                "Window {} - {} does not exist on {} in {}",
                start_local, end_local, date, tz.name()
            ))
        }),
        WindowKind::Recurring(rule) => {
            let first_day: NaiveDate = rule.effective_from;
            (0..ANCHOR_SEARCH_DAYS)
                .map(|offset| first_day + Duration::days(offset))
                .filter(|date| rule.occurs_on(*date))
                .find_map(|date| window_interval(tz, date, start_local, end_local))
                .ok_or_else(|| {
                    AvailabilityError::Validation(
                        "Recurrence rule produces no occurrences".to_string(),
                    )
                })
        }
    }
}
