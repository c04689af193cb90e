use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::error::AvailabilityError;
use crate::models::{AvailabilityWindow, UtcInterval, WindowKind, WindowOccurrence};
use crate::services::timezone::{local_date, parse_timezone, window_interval};

/// Occurrences of a set of windows inside a UTC range.
///
/// Holds the candidate windows only; occurrences are expanded on demand.
/// Every call to [`AvailabilityListing::iter`] starts a fresh pass in
/// `start_utc` order, so the listing can be walked as often as needed.
#[derive(Debug, Clone)]
pub struct AvailabilityListing {
    entries: Vec<(AvailabilityWindow, Tz)>,
    range: UtcInterval,
}

impl AvailabilityListing {
    pub fn new(windows: Vec<AvailabilityWindow>, range: UtcInterval) -> Result<Self, AvailabilityError> {
        let entries = windows
            .into_iter()
            .filter(|w| w.is_active)
            .map(|w| {
                let tz = parse_timezone(&w.timezone)?;
                Ok((w, tz))
            })
            .collect::<Result<Vec<_>, AvailabilityError>>()?;

        Ok(Self { entries, range })
    }

    pub fn range(&self) -> UtcInterval {
        self.range
    }

    pub fn window_count(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> ListingIter<'_> {
        let mut sources: Vec<OccurrenceIter<'_>> = self
            .entries
            .iter()
            .map(|(window, tz)| OccurrenceIter::new(window, *tz, self.range))
            .collect();

        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (index, source) in sources.iter_mut().enumerate() {
            if let Some(occurrence) = source.next() {
                heap.push(Reverse(Pending { occurrence, source: index }));
            }
        }

        ListingIter { sources, heap }
    }
}

impl<'a> IntoIterator for &'a AvailabilityListing {
    type Item = WindowOccurrence;
    type IntoIter = ListingIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// K-way merge over the per-window occurrence streams.
pub struct ListingIter<'a> {
    sources: Vec<OccurrenceIter<'a>>,
    heap: BinaryHeap<Reverse<Pending>>,
}

impl Iterator for ListingIter<'_> {
    type Item = WindowOccurrence;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(Pending { occurrence, source }) = self.heap.pop()?;
        if let Some(following) = self.sources[source].next() {
            self.heap.push(Reverse(Pending { occurrence: following, source }));
        }
        Some(occurrence)
    }
}

struct Pending {
    occurrence: WindowOccurrence,
    source: usize,
}

impl Pending {
    fn key(&self) -> (DateTime<Utc>, Uuid, usize) {
        (self.occurrence.start_utc, self.occurrence.window_id, self.source)
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

enum Cursor {
    Single { emitted: bool },
    Dates { next: Option<NaiveDate>, last: NaiveDate },
}

/// Ascending occurrences of one window inside the range.
struct OccurrenceIter<'a> {
    window: &'a AvailabilityWindow,
    tz: Tz,
    range: UtcInterval,
    cursor: Cursor,
}

impl<'a> OccurrenceIter<'a> {
    fn new(window: &'a AvailabilityWindow, tz: Tz, range: UtcInterval) -> Self {
        let cursor = match &window.kind {
            WindowKind::OneOff { .. } => Cursor::Single { emitted: false },
            WindowKind::Recurring(rule) => {
                // An occurrence that starts the local day before the range can
                // still reach into it when it spans midnight.
                let from_range = local_date(&tz, range.start - Duration::days(1));
                let until_range = local_date(&tz, range.end);
                Cursor::Dates {
                    next: Some(from_range.max(rule.effective_from)),
                    last: rule.effective_until.map_or(until_range, |until| until.min(until_range)),
                }
            }
        };

        Self { window, tz, range, cursor }
    }
}

impl Iterator for OccurrenceIter<'_> {
    type Item = WindowOccurrence;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.cursor {
            Cursor::Single { emitted } => {
                let WindowKind::OneOff { date } = &self.window.kind else {
                    return None;
                };
                if *emitted {
                    return None;
                }
                *emitted = true;

                let interval = self.window.interval();
                interval
                    .overlaps(&self.range)
                    .then(|| WindowOccurrence::new(self.window, *date, interval))
            }
            Cursor::Dates { next, last } => {
                let WindowKind::Recurring(rule) = &self.window.kind else {
                    return None;
                };
                let last = *last;

                while let Some(date) = (*next).filter(|d| *d <= last) {
                    *next = date.succ_opt();

                    if !rule.occurs_on(date) {
                        continue;
                    }
                    let Some(interval) = window_interval(&self.tz, date, self.window.start_local, self.window.end_local) else {
                        continue;
                    };
                    if interval.start >= self.range.end {
                        *next = None;
                        return None;
                    }
                    if interval.overlaps(&self.range) {
                        return Some(WindowOccurrence::new(self.window, date, interval));
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Weekday};

    use crate::models::RecurrenceRule;

    fn window(kind: WindowKind, start: (u32, u32), end: (u32, u32), anchor: UtcInterval) -> AvailabilityWindow {
        let start_local = NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap();
        let end_local = NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap();
        AvailabilityWindow {
            id: Uuid::new_v4(),
            practice_id: Uuid::new_v4(),
            vet_user_id: Uuid::new_v4(),
            start_local,
            end_local,
            timezone: "UTC".to_string(),
            spans_midnight: end_local < start_local,
            kind,
            start_utc: anchor.start,
            end_utc: anchor.end,
            is_active: true,
            superseded_by: None,
            created_at: anchor.start,
            updated_at: anchor.start,
        }
    }

    fn range(from: (u32, u32, u32), to: (u32, u32, u32)) -> UtcInterval {
        UtcInterval::new(
            Utc.with_ymd_and_hms(2025, 1, from.0, from.1, from.2, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, to.0, to.1, to.2, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn merges_one_off_and_recurring_in_start_order() {
        let monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let daily = window(
            WindowKind::Recurring(RecurrenceRule::weekly(
                vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
                monday,
            )),
            (9, 0),
            (12, 0),
            range((6, 9, 0), (6, 12, 0)),
        );
        let one_off = window(
            WindowKind::OneOff { date: NaiveDate::from_ymd_opt(2025, 1, 7).unwrap() },
            (8, 0),
            (9, 0),
            range((7, 8, 0), (7, 9, 0)),
        );

        let listing = AvailabilityListing::new(vec![daily.clone(), one_off.clone()], range((6, 0, 0), (9, 0, 0))).unwrap();
        let starts: Vec<_> = listing.iter().map(|o| (o.window_id, o.start_utc)).collect();

        assert_eq!(
            starts,
            vec![
                (daily.id, Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()),
                (one_off.id, Utc.with_ymd_and_hms(2025, 1, 7, 8, 0, 0).unwrap()),
                (daily.id, Utc.with_ymd_and_hms(2025, 1, 7, 9, 0, 0).unwrap()),
                (daily.id, Utc.with_ymd_and_hms(2025, 1, 8, 9, 0, 0).unwrap()),
            ]
        );

        // restartable: a second pass yields the same sequence
        assert_eq!(listing.iter().count(), 4);
        assert_eq!((&listing).into_iter().count(), 4);
    }

    #[test]
    fn spanning_occurrence_from_previous_day_is_included() {
        let friday = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let night = window(
            WindowKind::Recurring(RecurrenceRule::weekly(vec![Weekday::Fri], friday)),
            (22, 0),
            (2, 0),
            range((10, 22, 0), (11, 2, 0)),
        );

        let listing = AvailabilityListing::new(vec![night], range((11, 1, 0), (11, 3, 0))).unwrap();
        assert_eq!(listing.range(), range((11, 1, 0), (11, 3, 0)));
        let occurrences: Vec<_> = listing.iter().collect();

        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].local_date, friday);
        assert!(occurrences[0].spans_midnight);
    }

    #[test]
    fn inactive_windows_are_skipped() {
        let mut w = window(
            WindowKind::OneOff { date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap() },
            (9, 0),
            (10, 0),
            range((6, 9, 0), (6, 10, 0)),
        );
        w.is_active = false;

        let listing = AvailabilityListing::new(vec![w], range((6, 0, 0), (7, 0, 0))).unwrap();
        assert_eq!(listing.window_count(), 0);
        assert_eq!(listing.iter().next(), None);
    }
}
