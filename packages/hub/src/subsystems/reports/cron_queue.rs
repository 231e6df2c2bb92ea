use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::str::FromStr;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use vertex_types::ReportId;

use super::error::ScheduleError;

/// A scheduled report waiting in the priority queue, carrying its parsed
/// schedule and the timezone the expression is evaluated in.
#[derive(Debug, Clone)]
struct ScheduledReport {
    report_id: ReportId,
    schedule: Schedule,
    timezone: Tz,
    next_fire: DateTime<Utc>,
}

impl Eq for ScheduledReport {}

impl PartialEq for ScheduledReport {
    fn eq(&self, other: &Self) -> bool {
        self.next_fire == other.next_fire && self.report_id == other.report_id
    }
}

// For the binary heap, we need items with the earliest fire times at the
// top, so the normal ordering is inverted; report id breaks ties for
// deterministic ordering of same-time fires
impl Ord for ScheduledReport {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.next_fire.cmp(&self.next_fire) {
            Ordering::Equal => self.report_id.cmp(&other.report_id),
            other_ordering => other_ordering,
        }
    }
}

impl PartialOrd for ScheduledReport {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Accepts standard five-field cron by prepending a seconds column; six
/// and seven field forms pass through untouched.
pub fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    }
}

/// Parses and validates a cron + timezone pair, returning the parsed
/// parts for queue insertion.
pub fn parse_schedule(expression: &str, timezone: &str) -> Result<(Schedule, Tz), ScheduleError> {
    let normalized = normalize_cron(expression);
    let schedule = Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })?;
    let tz = Tz::from_str(timezone)
        .map_err(|_| ScheduleError::UnknownTimezone(timezone.to_string()))?;
    Ok((schedule, tz))
}

/// The next fire instant strictly after `after`, evaluated in the
/// schedule's timezone. Computing "strictly after the last fire" is what
/// keeps wall-clock fires monotonic across DST transitions: a repeated
/// nominal hour fires once, a skipped one resolves to the next valid
/// occurrence.
pub fn next_fire(
    schedule: &Schedule,
    timezone: &Tz,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(timezone))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Thread-safe priority queue of scheduled reports ordered by next fire
/// time. The tick loop pops everything due, and due entries are
/// reinserted with their next occurrence before the tick returns.
#[derive(Default)]
pub struct CronQueue {
    queue: RwLock<BinaryHeap<ScheduledReport>>,
    registered: RwLock<HashSet<ReportId>>,
}

impl CronQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-registers) a report's schedule. Returns the
    /// first upcoming fire instant.
    pub fn add(
        &self,
        report_id: ReportId,
        expression: &str,
        timezone: &str,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let (schedule, tz) = parse_schedule(expression, timezone)?;
        let first = next_fire(&schedule, &tz, Utc::now())
            .ok_or_else(|| ScheduleError::NeverFires(expression.to_string()))?;

        // replacing an existing entry: the stale heap item is skipped at
        // pop time because membership is re-checked against this set
        self.registered.write().unwrap().insert(report_id);
        self.queue.write().unwrap().push(ScheduledReport {
            report_id,
            schedule,
            timezone: tz,
            next_fire: first,
        });

        Ok(first)
    }

    pub fn remove(&self, report_id: &ReportId) {
        self.registered.write().unwrap().remove(report_id);
        // heap cleanup happens lazily during process_due
    }

    pub fn contains(&self, report_id: &ReportId) -> bool {
        self.registered.read().unwrap().contains(report_id)
    }

    pub fn len(&self) -> usize {
        self.registered.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.read().unwrap().is_empty()
    }

    /// Pops every report due at `now`, reinserting each with its next
    /// occurrence. Duplicated heap entries (from re-registration) and
    /// removed reports are dropped here.
    pub fn process_due(&self, now: DateTime<Utc>) -> Vec<ReportId> {
        let mut due = Vec::new();
        let mut seen_this_tick = HashSet::new();

        let mut queue = self.queue.write().unwrap();
        let registered = self.registered.read().unwrap();
        let mut updated = Vec::new();

        while let Some(item) = queue.pop() {
            if !registered.contains(&item.report_id) {
                continue;
            }

            // heap is ordered, so the first non-due item means the rest
            // aren't due either
            if item.next_fire > now {
                queue.push(item);
                break;
            }

            // a re-registered report can have two heap entries; only the
            // freshest one survives
            if !seen_this_tick.insert(item.report_id) {
                continue;
            }

            due.push(item.report_id);

            match next_fire(&item.schedule, &item.timezone, now) {
                Some(next) => {
                    let mut updated_item = item;
                    updated_item.next_fire = next;
                    updated.push(updated_item);
                }
                None => {
                    tracing::debug!(
                        "Schedule for report {} has no further occurrences",
                        item.report_id
                    );
                }
            }
        }

        for item in updated {
            queue.push(item);
        }

        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_cron_is_normalized() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron("0 */5 * * * *"), "0 */5 * * * *");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            parse_schedule("not a cron", "UTC"),
            Err(ScheduleError::InvalidCron { .. })
        ));
        assert!(matches!(
            parse_schedule("0 */5 * * * *", "Mars/Olympus"),
            Err(ScheduleError::UnknownTimezone(_))
        ));
        assert!(parse_schedule("0 */5 * * * *", "America/New_York").is_ok());
    }

    #[test]
    fn next_fire_lands_on_the_boundary() {
        let (schedule, tz) = parse_schedule("0 */5 * * * *", "UTC").unwrap();
        let just_before = Utc.with_ymd_and_hms(2024, 3, 4, 12, 4, 59).unwrap();
        let fire = next_fire(&schedule, &tz, just_before).unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2024, 3, 4, 12, 5, 0).unwrap());
    }

    #[test]
    fn next_fire_is_monotonic() {
        let (schedule, tz) = parse_schedule("0 0 * * * *", "America/New_York").unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 11, 3, 4, 30, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 11, 3, 7, 30, 0).unwrap();
        assert!(next_fire(&schedule, &tz, t1).unwrap() <= next_fire(&schedule, &tz, t2).unwrap());
    }

    #[test]
    fn dst_fall_back_fires_once_per_instant() {
        // America/New_York falls back on 2024-11-03: 01:30 local occurs
        // twice. Walking `after` from each fire instant yields strictly
        // increasing UTC instants with no repeats.
        let (schedule, tz) = parse_schedule("0 30 1 * * *", "America/New_York").unwrap();

        let mut cursor = Utc.with_ymd_and_hms(2024, 11, 2, 12, 0, 0).unwrap();
        let mut fires = Vec::new();
        for _ in 0..3 {
            let fire = next_fire(&schedule, &tz, cursor).unwrap();
            assert!(fire > cursor);
            fires.push(fire);
            cursor = fire;
        }

        // strictly increasing, at least a day between successive fires
        // apart from the transition window
        assert!(fires.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn process_due_pops_and_reschedules() {
        let queue = CronQueue::new();
        let report_id = ReportId::generate();
        queue.add(report_id, "* * * * * *", "UTC").unwrap();

        let due = queue.process_due(Utc::now() + chrono::Duration::seconds(2));
        assert_eq!(due, vec![report_id]);

        // rescheduled, not consumed
        assert!(queue.contains(&report_id));
        let due_again = queue.process_due(Utc::now() + chrono::Duration::seconds(4));
        assert_eq!(due_again, vec![report_id]);
    }

    #[test]
    fn removed_reports_do_not_fire() {
        let queue = CronQueue::new();
        let report_id = ReportId::generate();
        queue.add(report_id, "* * * * * *", "UTC").unwrap();
        queue.remove(&report_id);

        let due = queue.process_due(Utc::now() + chrono::Duration::seconds(2));
        assert!(due.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn not_yet_due_stays_queued() {
        let queue = CronQueue::new();
        let report_id = ReportId::generate();
        // daily at midnight; won't be due within the test window
        queue.add(report_id, "0 0 0 * * *", "UTC").unwrap();

        let due = queue.process_due(Utc::now());
        assert!(due.is_empty());
        assert!(queue.contains(&report_id));
    }
}
