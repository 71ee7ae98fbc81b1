//! Deadline-ordered timer registry
//!
//! The registry is plain data: every method takes the current instant so the
//! loop decides when "now" is and tests can move time freely.

use super::types::{HandlerId, TimerId};
use std::num::NonZeroU64;
use std::time::{Duration, Instant};

/// Stand-in deadline for intervals too long for `Instant` to represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(now: Instant, interval: Duration) -> Instant {
    now.checked_add(interval)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// A scheduled timer
#[derive(Debug, Clone)]
pub(crate) struct TimerRecord {
    pub(crate) id: TimerId,
    pub(crate) handler: HandlerId,
    pub(crate) interval: Duration,
    pub(crate) one_shot: bool,
    pub(crate) deadline: Instant,
}

/// Timers of one loop, kept sorted by (deadline, insertion order)
#[derive(Debug)]
pub(crate) struct TimerRegistry {
    timers: Vec<TimerRecord>,
    next_id: NonZeroU64,
    skew_threshold: Duration,
}

impl TimerRegistry {
    pub(crate) fn new(skew_threshold: Duration) -> Self {
        Self {
            timers: Vec::new(),
            next_id: NonZeroU64::MIN,
            skew_threshold,
        }
    }

    /// Schedule a timer first due at `now + interval`
    pub(crate) fn add(
        &mut self,
        handler: HandlerId,
        interval: Duration,
        one_shot: bool,
        now: Instant,
    ) -> TimerId {
        let id = TimerId::new(self.next_id);
        self.next_id = self.next_id.saturating_add(1);

        self.insert(TimerRecord {
            id,
            handler,
            interval,
            one_shot,
            deadline: deadline_after(now, interval),
        });
        id
    }

    /// Cancel a timer. Returns false if it already fired (one-shot) or never existed.
    pub(crate) fn stop(&mut self, id: TimerId) -> bool {
        match self.timers.iter().position(|t| t.id == id) {
            Some(index) => {
                self.timers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop every timer owned by `handler`, returning how many were removed
    pub(crate) fn remove_handler(&mut self, handler: HandlerId) -> usize {
        let before = self.timers.len();
        self.timers.retain(|t| t.handler != handler);
        before - self.timers.len()
    }

    /// How long the loop may sleep. `None` means no timers: sleep until woken.
    pub(crate) fn next_wait(&self, now: Instant) -> Option<Duration> {
        self.timers
            .first()
            .map(|t| t.deadline.saturating_duration_since(now))
    }

    /// Pick at most one due timer and reschedule or retire it.
    ///
    /// Timers overdue by the skew threshold or more are put back on track at
    /// `now + interval` without firing. Repeating timers that fire are
    /// rescheduled from `now`, not from their old deadline, so a late loop
    /// never produces catch-up bursts.
    pub(crate) fn fire_due(&mut self, now: Instant) -> Option<(TimerId, HandlerId)> {
        let mut skewed = Vec::new();
        let mut fired = None;

        while let Some(first) = self.timers.first() {
            if first.deadline > now {
                break;
            }

            let mut record = self.timers.remove(0);
            if now.duration_since(record.deadline) >= self.skew_threshold {
                skewed.push(record);
                continue;
            }

            fired = Some((record.id, record.handler));
            if !record.one_shot {
                record.deadline = deadline_after(now, record.interval);
                self.insert(record);
            }
            break;
        }

        for mut record in skewed {
            tracing::warn!(
                "{} of {} overdue by {:?}, rescheduling without firing",
                record.id,
                record.handler,
                now.duration_since(record.deadline)
            );
            record.deadline = deadline_after(now, record.interval);
            self.insert(record);
        }

        fired
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    pub(crate) fn clear(&mut self) {
        self.timers.clear();
    }

    fn insert(&mut self, record: TimerRecord) {
        let index = self
            .timers
            .partition_point(|t| t.deadline <= record.deadline);
        self.timers.insert(index, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKEW: Duration = Duration::from_secs(60);
    const H1: HandlerId = HandlerId(1);
    const H2: HandlerId = HandlerId(2);

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut timers = TimerRegistry::new(SKEW);
        let now = Instant::now();

        let a = timers.add(H1, ms(10), true, now);
        let b = timers.add(H1, ms(10), true, now);
        assert_eq!(a.get(), 1);
        assert!(b > a);

        // Ids are not reused after a stop
        assert!(timers.stop(b));
        let c = timers.add(H2, ms(10), true, now);
        assert!(c > b);
    }

    #[test]
    fn test_next_wait() {
        let mut timers = TimerRegistry::new(SKEW);
        let now = Instant::now();
        assert_eq!(timers.next_wait(now), None);

        timers.add(H1, ms(500), false, now);
        timers.add(H2, ms(100), false, now);
        assert_eq!(timers.next_wait(now), Some(ms(100)));

        // Saturates at zero once overdue
        assert_eq!(timers.next_wait(now + ms(250)), Some(Duration::ZERO));
    }

    #[test]
    fn test_fires_earliest_first_and_one_at_a_time() {
        let mut timers = TimerRegistry::new(SKEW);
        let now = Instant::now();

        let slow = timers.add(H1, ms(20), true, now);
        let fast = timers.add(H2, ms(10), true, now);

        let later = now + ms(30);
        assert_eq!(timers.fire_due(later), Some((fast, H2)));
        assert_eq!(timers.fire_due(later), Some((slow, H1)));
        assert_eq!(timers.fire_due(later), None);
        assert_eq!(timers.len(), 0);
    }

    #[test]
    fn test_not_due_before_deadline() {
        let mut timers = TimerRegistry::new(SKEW);
        let now = Instant::now();
        timers.add(H1, ms(10), true, now);

        assert_eq!(timers.fire_due(now + ms(9)), None);
        assert!(timers.fire_due(now + ms(10)).is_some());
    }

    #[test]
    fn test_repeating_reschedules_from_now() {
        let mut timers = TimerRegistry::new(SKEW);
        let start = Instant::now();
        let id = timers.add(H1, ms(100), false, start);

        // The loop was busy and checks 350ms late: one tick, not three
        let late = start + ms(450);
        assert_eq!(timers.fire_due(late), Some((id, H1)));
        assert_eq!(timers.fire_due(late), None);
        assert_eq!(timers.next_wait(late), Some(ms(100)));
    }

    #[test]
    fn test_skewed_timer_is_reset_without_firing() {
        let mut timers = TimerRegistry::new(SKEW);
        let start = Instant::now();
        timers.add(H1, ms(100), false, start);

        let jumped = start + ms(100) + SKEW;
        assert_eq!(timers.fire_due(jumped), None);
        assert_eq!(timers.next_wait(jumped), Some(ms(100)));
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_skewed_timer_does_not_hide_due_timer() {
        let mut timers = TimerRegistry::new(SKEW);
        let start = Instant::now();
        timers.add(H1, ms(10), true, start);

        let now = start + ms(10) + SKEW;
        let fresh = timers.add(H2, Duration::ZERO, true, now);

        assert_eq!(timers.fire_due(now), Some((fresh, H2)));
        // The skewed one-shot survives, moved to now + interval
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_wait(now), Some(ms(10)));
    }

    #[test]
    fn test_unrepresentable_interval_never_fires() {
        let mut timers = TimerRegistry::new(SKEW);
        let now = Instant::now();

        let id = timers.add(H1, Duration::MAX, false, now);
        assert!(timers.next_wait(now).unwrap() >= FAR_FUTURE);
        assert_eq!(timers.fire_due(now + ms(10)), None);
        assert!(timers.stop(id));
    }

    #[test]
    fn test_remove_handler_purges_only_its_timers() {
        let mut timers = TimerRegistry::new(SKEW);
        let now = Instant::now();
        timers.add(H1, ms(10), false, now);
        timers.add(H1, ms(20), true, now);
        let other = timers.add(H2, ms(30), true, now);

        assert_eq!(timers.remove_handler(H1), 2);
        assert_eq!(timers.fire_due(now + ms(40)), Some((other, H2)));
    }
}
