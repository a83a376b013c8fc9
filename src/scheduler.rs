//! Timers for the main context.
//!
//! Nothing here runs code by itself: components schedule a [`Wakeup`] and
//! the owner of the scheduler hands due wakeups back to them. A deferred
//! wakeup becomes due on the next pass of the loop, after every event that
//! is already queued has been handled.

use std::time::{Duration, Instant};

/// Work a component asked to be woken up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wakeup {
    /// Coalesced "source list changed" from the input multiplexer.
    SourceListChanged,
    /// Coalesced SysEx read progress from the transfer engine.
    ReadProgress,
    /// The send decided to pause before the next message.
    SchedulePause,
    /// The pause between two sent messages is over.
    SendNextMessage,
    /// The last message went out; report completion.
    FinishSend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Timer {
    id: TimerId,
    due: Option<Instant>,
    wakeup: Wakeup,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    timers: Vec<Timer>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, due: Option<Instant>, wakeup: Wakeup) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.push(Timer { id, due, wakeup });
        id
    }

    /// Schedules `wakeup` for the next pass of the loop.
    pub fn defer(&mut self, wakeup: Wakeup) -> TimerId {
        self.push(None, wakeup)
    }

    pub fn schedule_after(&mut self, now: Instant, delay: Duration, wakeup: Wakeup) -> TimerId {
        self.push(Some(now + delay), wakeup)
    }

    /// Returns false if the timer already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.timers.iter().any(|t| t.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// How long the loop may block before something is due.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.timers
            .iter()
            .map(|t| match t.due {
                None => Duration::ZERO,
                Some(due) => due.saturating_duration_since(now),
            })
            .min()
    }

    /// Removes and returns everything due at `now`: deferred wakeups first,
    /// then timers in deadline order.
    pub fn take_due(&mut self, now: Instant) -> Vec<Wakeup> {
        let (mut due, pending): (Vec<Timer>, Vec<Timer>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|t| t.due.map_or(true, |d| d <= now));
        self.timers = pending;
        due.sort_by_key(|t| (t.due, t.id));
        due.into_iter().map(|t| t.wakeup).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_wakeup_is_due_immediately() {
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        scheduler.defer(Wakeup::SourceListChanged);
        assert_eq!(scheduler.time_until_due(now), Some(Duration::ZERO));
        assert_eq!(scheduler.take_due(now), vec![Wakeup::SourceListChanged]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        scheduler.schedule_after(now, Duration::from_millis(20), Wakeup::SendNextMessage);
        scheduler.schedule_after(now, Duration::from_millis(10), Wakeup::ReadProgress);
        scheduler.defer(Wakeup::SchedulePause);

        assert_eq!(scheduler.take_due(now), vec![Wakeup::SchedulePause]);
        assert_eq!(
            scheduler.time_until_due(now),
            Some(Duration::from_millis(10))
        );
        assert_eq!(
            scheduler.take_due(now + Duration::from_millis(25)),
            vec![Wakeup::ReadProgress, Wakeup::SendNextMessage]
        );
    }

    #[test]
    fn test_cancel() {
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        let id = scheduler.schedule_after(now, Duration::from_millis(5), Wakeup::SendNextMessage);
        assert!(scheduler.is_scheduled(id));
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert!(scheduler
            .take_due(now + Duration::from_secs(1))
            .is_empty());
    }
}
