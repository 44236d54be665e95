//! Target queue and the plan record of executed pointings.
//!
//! The queue is a greedy priority scheduler: it hands out the highest-priority
//! target that the constraint evaluator accepts right now and makes no attempt
//! to look ahead for a better overall schedule.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const MAX_QUEUED_TARGETS: usize = 128;

/// Where to point the spacecraft.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pointing {
    pub obsid: u32,
    /// Right ascension, degrees in [0, 360).
    pub ra: f64,
    /// Declination, degrees in [-90, 90].
    pub dec: f64,
    pub roll: f64,
}

impl Pointing {
    pub fn new(obsid: u32, ra: f64, dec: f64, roll: f64) -> Self {
        Self {
            obsid,
            ra,
            dec,
            roll,
        }
    }
}

/// A queued candidate pointing. Immutable once enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub pointing: Pointing,
    pub priority: i32,
    /// Requested on-target time in seconds, excluding the slew.
    pub duration: f64,
    /// Insertion sequence number, used to break priority ties.
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TargetError {
    #[error("target queue full (capacity {0})")]
    QueueFull(usize),
    #[error("obsid {obsid}: coordinates ra={ra} dec={dec} out of range")]
    InvalidCoordinates { obsid: u32, ra: f64, dec: f64 },
    #[error("obsid {obsid}: duration {duration} must be positive and finite")]
    InvalidDuration { obsid: u32, duration: f64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_added: u32,
    pub total_dispatched: u32,
    pub queries: u32,
    pub exhausted_queries: u32,
}

#[derive(Debug, Default)]
pub struct TargetQueue {
    // Kept sorted by (priority descending, sequence ascending)
    targets: Vec<Target, MAX_QUEUED_TARGETS>,
    next_sequence: u64,
    stats: QueueStats,
}

impl TargetQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a target. Returns its sequence number.
    pub fn add_target(
        &mut self,
        pointing: Pointing,
        priority: i32,
        duration: f64,
    ) -> Result<u64, TargetError> {
        let coordinates_ok = pointing.ra.is_finite()
            && pointing.dec.is_finite()
            && pointing.roll.is_finite()
            && (0.0..360.0).contains(&pointing.ra)
            && (-90.0..=90.0).contains(&pointing.dec);
        if !coordinates_ok {
            return Err(TargetError::InvalidCoordinates {
                obsid: pointing.obsid,
                ra: pointing.ra,
                dec: pointing.dec,
            });
        }

        if !duration.is_finite() || duration <= 0.0 {
            return Err(TargetError::InvalidDuration {
                obsid: pointing.obsid,
                duration,
            });
        }

        let sequence = self.next_sequence;
        let target = Target {
            pointing,
            priority,
            duration,
            sequence,
        };

        self.targets
            .push(target)
            .map_err(|_| TargetError::QueueFull(MAX_QUEUED_TARGETS))?;

        // Stable sort keeps insertion order among equal priorities
        self.targets
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));

        self.next_sequence += 1;
        self.stats.total_added += 1;

        Ok(sequence)
    }

    /// Remove and return the best target that `feasible` accepts at `current_time`.
    ///
    /// Candidates are offered in priority order, earliest insertion first among
    /// equal priorities. Returns `None` when no candidate is feasible; the queue
    /// is left untouched in that case.
    pub fn pop_next<F>(&mut self, current_time: f64, mut feasible: F) -> Option<Target>
    where
        F: FnMut(&Target, f64) -> bool,
    {
        self.stats.queries += 1;

        let position = self
            .targets
            .iter()
            .position(|target| feasible(target, current_time));

        match position {
            Some(index) => {
                let target = self.targets.remove(index);
                self.stats.total_dispatched += 1;
                debug!(
                    obsid = target.pointing.obsid,
                    priority = target.priority,
                    remaining = self.targets.len(),
                    "target selected"
                );
                Some(target)
            }
            None => {
                self.stats.exhausted_queries += 1;
                None
            }
        }
    }

    /// Queued targets in the order they would be offered.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

/// A target scheduled at a start time, as executed by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub target: Target,
    /// Time the slew was commanded.
    pub begin: f64,
    /// Time the spacecraft settles on target.
    pub slew_end: f64,
    /// Time the observation is due to complete.
    pub end: f64,
    pub completed: bool,
}

impl PlanEntry {
    pub fn new(target: Target, begin: f64, slew_time: f64) -> Self {
        let slew_end = begin + slew_time;
        Self {
            target,
            begin,
            slew_end,
            end: slew_end + target.duration,
            completed: false,
        }
    }

    pub fn obsid(&self) -> u32 {
        self.target.pointing.obsid
    }

    pub fn slew_time(&self) -> f64 {
        self.slew_end - self.begin
    }

    /// Seconds actually spent on target.
    pub fn exposure(&self) -> f64 {
        (self.end - self.slew_end).max(0.0)
    }
}

/// Ordered record of plan entries that have finished, completed or aborted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    entries: alloc::vec::Vec<PlanEntry>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: PlanEntry) {
        debug_assert!(
            self.entries.last().map_or(true, |last| last.begin <= entry.begin),
            "plan entries must be recorded in start order"
        );
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn completed(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.completed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_exposure(&self) -> f64 {
        self.completed().map(PlanEntry::exposure).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointing(obsid: u32) -> Pointing {
        Pointing::new(obsid, 10.0 * obsid as f64, 0.0, 0.0)
    }

    #[test]
    fn test_priority_then_insertion_order() {
        let mut queue = TargetQueue::new();
        queue.add_target(pointing(1), 1, 100.0).unwrap();
        queue.add_target(pointing(2), 5, 100.0).unwrap();
        queue.add_target(pointing(3), 5, 100.0).unwrap();
        queue.add_target(pointing(4), 3, 100.0).unwrap();

        let order: alloc::vec::Vec<u32> = queue.targets().iter().map(|t| t.pointing.obsid).collect();
        assert_eq!(order, [2, 3, 4, 1]);

        assert_eq!(queue.pop_next(0.0, |_, _| true).unwrap().pointing.obsid, 2);
        assert_eq!(queue.pop_next(0.0, |_, _| true).unwrap().pointing.obsid, 3);
    }

    #[test]
    fn test_infeasible_targets_skipped_not_removed() {
        let mut queue = TargetQueue::new();
        queue.add_target(pointing(1), 9, 100.0).unwrap();
        queue.add_target(pointing(2), 1, 100.0).unwrap();

        let picked = queue.pop_next(0.0, |t, _| t.pointing.obsid != 1).unwrap();
        assert_eq!(picked.pointing.obsid, 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.targets()[0].pointing.obsid, 1);
    }

    #[test]
    fn test_exhausted_query() {
        let mut queue = TargetQueue::new();
        queue.add_target(pointing(1), 1, 100.0).unwrap();

        assert!(queue.pop_next(0.0, |_, _| false).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().queries, 1);
        assert_eq!(queue.stats().exhausted_queries, 1);
    }

    #[test]
    fn test_feasibility_sees_current_time() {
        let mut queue = TargetQueue::new();
        queue.add_target(pointing(1), 1, 100.0).unwrap();

        assert!(queue.pop_next(10.0, |_, now| now >= 20.0).is_none());
        assert!(queue.pop_next(20.0, |_, now| now >= 20.0).is_some());
    }

    #[test]
    fn test_invalid_targets_rejected() {
        let mut queue = TargetQueue::new();
        assert!(matches!(
            queue.add_target(Pointing::new(1, 400.0, 0.0, 0.0), 1, 10.0),
            Err(TargetError::InvalidCoordinates { .. })
        ));
        assert!(matches!(
            queue.add_target(pointing(1), 1, 0.0),
            Err(TargetError::InvalidDuration { .. })
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_plan_entry_timing() {
        let target = Target {
            pointing: pointing(7),
            priority: 0,
            duration: 300.0,
            sequence: 0,
        };
        let entry = PlanEntry::new(target, 1000.0, 60.0);
        assert_eq!(entry.slew_end, 1060.0);
        assert_eq!(entry.end, 1360.0);
        assert_eq!(entry.exposure(), 300.0);
        assert_eq!(entry.slew_time(), 60.0);
    }
}
