//! Feasibility checks offered to the target queue.

use crate::subsystems::attitude::{angular_separation, sun_position};
use crate::targets::Target;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// Decides whether a target may be observed at a given time. The loop asks
/// both when picking a target and on every tick of its observation.
pub trait Constraint {
    fn is_feasible(&self, target: &Target, utime: f64) -> bool;
}

impl<F> Constraint for F
where
    F: Fn(&Target, f64) -> bool,
{
    fn is_feasible(&self, target: &Target, utime: f64) -> bool {
        self(target, utime)
    }
}

/// Keeps the boresight at least `min_angle_deg` away from the sun.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunAvoidance {
    pub min_angle_deg: f64,
}

impl SunAvoidance {
    pub fn new(min_angle_deg: f64) -> Self {
        Self { min_angle_deg }
    }
}

impl Constraint for SunAvoidance {
    fn is_feasible(&self, target: &Target, utime: f64) -> bool {
        let (sun_ra, sun_dec) = sun_position(utime);
        angular_separation(target.pointing.ra, target.pointing.dec, sun_ra, sun_dec)
            >= self.min_angle_deg
    }
}

/// Per-obsid `[start, end)` windows. Obsids without windows are always visible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityWindows {
    windows: BTreeMap<u32, Vec<(f64, f64)>>,
}

impl VisibilityWindows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_window(&mut self, obsid: u32, start: f64, end: f64) {
        self.windows.entry(obsid).or_default().push((start, end));
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl Constraint for VisibilityWindows {
    fn is_feasible(&self, target: &Target, utime: f64) -> bool {
        match self.windows.get(&target.pointing.obsid) {
            Some(windows) => windows
                .iter()
                .any(|&(start, end)| start <= utime && utime < end),
            None => true,
        }
    }
}

/// Feasible only when every member constraint agrees. Empty means feasible.
#[derive(Default)]
pub struct AllOf {
    constraints: Vec<Box<dyn Constraint>>,
}

impl AllOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, constraint: impl Constraint + 'static) -> Self {
        self.constraints.push(Box::new(constraint));
        self
    }

    pub fn push(&mut self, constraint: Box<dyn Constraint>) {
        self.constraints.push(constraint);
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

impl core::fmt::Debug for AllOf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AllOf")
            .field("constraints", &self.constraints.len())
            .finish()
    }
}

impl Constraint for AllOf {
    fn is_feasible(&self, target: &Target, utime: f64) -> bool {
        self.constraints
            .iter()
            .all(|constraint| constraint.is_feasible(target, utime))
    }
}
