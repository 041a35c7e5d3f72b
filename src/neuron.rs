// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use crate::roi::{RoiArena, RoiId, Roi};

/// Why tracking of a neuron ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeathCause {
    /// No candidate within travel range, or the nearest one was taken by
    /// another neuron.
    Unfound,
    /// The matched candidate looked like a dying soma: smaller, dimmer and
    /// rounder than before.
    Died,
}

impl DeathCause {
    pub fn as_str(self) -> &'static str {
        match self {
            DeathCause::Unfound => "unfound",
            DeathCause::Died => "died",
        }
    }
}

/// A tracked cell: the ROIs observed at consecutive timepoints starting at 0,
/// plus its status.
#[derive(Clone, Debug)]
pub struct Neuron {
    pub id: usize,

    // One entry per timepoint observed, in order.
    roi_ids: Vec<RoiId>,

    // Last timepoint at which the neuron was alive. None while it still is.
    last_timepoint: Option<usize>,

    // Set when tracking ended because the neuron could no longer be found.
    // False while alive and after an observed death.
    censored: bool,

    death_cause: Option<DeathCause>,

    // Excluded neurons never track and are dropped from results.
    excluded: bool,
}

impl Neuron {
    pub fn new(id: usize, initial: RoiId) -> Neuron {
        Neuron{id, roi_ids: vec![initial], last_timepoint: None,
               censored: false, death_cause: None, excluded: false}
    }

    pub fn is_alive(&self) -> bool {
        self.last_timepoint.is_none()
    }

    /// Records the ROI for the next timepoint.
    pub fn push_roi(&mut self, roi: RoiId) {
        assert!(self.is_alive(), "neuron {} is no longer tracked", self.id);
        self.roi_ids.push(roi);
    }

    /// Ends tracking with `timepoint` as the last one at which the neuron was
    /// alive. `censored` marks a track lost rather than seen dying.
    pub fn terminate(&mut self, timepoint: usize, censored: bool, cause: Option<DeathCause>) {
        assert!(self.is_alive(), "neuron {} terminated twice", self.id);
        self.last_timepoint = Some(timepoint);
        self.censored = censored;
        self.death_cause = cause;
    }

    /// Marks a neuron whose initial ROI cannot be tracked.
    pub fn exclude(&mut self) {
        self.terminate(0, true, None);
        self.excluded = true;
    }

    pub fn roi_ids(&self) -> &[RoiId] {
        &self.roi_ids
    }

    pub fn rois<'a>(&'a self, arena: &'a RoiArena) -> impl Iterator<Item = &'a Roi> + 'a {
        self.roi_ids.iter().map(move |id| &arena[*id])
    }

    pub fn initial_roi<'a>(&self, arena: &'a RoiArena) -> &'a Roi {
        &arena[self.roi_ids[0]]
    }

    pub fn latest_roi<'a>(&self, arena: &'a RoiArena) -> &'a Roi {
        &arena[self.roi_ids[self.roi_ids.len() - 1]]
    }

    pub fn last_timepoint(&self) -> Option<usize> {
        self.last_timepoint
    }

    pub fn censored(&self) -> bool {
        self.censored
    }

    pub fn death_cause(&self) -> Option<DeathCause> {
        self.death_cause
    }

    pub fn excluded(&self) -> bool {
        self.excluded
    }
}
