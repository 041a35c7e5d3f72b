// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Follows each soma found in a well's first frame through the rest of the
//! stack, and decides when it dies.
//!
//! # Overview
//!
//! Frame 0 seeds one [Neuron] per initial candidate (see
//! [Segmenter::find_initial_candidates]). Each later frame is segmented and
//! every living neuron is paired with the nearest candidate within the
//! configured travel distance (see [crate::matching]). A neuron that finds
//! no partner is lost: its record is censored at the previous timepoint. A
//! neuron whose partner is smaller, dimmer and rounder than its last
//! observation is deemed dead at the previous timepoint; that is the only
//! way a death event is recorded.
//!
//! Candidates nobody claimed in one frame, together with the partners of
//! neurons that just died, are carried into the next frame's matching as
//! obstacles. This keeps a lost neuron's identity from jumping onto a
//! neighbor that was already unaccounted for.
//!
//! A frame without any candidates (focus failure, blank acquisition) ends
//! tracking for the well: every neuron still alive is censored.

use std::time::Instant;

use log::{debug, info};

use crate::config::TrackerConfig;
use crate::error::{Result, TrackError};
use crate::image_funcs::Frame;
use crate::matching::{assign, CandidateIndex};
use crate::neuron::{DeathCause, Neuron};
use crate::roi::{Roi, RoiArena};
use crate::segment::Segmenter;
use crate::stack::Stack;
use crate::units::UnitConverter;

/// Fraction of the previous peak intensity below which a soma counts as
/// dimmed.
const DIMMING_RATIO: f64 = 0.8;

/// Tracking outcome for one well.
#[derive(Debug)]
pub struct WellResult {
    pub well: String,
    /// Ordered by initial position (top to bottom, then left to right), with
    /// ids 0..N-1 in that order.
    pub neurons: Vec<Neuron>,
    pub rois: RoiArena,
    /// Number of frames in the stack.
    pub timepoints: usize,
    /// ROI coordinates are relative to the stack cropped by this margin.
    pub crop_margin: u32,
}

/// Outcome of tracking through one frame.
#[derive(Debug, PartialEq)]
pub enum Step {
    /// Centroids to carry into the next frame.
    Continue(Vec<(i32, i32)>),
    /// The frame had no candidates; all neurons are terminal.
    Exhausted,
}

/// Whether `candidate` looks like `prev` dying: it shrank, dimmed and got
/// rounder (or is simply very round). Never fires when either circularity is
/// undefined.
pub fn is_dying(prev: &Roi, candidate: &Roi, circularity_threshold: f64) -> bool {
    let (prev_circ, cand_circ) = match (prev.circularity(), candidate.circularity()) {
        (Some(p), Some(c)) => (p, c),
        _ => return false,
    };
    (cand_circ > prev_circ || cand_circ > circularity_threshold)
        && candidate.area() < prev.area()
        && (candidate.max_intensity() as f64) < DIMMING_RATIO * prev.max_intensity() as f64
}

/// Drops excluded neurons, orders the rest by initial centroid (y, then x)
/// and renumbers them from 0. The sort is stable.
pub fn relabel(neurons: Vec<Neuron>, rois: &RoiArena) -> Vec<Neuron> {
    let mut neurons: Vec<Neuron> = neurons.into_iter().filter(|n| !n.excluded()).collect();
    neurons.sort_by_key(|n| {
        let (x, y) = n.initial_roi(rois).centroid();
        (y, x)
    });
    for (id, n) in neurons.iter_mut().enumerate() {
        n.id = id;
    }
    neurons
}

pub struct Tracker {
    config: TrackerConfig,
    segmenter: Segmenter,
    max_travel_px: f64,
}

impl Tracker {
    /// `config` is assumed validated.
    pub fn new(config: TrackerConfig) -> Tracker {
        let converter = config.unit_converter();
        Tracker::with_converter(config, converter)
    }

    /// Uses `converter` in place of the scale implied by the configured
    /// instrument.
    pub fn with_converter(config: TrackerConfig, converter: UnitConverter) -> Tracker {
        let segmenter = Segmenter::new(&config, converter);
        let max_travel_px = converter.px_f64(config.max_travel_um);
        Tracker{config, segmenter, max_travel_px}
    }

    /// Creates one neuron per initial candidate of `frame`. Neurons whose
    /// initial ROI has degenerate geometry are marked excluded.
    pub fn seed(&self, well: &str, frame: &Frame, rois: &mut RoiArena)
                -> Result<Vec<Neuron>> {
        let candidates = self.segmenter.find_initial_candidates(frame);
        if candidates.is_empty() {
            return Err(TrackError::NoNeuronsFound{well: well.to_string()});
        }
        let neurons = candidates.into_iter().enumerate().map(|(id, c)| {
            debug!("Seeding neuron {} near {:?}", id, c.centroid_estimate);
            let roi = Roi::new(frame, c.contour);
            let valid = roi.is_valid();
            let mut neuron = Neuron::new(id, rois.push(roi));
            if !valid {
                debug!("Excluding neuron {} with degenerate initial contour", id);
                neuron.exclude();
            }
            neuron
        }).collect();
        Ok(neurons)
    }

    /// Advances every living neuron to timepoint `t` (at least 1) using
    /// `frame`. `carry_over` holds the centroids returned by the previous
    /// step.
    pub fn step(&self, t: usize, frame: &Frame, neurons: &mut [Neuron],
                rois: &mut RoiArena, carry_over: &[(i32, i32)]) -> Step {
        assert!(t >= 1);
        let candidates = self.segmenter.find_candidates(frame);
        if candidates.is_empty() {
            info!("No candidates at timepoint {}; censoring remaining neurons", t);
            for n in neurons.iter_mut().filter(|n| n.is_alive()) {
                n.terminate(t - 1, true, Some(DeathCause::Unfound));
            }
            return Step::Exhausted;
        }

        let mut candidate_rois: Vec<Option<Roi>> = candidates.into_iter()
            .map(|c| Some(Roi::new(frame, c.contour))).collect();
        let positions: Vec<Option<(i32, i32)>> = candidate_rois.iter().map(|r| {
            r.as_ref().filter(|r| r.is_valid()).map(|r| r.centroid())
        }).collect();
        let index = CandidateIndex::new(&positions, carry_over);

        let alive: Vec<usize> = (0..neurons.len()).filter(|&n| neurons[n].is_alive()).collect();
        let neuron_positions: Vec<(i32, i32)> = alive.iter()
            .map(|&n| neurons[n].latest_roi(rois).centroid()).collect();
        let assignment = assign(self.config.match_policy, &index, &neuron_positions,
                                self.max_travel_px);

        let mut recycled = Vec::<(i32, i32)>::new();
        let (mut num_matched, mut num_died, mut num_lost) = (0, 0, 0);
        for (&n, matched) in alive.iter().zip(assignment) {
            let neuron = &mut neurons[n];
            let ix = match matched {
                Some(ix) => ix,
                None => {
                    debug!("Neuron {} lost at timepoint {}", neuron.id, t);
                    neuron.terminate(t - 1, true, Some(DeathCause::Unfound));
                    num_lost += 1;
                    continue;
                }
            };
            let roi = match candidate_rois[ix].take() {
                Some(roi) => roi,
                None => panic!("candidate {} assigned twice", ix),
            };
            if is_dying(neuron.latest_roi(rois), &roi,
                        self.config.death_circularity_threshold) {
                debug!("Neuron {} died at timepoint {}", neuron.id, t);
                neuron.terminate(t - 1, false, Some(DeathCause::Died));
                recycled.push(roi.centroid());
                num_died += 1;
            } else {
                neuron.push_roi(rois.push(roi));
                num_matched += 1;
            }
        }

        let mut next_carry_over: Vec<(i32, i32)> = candidate_rois.iter().flatten()
            .filter(|r| r.is_valid())
            .map(|r| r.centroid())
            .collect();
        next_carry_over.extend(recycled);
        info!("Timepoint {}: {} tracked, {} died, {} lost, {} carried over",
              t, num_matched, num_died, num_lost, next_carry_over.len());
        Step::Continue(next_carry_over)
    }

    /// Tracks the neurons of one well's stack. The stack is cropped by the
    /// configured margin first.
    pub fn track(&self, well: &str, stack: &Stack) -> Result<WellResult> {
        let track_start = Instant::now();
        let cropped = stack.crop_margin(well, self.config.crop_margin)?;
        let frames = cropped.frames();
        let mut rois = RoiArena::new();
        let mut neurons = self.seed(well, &frames[0], &mut rois)?;
        info!("Well {}: {} neurons at timepoint 0", well, neurons.len());

        let mut carry_over = Vec::<(i32, i32)>::new();
        for (t, frame) in frames.iter().enumerate().skip(1) {
            if !neurons.iter().any(|n| n.is_alive()) {
                debug!("Well {}: no living neurons after timepoint {}", well, t - 1);
                break;
            }
            match self.step(t, frame, &mut neurons, &mut rois, &carry_over) {
                Step::Continue(next) => carry_over = next,
                Step::Exhausted => break,
            }
        }

        let neurons = relabel(neurons, &rois);
        let deaths = neurons.iter()
            .filter(|n| n.death_cause() == Some(DeathCause::Died)).count();
        info!("Well {}: tracked {} neurons over {} timepoints, {} deaths, in {:?}",
              well, neurons.len(), frames.len(), deaths, track_start.elapsed());
        Ok(WellResult{well: well.to_string(), neurons, rois,
                      timepoints: frames.len(),
                      crop_margin: self.config.crop_margin})
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;
    use crate::config::MatchPolicy;
    use crate::units::Microscope;
    use super::*;

    const SIZE: u32 = 200;

    // Frame with bright squares given as (x, y, side, value).
    fn frame(squares: &[(u32, u32, u32, u16)]) -> Frame {
        let mut frame = Frame::new(SIZE, SIZE);
        for &(x0, y0, side, value) in squares {
            for y in y0..y0 + side {
                for x in x0..x0 + side {
                    frame.put_pixel(x, y, Luma([value]));
                }
            }
        }
        frame
    }

    fn test_config() -> TrackerConfig {
        TrackerConfig::new(10.0, Microscope::Ixm, "2x2".parse().unwrap())
    }

    fn tracker(config: TrackerConfig) -> Tracker {
        Tracker::with_converter(config, UnitConverter::from_px_per_um(1.0))
    }

    const BIG: (u32, u32, u32, u16) = (80, 80, 24, 8000);
    const SMALL: (u32, u32, u32, u16) = (40, 130, 20, 8000);

    fn summary(result: &WellResult) -> Vec<(usize, (i32, i32), usize, Option<usize>, bool)> {
        result.neurons.iter().map(|n| {
            (n.id, n.initial_roi(&result.rois).centroid(), n.roi_ids().len(),
             n.last_timepoint(), n.censored())
        }).collect()
    }

    #[test]
    fn test_persistence() {
        let stack = Stack::new(vec![frame(&[BIG, SMALL]); 3]);
        let result = tracker(test_config()).track("A01", &stack).unwrap();
        assert_eq!(result.timepoints, 3);
        assert_eq!(result.neurons.len(), 2);
        for n in &result.neurons {
            assert!(n.is_alive());
            assert!(!n.censored());
            assert_eq!(n.last_timepoint(), None);
            assert_eq!(n.roi_ids().len(), 3);
            assert_eq!(n.death_cause(), None);
        }
        // Ordered by y; coordinates are relative to the cropped stack.
        assert_eq!(result.neurons[0].initial_roi(&result.rois).centroid(), (71, 71));
        assert_eq!(result.neurons[1].initial_roi(&result.rois).centroid(), (29, 119));
    }

    #[test]
    fn test_disappearance() {
        let stack = Stack::new(vec![frame(&[BIG, SMALL]), frame(&[BIG, SMALL]),
                                    frame(&[]), frame(&[BIG, SMALL])]);
        let result = tracker(test_config()).track("A01", &stack).unwrap();
        assert_eq!(result.neurons.len(), 2);
        for n in &result.neurons {
            assert_eq!(n.last_timepoint(), Some(1));
            assert!(n.censored());
            assert_eq!(n.death_cause(), Some(DeathCause::Unfound));
            assert_eq!(n.roi_ids().len(), 2);
        }
    }

    #[test]
    fn test_empty_first_frame() {
        let stack = Stack::new(vec![frame(&[]), frame(&[BIG])]);
        let err = tracker(test_config()).track("B07", &stack).unwrap_err();
        assert!(matches!(err, TrackError::NoNeuronsFound{ref well} if well == "B07"));
    }

    #[test]
    fn test_death_by_shrinking() {
        let mut config = test_config();
        config.death_circularity_threshold = 0.5;
        // Smaller, dimmer soma at the same place.
        let shrunk = (84, 84, 16, 5000);
        let stack = Stack::new(vec![frame(&[BIG]), frame(&[BIG]), frame(&[shrunk]),
                                    frame(&[shrunk])]);
        let tracker = tracker(config);
        let result = tracker.track("C03", &stack).unwrap();
        assert_eq!(result.neurons.len(), 1);
        let n = &result.neurons[0];
        assert_eq!(n.last_timepoint(), Some(1));
        assert!(!n.censored());
        assert_eq!(n.death_cause(), Some(DeathCause::Died));
        assert_eq!(n.roi_ids().len(), 2);

        // The dying soma's candidate is carried into the next frame.
        let cropped = stack.crop_margin("C03", 20).unwrap();
        let mut rois = RoiArena::new();
        let mut neurons = tracker.seed("C03", &cropped.frames()[0], &mut rois).unwrap();
        let step = tracker.step(1, &cropped.frames()[2], &mut neurons, &mut rois, &[]);
        assert_eq!(step, Step::Continue(vec![(71, 71)]));
        assert_eq!(neurons[0].death_cause(), Some(DeathCause::Died));
    }

    #[test]
    fn test_shrinking_without_dimming_survives() {
        let mut config = test_config();
        config.death_circularity_threshold = 0.5;
        let shrunk = (84, 84, 16, 8000);
        let stack = Stack::new(vec![frame(&[BIG]), frame(&[shrunk])]);
        let result = tracker(config).track("C03", &stack).unwrap();
        let n = &result.neurons[0];
        assert!(n.is_alive());
        assert_eq!(n.roi_ids().len(), 2);
    }

    #[test]
    fn test_travel_bound() {
        // Moves 60 pixels with a 50 pixel bound.
        let stack = Stack::new(vec![frame(&[BIG]), frame(&[(140, 80, 24, 8000)])]);
        let result = tracker(test_config()).track("A01", &stack).unwrap();
        let n = &result.neurons[0];
        assert_eq!(n.last_timepoint(), Some(0));
        assert_eq!(n.death_cause(), Some(DeathCause::Unfound));
        assert!(n.censored());
    }

    #[test]
    fn test_unclaimed_candidates_block_later_match() {
        let tracker = tracker(test_config());
        let cropped = Stack::new(vec![frame(&[BIG]), frame(&[(110, 80, 24, 8000)])])
            .crop_margin("A01", 20).unwrap();
        let mut rois = RoiArena::new();
        let mut neurons = tracker.seed("A01", &cropped.frames()[0], &mut rois).unwrap();
        // A carried-over centroid between the neuron and the moved soma.
        let step = tracker.step(1, &cropped.frames()[1], &mut neurons, &mut rois,
                                &[(80, 71)]);
        assert!(!neurons[0].is_alive());
        assert_eq!(neurons[0].death_cause(), Some(DeathCause::Unfound));
        // The unclaimed candidate is carried over.
        assert_eq!(step, Step::Continue(vec![(101, 71)]));
    }

    #[test]
    fn test_motion_within_bound() {
        let stack = Stack::new(vec![frame(&[BIG, SMALL]),
                                    frame(&[(86, 83, 24, 8000), (44, 127, 20, 8000)]),
                                    frame(&[(92, 85, 24, 8000), (47, 126, 20, 8000)])]);
        let config = test_config();
        let max_travel = config.max_travel_um;
        let result = tracker(config).track("A01", &stack).unwrap();
        assert_eq!(result.neurons.len(), 2);
        for n in &result.neurons {
            assert!(n.is_alive());
            let centroids: Vec<(i32, i32)> = n.rois(&result.rois).map(|r| r.centroid()).collect();
            assert_eq!(centroids.len(), 3);
            for pair in centroids.windows(2) {
                let dx = (pair[1].0 - pair[0].0) as f64;
                let dy = (pair[1].1 - pair[0].1) as f64;
                assert!((dx * dx + dy * dy).sqrt() < max_travel);
            }
        }
        assert_eq!(result.neurons[0].latest_roi(&result.rois).centroid(), (83, 76));
    }

    #[test]
    fn test_determinism_and_track_lengths() {
        let stack = Stack::new(vec![frame(&[BIG, SMALL]), frame(&[BIG, SMALL]),
                                    frame(&[BIG]), frame(&[BIG])]);
        for policy in [MatchPolicy::Greedy, MatchPolicy::Optimal] {
            let mut config = test_config();
            config.match_policy = policy;
            let first = tracker(config.clone()).track("A01", &stack).unwrap();
            let second = tracker(config).track("A01", &stack).unwrap();
            assert_eq!(summary(&first), summary(&second));
            for n in &first.neurons {
                let expected = match n.last_timepoint() {
                    Some(t) => t + 1,
                    None => first.timepoints,
                };
                assert_eq!(n.roi_ids().len(), expected);
            }
            // The small soma vanished at timepoint 2.
            assert_eq!(first.neurons[1].last_timepoint(), Some(1));
            assert!(first.neurons[0].is_alive());
        }
    }

    #[test]
    fn test_relabel_idempotent() {
        let stack = Stack::new(vec![frame(&[SMALL, BIG]); 2]);
        let result = tracker(test_config()).track("A01", &stack).unwrap();
        let before = summary(&result);
        let relabeled = relabel(result.neurons, &result.rois);
        let ids: Vec<usize> = relabeled.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![0, 1]);
        let ys: Vec<i32> = relabeled.iter()
            .map(|n| n.initial_roi(&result.rois).centroid().1).collect();
        assert!(ys.windows(2).all(|w| w[0] <= w[1]));
        let after: Vec<_> = relabeled.iter().map(|n| {
            (n.id, n.initial_roi(&result.rois).centroid(), n.roi_ids().len(),
             n.last_timepoint(), n.censored())
        }).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_is_dying() {
        use imageproc::point::Point;
        fn square(frame: &Frame, x0: i32, side: i32) -> Roi {
            let s = side - 1;
            Roi::new(frame, vec![Point::new(x0, x0), Point::new(x0 + s, x0),
                                 Point::new(x0 + s, x0 + s), Point::new(x0, x0 + s)])
        }
        let bright = frame(&[(10, 10, 30, 1000)]);
        let dim = frame(&[(10, 10, 30, 700)]);
        let prev = square(&bright, 10, 30);
        let smaller_dim = square(&dim, 14, 20);
        let smaller_bright = square(&bright, 14, 20);
        // Same shape: circularity neither rises nor exceeds the threshold.
        assert!(!is_dying(&prev, &smaller_dim, 0.9));
        assert!(is_dying(&prev, &smaller_dim, 0.5));
        assert!(!is_dying(&prev, &smaller_bright, 0.5));
        // Growth is never death.
        assert!(!is_dying(&smaller_dim, &prev, 0.0));
        let line = Roi::new(&dim, vec![Point::new(12, 12), Point::new(14, 12)]);
        assert!(!is_dying(&prev, &line, 0.0));
    }
}
