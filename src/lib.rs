// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Survival tracking follows individual neuron cell bodies (somas) through a
//! time-lapse stack of label-free microscopy images of a culture well, and
//! decides for each whether and when it dies. The resulting time-to-event
//! records feed survival analyses without any manual annotation.
//!
//! Processing is per well:
//!
//! * [segment] finds soma contours in each frame.
//! * [tracker] seeds one [neuron::Neuron] per soma in the first frame and
//!   follows each through later frames by nearest-neighbor matching
//!   ([matching]) within a travel bound. A neuron that cannot be matched is
//!   censored; one whose match has shrunk, dimmed and rounded up is recorded
//!   as dead.
//! * [export] flattens the tracked neurons into [export::SurvivalRecord]s and
//!   [annotate] renders the tracks over the original frames for review.
//!
//! [pool] runs many wells concurrently, isolating failures per well.
//!
//! Physical sizes in the [config::TrackerConfig] are micrometers; [units]
//! converts them to pixels for the instrument in use.

pub mod annotate;
pub mod config;
pub mod error;
pub mod expand;
pub mod export;
pub mod histogram_funcs;
pub mod image_funcs;
pub mod matching;
pub mod neuron;
pub mod pool;
pub mod roi;
pub mod segment;
pub mod stack;
pub mod tracker;
pub mod units;
