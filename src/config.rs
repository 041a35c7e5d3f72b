// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::units::{Binning, Microscope, UnitConverter};

/// How living neurons are paired with the current frame's candidates.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Each living neuron, in iteration order, claims its nearest unclaimed
    /// candidate. Order dependent.
    #[default]
    Greedy,
    /// Minimum total travel distance over all gated neurons (Hungarian
    /// assignment).
    Optimal,
}

/// Everything the tracker needs to know about one experiment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    /// Global threshold is `mean + threshold_multiplier * stddev` of a frame.
    #[serde(default = "default_threshold_multiplier")]
    pub threshold_multiplier: f64,

    /// Objective magnification, e.g. 10.0 for a 10x objective.
    pub magnification: f64,

    pub microscope: Microscope,

    pub binning: Binning,

    /// Smallest and largest accepted soma diameter, in micrometers.
    #[serde(default = "default_cell_min_dia_um")]
    pub cell_min_dia_um: f64,
    #[serde(default = "default_cell_max_dia_um")]
    pub cell_max_dia_um: f64,

    /// Largest distance a cell may move between consecutive frames.
    #[serde(default = "default_max_travel_um")]
    pub max_travel_um: f64,

    /// Circularity (0..1) above which a shrinking, dimming soma is deemed
    /// dead.
    #[serde(default = "default_death_circularity_threshold")]
    pub death_circularity_threshold: f64,

    /// Pixels cropped from every edge of each frame. Registration shifts
    /// leave zero-filled borders.
    #[serde(default = "default_crop_margin")]
    pub crop_margin: u32,

    #[serde(default = "default_annotate")]
    pub annotate: bool,

    #[serde(default)]
    pub match_policy: MatchPolicy,
}

fn default_threshold_multiplier() -> f64 { 1.0 }
fn default_cell_min_dia_um() -> f64 { 10.0 }
fn default_cell_max_dia_um() -> f64 { 150.0 }
fn default_max_travel_um() -> f64 { 50.0 }
fn default_death_circularity_threshold() -> f64 { 0.9 }
fn default_crop_margin() -> u32 { 20 }
fn default_annotate() -> bool { true }

impl TrackerConfig {
    /// Configuration with the stock analysis parameters for the given
    /// instrument.
    pub fn new(magnification: f64, microscope: Microscope, binning: Binning)
               -> TrackerConfig {
        TrackerConfig{
            threshold_multiplier: default_threshold_multiplier(),
            magnification,
            microscope,
            binning,
            cell_min_dia_um: default_cell_min_dia_um(),
            cell_max_dia_um: default_cell_max_dia_um(),
            max_travel_um: default_max_travel_um(),
            death_circularity_threshold: default_death_circularity_threshold(),
            crop_margin: default_crop_margin(),
            annotate: default_annotate(),
            match_policy: MatchPolicy::default(),
        }
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<TrackerConfig> {
        let text = fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TrackError::InvalidConfig(msg));
        if !(self.magnification > 0.0) {
            return invalid(format!("magnification must be positive, got {}",
                                   self.magnification));
        }
        if !self.threshold_multiplier.is_finite() {
            return invalid(format!("threshold_multiplier must be finite, got {}",
                                   self.threshold_multiplier));
        }
        if !(self.cell_min_dia_um > 0.0) {
            return invalid(format!("cell_min_dia_um must be positive, got {}",
                                   self.cell_min_dia_um));
        }
        if !(self.cell_max_dia_um > self.cell_min_dia_um) {
            return invalid(format!(
                "cell_max_dia_um ({}) must exceed cell_min_dia_um ({})",
                self.cell_max_dia_um, self.cell_min_dia_um));
        }
        if !(self.max_travel_um > 0.0) {
            return invalid(format!("max_travel_um must be positive, got {}",
                                   self.max_travel_um));
        }
        if !(0.0..=1.0).contains(&self.death_circularity_threshold) {
            return invalid(format!(
                "death_circularity_threshold must be within [0, 1], got {}",
                self.death_circularity_threshold));
        }
        Ok(())
    }

    pub fn unit_converter(&self) -> UnitConverter {
        UnitConverter::new(self.magnification, self.microscope, self.binning)
    }
}
