// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs::File;
use std::io;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::neuron::DeathCause;
use crate::tracker::WellResult;

/// Time-to-event record for one neuron, as consumed by survival analysis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurvivalRecord {
    pub well: String,
    pub neuron_id: usize,
    /// Initial centroid in uncropped stack coordinates.
    pub x: i32,
    pub y: i32,
    /// Last timepoint at which the neuron was seen alive.
    pub last_timepoint: usize,
    /// Number of timepoints observed.
    pub duration: usize,
    /// A death was observed.
    pub event: bool,
    /// Tracking ended because the neuron was lost. False for survivors.
    pub censored: bool,
    /// "died", "unfound", or empty for neurons alive at the end.
    pub death_cause: String,
}

impl SurvivalRecord {
    pub fn from_well(result: &WellResult) -> Vec<SurvivalRecord> {
        let offset = result.crop_margin as i32;
        result.neurons.iter().map(|n| {
            let (x, y) = n.initial_roi(&result.rois).centroid();
            SurvivalRecord{
                well: result.well.clone(),
                neuron_id: n.id,
                x: x + offset,
                y: y + offset,
                last_timepoint: n.last_timepoint()
                    .unwrap_or(result.timepoints.saturating_sub(1)),
                duration: n.roi_ids().len(),
                event: n.death_cause() == Some(DeathCause::Died),
                censored: n.last_timepoint().is_some()
                    && n.death_cause() != Some(DeathCause::Died),
                death_cause: n.death_cause().map(|c| c.as_str()).unwrap_or("").to_string(),
            }
        }).collect()
    }
}

pub fn write_records<W: io::Write>(records: &[SurvivalRecord], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_csv(records: &[SurvivalRecord], path: &Path) -> Result<()> {
    write_records(records, File::create(path)?)?;
    info!("Wrote {} survival records to {:?}", records.len(), path);
    Ok(())
}
