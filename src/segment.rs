// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Soma segmentation. Turns one grayscale frame into candidate cell regions.
//!
//! # Algorithm
//!
//! Segmentation runs in two passes. The first pass ([Segmenter::find_graded_somas])
//! locates somas coarsely as bounding boxes ("slices"):
//!
//! * A global threshold at `mean + threshold_multiplier * stddev` discards
//!   background.
//! * A small disk minimum filter followed by a ~3um binary erosion removes
//!   noise and thin neurites while keeping cell bodies.
//! * Roberts and Sobel edge magnitudes are summed to sharpen soma
//!   boundaries, and everything below the 40th percentile of the nonzero
//!   edge strengths is dropped. What remains are rings around each soma.
//! * Filling the rings' holes and labeling connected regions yields the
//!   slices. Slices smaller than a ~5um square are discarded.
//! * Slices larger than ~100um usually hold several merged cells. These get a
//!   top-hat transform, dilation, hole filling and a triple erosion before
//!   a second labeling round (with a ~3um size floor).
//!
//! The second pass ([Segmenter::find_candidates]) grows each slice into a
//! non-overlapping capture window (see [crate::expand]), isolates the soma
//! within its window with a local top-hat and percentile threshold, and
//! traces the soma's external contour.

use std::collections::BTreeMap;
use std::time::Instant;

use image::Luma;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use imageproc::point::Point;
use imageproc::rect::Rect;
use imageproc::region_labelling::{connected_components, Connectivity};
use log::{debug, info};

use crate::config::TrackerConfig;
use crate::expand::expand_slices;
use crate::histogram_funcs::nonzero_percentile_threshold;
use crate::image_funcs::{apply_mask, binary_erode_square,
                         crop, disk_footprint, enhance_edges, fill_holes,
                         global_threshold, minimum_filter, nonzero_mask, paste,
                         rect_footprint, to_8bit, top_hat, Frame, Mask};
use crate::roi::{contour_area, Contour};
use crate::units::UnitConverter;

/// A soma detected in one frame, before identity assignment.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// Midpoint of the slice the contour was found in. Orders candidates
    /// within a frame; matching uses the contour centroid instead.
    pub centroid_estimate: (i32, i32),
    pub contour: Contour,
}

/// Foreground of a top-hat filtered oversized slice, grown by the 3x3 cross,
/// hole filled and eroded `iterations` times by an `erode_dim` square.
fn split_mask(sub: &Frame, erode_dim: u32, iterations: u32) -> Mask {
    let mask = dilate(&nonzero_mask(sub), Norm::L1, 1);
    binary_erode_square(&fill_holes(&mask), erode_dim, iterations)
}

fn box_area(rect: &Rect) -> u64 {
    rect.width() as u64 * rect.height() as u64
}

/// Fills holes in `mask`, labels its 4-connected regions and returns each
/// region's bounding box, in label order. Returns nothing if the mask has no
/// foreground.
pub fn label_and_slice(mask: &Mask) -> Vec<Rect> {
    let filled = fill_holes(mask);
    if filled.pixels().all(|p| p.0[0] == 0) {
        return Vec::new();
    }
    let labels = connected_components(&filled, Connectivity::Four, Luma([0u8]));
    // label -> (x_min, y_min, x_max, y_max)
    let mut boxes: BTreeMap<u32, (u32, u32, u32, u32)> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0];
        if label == 0 {
            continue;
        }
        let b = boxes.entry(label).or_insert((x, y, x, y));
        b.0 = b.0.min(x);
        b.1 = b.1.min(y);
        b.2 = b.2.max(x);
        b.3 = b.3.max(y);
    }
    boxes.values().map(|&(x0, y0, x1, y1)| {
        Rect::at(x0 as i32, y0 as i32).of_size(x1 - x0 + 1, y1 - y0 + 1)
    }).collect()
}

/// Box midpoints, as (x, y).
pub fn estimate_centroids(slices: &[Rect]) -> Vec<(i32, i32)> {
    slices.iter().map(|s| {
        (s.left() + s.width() as i32 / 2, s.top() + s.height() as i32 / 2)
    }).collect()
}

/// Per-frame soma detector for one experiment.
#[derive(Clone, Debug)]
pub struct Segmenter {
    converter: UnitConverter,
    threshold_multiplier: f64,
    binned: bool,
    cell_min_dia_um: f64,
    cell_max_dia_um: f64,
}

impl Segmenter {
    pub fn new(config: &TrackerConfig, converter: UnitConverter) -> Segmenter {
        Segmenter{converter,
                  threshold_multiplier: config.threshold_multiplier,
                  binned: config.binning.is_binned(),
                  cell_min_dia_um: config.cell_min_dia_um,
                  cell_max_dia_um: config.cell_max_dia_um}
    }

    /// Thresholding, noise suppression and edge enhancement ahead of
    /// labeling.
    pub fn process_frame(&self, frame: &Frame) -> Frame {
        let mut img = frame.clone();
        global_threshold(&mut img, self.threshold_multiplier);
        let mut img = minimum_filter(&img, &disk_footprint(2));

        // Erosion removes noise and processes; the eroded mask then selects
        // pixels of the filtered frame.
        let eroded = binary_erode_square(&nonzero_mask(&img),
                                         self.converter.px(3.0), 1);
        apply_mask(&mut img, &eroded);

        let mut img = enhance_edges(&img);
        nonzero_percentile_threshold(&mut img, 40.0);
        if !self.binned {
            img = minimum_filter(&img, &rect_footprint(2, 2));
        }
        img
    }

    /// Bounding boxes of somas in `frame`.
    pub fn find_graded_somas(&self, frame: &Frame) -> Vec<Rect> {
        let mut img = self.process_frame(frame);

        let min_side = self.converter.px(5.0) as u64;
        let slices: Vec<Rect> = label_and_slice(&nonzero_mask(&img)).into_iter()
            .filter(|s| box_area(s) > min_side * min_side).collect();

        let tophat_dim = self.converter.px(40.0);
        let erode_dim = self.converter.px(3.0);
        let max_dim_accepted = self.converter.px(100.0);
        for s in &slices {
            if s.width().max(s.height()) <= max_dim_accepted {
                continue;
            }
            debug!("Splitting oversized slice {:?}", s);
            let sub = top_hat(&crop(&img, s), tophat_dim);
            let mask = split_mask(&sub, erode_dim, 3);
            let patch = Frame::from_fn(s.width(), s.height(), |x, y| {
                Luma([if mask.get_pixel(x, y).0[0] != 0 { 1 << 14 } else { 0 }])
            });
            paste(&mut img, &patch, s);
        }

        let min_side = self.converter.px(3.0) as u64;
        label_and_slice(&nonzero_mask(&img)).into_iter()
            .filter(|s| box_area(s) > min_side * min_side).collect()
    }

    /// Traces soma contours in `frame`. Each contour is tagged with the
    /// midpoint of the slice it was found in.
    pub fn find_candidates(&self, frame: &Frame) -> Vec<Candidate> {
        let candidates_start = Instant::now();
        let graded_slices = self.find_graded_somas(frame);
        let centroid_estimates = estimate_centroids(&graded_slices);
        let (width, height) = frame.dimensions();
        let expanded_slices = expand_slices(&graded_slices, self.converter.px(10.0),
                                            width, height);

        let mut thresholded = frame.clone();
        global_threshold(&mut thresholded, self.threshold_multiplier);

        let min_dia = self.converter.px(self.cell_min_dia_um) as f64;
        let area_min = min_dia * min_dia;
        let tophat_dim = self.converter.px(40.0);
        let mut candidates = Vec::<Candidate>::new();
        for (ix, window) in expanded_slices.iter().enumerate() {
            let mut sub = top_hat(&crop(&thresholded, window), tophat_dim);
            nonzero_percentile_threshold(&mut sub, 20.0);
            let sub = to_8bit(&sub);
            for contour in find_contours::<i32>(&sub) {
                // External boundaries only.
                if contour.border_type != BorderType::Outer || contour.parent.is_some() {
                    continue;
                }
                if contour_area(&contour.points) <= area_min {
                    continue;
                }
                let points: Contour = contour.points.iter()
                    .map(|p| Point::new(p.x + window.left(), p.y + window.top()))
                    .collect();
                candidates.push(Candidate{centroid_estimate: centroid_estimates[ix],
                                          contour: points});
            }
        }
        info!("Found {} candidates in {} slices in {:?}",
              candidates.len(), graded_slices.len(), candidates_start.elapsed());
        candidates
    }

    /// Candidates for seeding the neuron set: [Segmenter::find_candidates]
    /// restricted to the configured soma size range.
    pub fn find_initial_candidates(&self, frame: &Frame) -> Vec<Candidate> {
        let min_dia = self.converter.px(self.cell_min_dia_um) as f64;
        let max_dia = self.converter.px(self.cell_max_dia_um) as f64;
        let (area_min, area_max) = (min_dia * min_dia, max_dia * max_dia);
        self.find_candidates(frame).into_iter().filter(|c| {
            let area = contour_area(&c.contour);
            area_min < area && area < area_max
        }).collect()
    }
}
