// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::f64::consts::PI;
use std::ops::Index;

use image::Luma;
use imageproc::drawing::draw_polygon_mut;
use imageproc::geometry::arc_length;
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::image_funcs::{crop, Frame, Mask};

/// Closed polygon of boundary points, in frame coordinates.
pub type Contour = Vec<Point<i32>>;

/// One detection of a soma at one timepoint. Shape and intensity measures are
/// computed once at construction.
#[derive(Clone, Debug)]
pub struct Roi {
    // Pixels of the source frame inside the contour's bounding box, whose
    // upper left corner is at `crop_origin` in frame coordinates.
    image_crop: Frame,
    crop_origin: (i32, i32),

    // (x, y) from the contour's moments; (0, 0) for a contour without area.
    centroid: (i32, i32),

    contour: Contour,

    area: f64,
    perimeter: f64,

    // Brightest pixel of `image_crop` inside the contour.
    max_intensity: u16,
}

// Zeroth and first order moments (m00, m10, m01) of a closed polygon, via
// Green's theorem. m00 is the signed area.
fn polygon_moments(contour: &[Point<i32>]) -> (f64, f64, f64) {
    let n = contour.len();
    let mut m00 = 0.0;
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    for i in 0..n {
        let p = contour[i];
        let q = contour[(i + 1) % n];
        let (x0, y0, x1, y1) = (p.x as f64, p.y as f64, q.x as f64, q.y as f64);
        let cross = x0 * y1 - x1 * y0;
        m00 += cross;
        m10 += (x0 + x1) * cross;
        m01 += (y0 + y1) * cross;
    }
    (m00 / 2.0, m10 / 6.0, m01 / 6.0)
}

/// Absolute area enclosed by the contour polygon.
pub fn contour_area(contour: &[Point<i32>]) -> f64 {
    polygon_moments(contour).0.abs()
}

/// Integer centroid from polygon moments, or (0, 0) when the polygon has no
/// area.
pub fn contour_centroid(contour: &[Point<i32>]) -> (i32, i32) {
    let (m00, m10, m01) = polygon_moments(contour);
    if m00 == 0.0 {
        return (0, 0);
    }
    ((m10 / m00) as i32, (m01 / m00) as i32)
}

/// Smallest rectangle containing every contour point. None for an empty
/// contour.
pub fn bounding_rect(contour: &[Point<i32>]) -> Option<Rect> {
    let first = contour.first()?;
    let (mut x_min, mut x_max, mut y_min, mut y_max) = (first.x, first.x, first.y, first.y);
    for p in contour {
        x_min = x_min.min(p.x);
        x_max = x_max.max(p.x);
        y_min = y_min.min(p.y);
        y_max = y_max.max(p.y);
    }
    Some(Rect::at(x_min, y_min).of_size((x_max - x_min + 1) as u32,
                                        (y_max - y_min + 1) as u32))
}

// Filled contour mask over `rect`.
fn contour_mask(contour: &[Point<i32>], rect: &Rect) -> Mask {
    let mut mask = Mask::new(rect.width(), rect.height());
    let local: Vec<Point<i32>> = contour.iter()
        .map(|p| Point::new(p.x - rect.left(), p.y - rect.top())).collect();
    let mut polygon = local.clone();
    // The polygon fill rejects an explicitly closed polygon.
    while polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    if polygon.len() >= 3 {
        draw_polygon_mut(&mut mask, &polygon, Luma([255u8]));
    }
    for p in local {
        mask.put_pixel(p.x as u32, p.y as u32, Luma([255u8]));
    }
    mask
}

impl Roi {
    /// Builds the ROI for `contour`, which must lie within `frame`.
    pub fn new(frame: &Frame, contour: Contour) -> Roi {
        let (m00, _, _) = polygon_moments(&contour);
        let area = m00.abs();
        let centroid = contour_centroid(&contour);
        let perimeter = if contour.len() > 1 { arc_length(&contour, true) } else { 0.0 };

        let rect = match bounding_rect(&contour) {
            Some(rect) => rect,
            None => {
                return Roi{image_crop: Frame::new(0, 0), crop_origin: (0, 0),
                           centroid, contour, area, perimeter, max_intensity: 0};
            }
        };
        let image_crop = crop(frame, &rect);
        let mask = contour_mask(&contour, &rect);
        let mut max_intensity = 0_u16;
        for (p, m) in image_crop.pixels().zip(mask.pixels()) {
            if m.0[0] != 0 {
                max_intensity = max_intensity.max(p.0[0]);
            }
        }
        Roi{image_crop, crop_origin: (rect.left(), rect.top()),
            centroid, contour, area, perimeter, max_intensity}
    }

    pub fn centroid(&self) -> (i32, i32) {
        self.centroid
    }

    pub fn contour(&self) -> &[Point<i32>] {
        &self.contour
    }

    pub fn image_crop(&self) -> &Frame {
        &self.image_crop
    }

    pub fn crop_origin(&self) -> (i32, i32) {
        self.crop_origin
    }

    pub fn area(&self) -> f64 {
        self.area
    }

    pub fn perimeter(&self) -> f64 {
        self.perimeter
    }

    pub fn max_intensity(&self) -> u16 {
        self.max_intensity
    }

    /// `4π·area / perimeter²`; 1.0 for a circle. None when the geometry is
    /// degenerate.
    pub fn circularity(&self) -> Option<f64> {
        if self.perimeter <= 0.0 || self.area <= 0.0 {
            return None;
        }
        Some(4.0 * PI * self.area / (self.perimeter * self.perimeter))
    }

    /// Whether the ROI can take part in matching.
    pub fn is_valid(&self) -> bool {
        self.circularity().is_some()
    }
}

/// Index of an [Roi] within a [RoiArena].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RoiId(usize);

/// Owns every ROI created while tracking one well. Neurons refer to their
/// ROIs by [RoiId].
#[derive(Debug, Default)]
pub struct RoiArena {
    rois: Vec<Roi>,
}

impl RoiArena {
    pub fn new() -> RoiArena {
        RoiArena::default()
    }

    pub fn push(&mut self, roi: Roi) -> RoiId {
        self.rois.push(roi);
        RoiId(self.rois.len() - 1)
    }

    pub fn get(&self, id: RoiId) -> &Roi {
        &self.rois[id.0]
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }
}

impl Index<RoiId> for RoiArena {
    type Output = Roi;
    fn index(&self, id: RoiId) -> &Roi {
        self.get(id)
    }
}
