// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Instant;

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::point::Point;
use log::info;
use tiff::encoder::{colortype, TiffEncoder};

use crate::error::Result;
use crate::image_funcs::{to_8bit, Frame};
use crate::stack::Stack;
use crate::tracker::WellResult;

const FONT_DATA: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

const TRACKED: Rgb<u8> = Rgb([0, 255, 0]);
const LOST: Rgb<u8> = Rgb([255, 0, 0]);
const MARKER_RADIUS: i32 = 3;
const LABEL_SCALE: f32 = 12.0;

fn to_rgb(frame: &Frame) -> RgbImage {
    let gray = to_8bit(frame);
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

fn draw_contour(image: &mut RgbImage, contour: &[Point<i32>], offset: i32, color: Rgb<u8>) {
    let n = contour.len();
    for i in 0..n {
        let p = contour[i];
        let q = contour[(i + 1) % n];
        draw_line_segment_mut(image,
                              ((p.x + offset) as f32, (p.y + offset) as f32),
                              ((q.x + offset) as f32, (q.y + offset) as f32),
                              color);
    }
}

// Neuron id to the right of the marker at (x, y), vertically centered on it.
fn draw_label(image: &mut RgbImage, font: &FontRef, id: usize, x: i32, y: i32,
              color: Rgb<u8>) {
    let half_height = (LABEL_SCALE / 2.0) as i32;
    draw_text_mut(image, color, x + MARKER_RADIUS + 2, y - half_height,
                  PxScale::from(LABEL_SCALE), font, &id.to_string());
}

/// Renders `stack` (uncropped) with each neuron's contour, centroid marker
/// and id drawn in green while it is tracked, and its last contour drawn in
/// red on the frame where it was lost or found dead. Ids match the
/// `neuron_id` column of the survival records.
pub fn annotate_well(stack: &Stack, result: &WellResult) -> Result<Vec<RgbImage>> {
    let annotate_start = Instant::now();
    let font = FontRef::try_from_slice(FONT_DATA)?;
    let offset = result.crop_margin as i32;
    let mut images: Vec<RgbImage> = stack.frames().iter().map(to_rgb).collect();
    for neuron in &result.neurons {
        let rois: Vec<_> = neuron.rois(&result.rois).collect();
        for (t, roi) in rois.iter().enumerate() {
            let image = &mut images[t];
            draw_contour(image, roi.contour(), offset, TRACKED);
            let (x, y) = roi.centroid();
            let (x, y) = (x + offset, y + offset);
            draw_hollow_circle_mut(image, (x, y), MARKER_RADIUS, TRACKED);
            draw_label(image, &font, neuron.id, x, y, TRACKED);
        }
        if let (Some(last), Some(roi)) = (neuron.last_timepoint(), rois.last()) {
            if let Some(image) = images.get_mut(last + 1) {
                draw_contour(image, roi.contour(), offset, LOST);
            }
        }
    }
    info!("Annotated {} frames of well {} in {:?}",
          images.len(), result.well, annotate_start.elapsed());
    Ok(images)
}

/// Writes `images` as the pages of one RGB TIFF at `path`.
pub fn write_annotated_stack(images: &[RgbImage], path: &Path) -> Result<()> {
    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    for image in images {
        encoder.write_image::<colortype::RGB8>(image.width(), image.height(),
                                               image.as_raw())?;
    }
    info!("Wrote {} annotated frames to {:?}", images.len(), path);
    Ok(())
}
