// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Pixel-level filters on 16 bit frames and binary masks used by soma
//! segmentation.

use std::collections::VecDeque;

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::rect::Rect;

use crate::histogram_funcs::{histogram_u16, stats_for_histogram};

/// One timepoint of a stack.
pub type Frame = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Binary image; 0 is background, anything else is foreground.
pub type Mask = GrayImage;

const FOREGROUND: u8 = 255;

/// Zeroes pixels below `mean + multiplier * stddev` of the whole frame.
pub fn global_threshold(frame: &mut Frame, multiplier: f64) {
    let stats = stats_for_histogram(&histogram_u16(frame));
    let cutoff = stats.mean + multiplier * stats.stddev;
    for p in frame.pixels_mut() {
        if (p.0[0] as f64) < cutoff {
            p.0[0] = 0;
        }
    }
}

/// Offsets of a disk-shaped footprint of the given radius.
pub fn disk_footprint(radius: i32) -> Vec<(i32, i32)> {
    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

/// Offsets of a `width` x `height` rectangle. For even sizes the origin sits
/// at `size / 2`, so the footprint extends one further to the negative side.
pub fn rect_footprint(width: u32, height: u32) -> Vec<(i32, i32)> {
    let (x0, y0) = (-((width / 2) as i32), -((height / 2) as i32));
    let mut offsets = Vec::new();
    for dy in y0..y0 + height as i32 {
        for dx in x0..x0 + width as i32 {
            offsets.push((dx, dy));
        }
    }
    offsets
}

// Border index handling that mirrors about the edge, repeating the edge
// sample: (d c b a | a b c d | d c b a).
fn reflect(i: i32, n: i32) -> i32 {
    let period = 2 * n;
    let i = i.rem_euclid(period);
    if i < n { i } else { period - 1 - i }
}

/// Grayscale minimum over `footprint` around each pixel. Out-of-frame
/// neighbors are mirrored about the frame edge.
pub fn minimum_filter(frame: &Frame, footprint: &[(i32, i32)]) -> Frame {
    let (width, height) = frame.dimensions();
    let (w, h) = (width as i32, height as i32);
    let pixels = frame.as_raw();
    let mut out = Frame::new(width, height);
    for y in 0..h {
        for x in 0..w {
            let mut min_val = u16::MAX;
            for &(dx, dy) in footprint {
                let sx = reflect(x + dx, w);
                let sy = reflect(y + dy, h);
                min_val = min_val.min(pixels[(sy * w + sx) as usize]);
            }
            out.put_pixel(x as u32, y as u32, Luma([min_val]));
        }
    }
    out
}

pub fn nonzero_mask(frame: &Frame) -> Mask {
    let (width, height) = frame.dimensions();
    Mask::from_fn(width, height, |x, y| {
        Luma([if frame.get_pixel(x, y).0[0] != 0 { FOREGROUND } else { 0 }])
    })
}

/// Zeroes frame pixels that are background in `mask`.
pub fn apply_mask(frame: &mut Frame, mask: &Mask) {
    assert_eq!(frame.dimensions(), mask.dimensions());
    for (p, m) in frame.pixels_mut().zip(mask.pixels()) {
        if m.0[0] == 0 {
            p.0[0] = 0;
        }
    }
}

// Along one line of `len` samples, a sample survives erosion by a window
// spanning [i - before, i + after] when the entire window is in bounds and
// foreground.
fn erode_line(line: &[bool], before: usize, after: usize) -> Vec<bool> {
    let len = line.len();
    let mut prefix = vec![0_usize; len + 1];
    for i in 0..len {
        prefix[i + 1] = prefix[i] + line[i] as usize;
    }
    (0..len).map(|i| {
        if i < before || i + after >= len {
            return false;
        }
        let count = prefix[i + after + 1] - prefix[i - before];
        count == before + after + 1
    }).collect()
}

/// Binary erosion with a `size` x `size` square, repeated `iterations` times.
/// Pixels outside the mask count as background.
pub fn binary_erode_square(mask: &Mask, size: u32, iterations: u32) -> Mask {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let before = (size / 2) as usize;
    let after = (size as usize).saturating_sub(1 + before);
    let mut fg: Vec<bool> = mask.as_raw().iter().map(|&v| v != 0).collect();
    for _ in 0..iterations {
        // Rows.
        for y in 0..h {
            let eroded = erode_line(&fg[y * w..(y + 1) * w], before, after);
            fg[y * w..(y + 1) * w].copy_from_slice(&eroded);
        }
        // Columns.
        for x in 0..w {
            let column: Vec<bool> = (0..h).map(|y| fg[y * w + x]).collect();
            for (y, v) in erode_line(&column, before, after).into_iter().enumerate() {
                fg[y * w + x] = v;
            }
        }
    }
    Mask::from_fn(width, height, |x, y| {
        Luma([if fg[y as usize * w + x as usize] { FOREGROUND } else { 0 }])
    })
}

/// Fills background regions that are not 4-connected to the mask border.
pub fn fill_holes(mask: &Mask) -> Mask {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return mask.clone();
    }
    let raw = mask.as_raw();
    // Outside background, flooded from the border.
    let mut outside = vec![false; w * h];
    let mut queue = VecDeque::new();
    let seed = |x: usize, y: usize, outside: &mut Vec<bool>,
                    queue: &mut VecDeque<(usize, usize)>| {
        let i = y * w + x;
        if raw[i] == 0 && !outside[i] {
            outside[i] = true;
            queue.push_back((x, y));
        }
    };
    for x in 0..w {
        seed(x, 0, &mut outside, &mut queue);
        seed(x, h - 1, &mut outside, &mut queue);
    }
    for y in 0..h {
        seed(0, y, &mut outside, &mut queue);
        seed(w - 1, y, &mut outside, &mut queue);
    }
    while let Some((x, y)) = queue.pop_front() {
        if x > 0 { seed(x - 1, y, &mut outside, &mut queue); }
        if x + 1 < w { seed(x + 1, y, &mut outside, &mut queue); }
        if y > 0 { seed(x, y - 1, &mut outside, &mut queue); }
        if y + 1 < h { seed(x, y + 1, &mut outside, &mut queue); }
    }
    Mask::from_fn(width, height, |x, y| {
        let i = y as usize * w + x as usize;
        Luma([if outside[i] { 0 } else { FOREGROUND }])
    })
}

// Separable grayscale erosion (`take_min`) or dilation over a `size` square.
// Out-of-frame neighbors are ignored.
fn grey_morph_square(frame: &Frame, size: u32, take_min: bool) -> Frame {
    let (width, height) = frame.dimensions();
    let (w, h) = (width as i32, height as i32);
    let before = (size / 2) as i32;
    let after = size as i32 - 1 - before;
    let pick = |a: u16, b: u16| if take_min { a.min(b) } else { a.max(b) };
    let init = if take_min { u16::MAX } else { 0 };

    let src = frame.as_raw();
    let mut rows = vec![0_u16; src.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = init;
            for sx in (x - before).max(0)..=(x + after).min(w - 1) {
                acc = pick(acc, src[(y * w + sx) as usize]);
            }
            rows[(y * w + x) as usize] = acc;
        }
    }
    let mut out = vec![0_u16; src.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = init;
            for sy in (y - before).max(0)..=(y + after).min(h - 1) {
                acc = pick(acc, rows[(sy * w + x) as usize]);
            }
            out[(y * w + x) as usize] = acc;
        }
    }
    Frame::from_raw(width, height, out).unwrap()
}

/// White top-hat: the frame minus its grayscale opening by a `size` square.
/// Keeps bright features narrower than the kernel.
pub fn top_hat(frame: &Frame, size: u32) -> Frame {
    let opened = grey_morph_square(&grey_morph_square(frame, size, true), size, false);
    let (width, height) = frame.dimensions();
    let out: Vec<u16> = frame.as_raw().iter().zip(opened.as_raw())
        .map(|(&a, &b)| a.saturating_sub(b)).collect();
    Frame::from_raw(width, height, out).unwrap()
}

// Border index handling matching "reflect 101": -1 maps to 1, n maps to n-2.
fn reflect101(i: i32, n: i32) -> i32 {
    if n == 1 {
        return 0;
    }
    if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    }
}

/// Roberts cross edge magnitude on intensities normalized to [0, 1], rescaled
/// to the 16 bit range.
pub fn roberts(frame: &Frame) -> Frame {
    let (width, height) = frame.dimensions();
    let (w, h) = (width as i32, height as i32);
    let px = |x: i32, y: i32| {
        frame.get_pixel(x.min(w - 1) as u32, y.min(h - 1) as u32).0[0] as f64 / 65535.0
    };
    Frame::from_fn(width, height, |x, y| {
        let (x, y) = (x as i32, y as i32);
        let pos_diag = px(x, y) - px(x + 1, y + 1);
        let neg_diag = px(x + 1, y) - px(x, y + 1);
        let magnitude = ((pos_diag * pos_diag + neg_diag * neg_diag) / 2.0).sqrt();
        // `as` saturates.
        Luma([(magnitude * 65536.0) as u16])
    })
}

/// 3x3 Sobel gradient magnitude, saturated to 16 bits.
pub fn sobel_magnitude(frame: &Frame) -> Frame {
    let (width, height) = frame.dimensions();
    let (w, h) = (width as i32, height as i32);
    let px = |x: i32, y: i32| {
        frame.get_pixel(reflect101(x, w) as u32, reflect101(y, h) as u32).0[0] as f64
    };
    Frame::from_fn(width, height, |x, y| {
        let (x, y) = (x as i32, y as i32);
        let gx = (px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1)) -
            (px(x - 1, y - 1) + 2.0 * px(x - 1, y) + px(x - 1, y + 1));
        let gy = (px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1)) -
            (px(x - 1, y - 1) + 2.0 * px(x, y - 1) + px(x + 1, y - 1));
        Luma([gx.hypot(gy) as u16])
    })
}

/// Sum of Roberts and Sobel edge magnitudes, clipped to 16 bits. Sharpens
/// soma boundaries.
pub fn enhance_edges(frame: &Frame) -> Frame {
    let r = roberts(frame);
    let s = sobel_magnitude(frame);
    let (width, height) = frame.dimensions();
    let out: Vec<u16> = r.as_raw().iter().zip(s.as_raw())
        .map(|(&a, &b)| (a as u32 + b as u32).min(u16::MAX as u32) as u16).collect();
    Frame::from_raw(width, height, out).unwrap()
}

/// Linearly rescales so the frame's maximum maps to 255.
pub fn to_8bit(frame: &Frame) -> GrayImage {
    let max_val = frame.as_raw().iter().copied().max().unwrap_or(0);
    let (width, height) = frame.dimensions();
    if max_val == 0 {
        return GrayImage::new(width, height);
    }
    GrayImage::from_fn(width, height, |x, y| {
        let v = frame.get_pixel(x, y).0[0] as u32;
        Luma([(v * 255 / max_val as u32) as u8])
    })
}

/// Copies the `rect` region out of `frame`.
pub fn crop(frame: &Frame, rect: &Rect) -> Frame {
    image::imageops::crop_imm(frame, rect.left() as u32, rect.top() as u32,
                              rect.width(), rect.height()).to_image()
}

/// Writes `patch` into `frame` with its upper left corner at `rect`'s.
pub fn paste(frame: &mut Frame, patch: &Frame, rect: &Rect) {
    for (x, y, p) in patch.enumerate_pixels() {
        frame.put_pixel(rect.left() as u32 + x, rect.top() as u32 + y, *p);
    }
}
