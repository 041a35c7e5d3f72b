// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use imageproc::rect::Rect;
use log::debug;

// Occupancy counts over the frame.
struct Occupancy {
    width: u32,
    counts: Vec<u16>,
}

impl Occupancy {
    fn new(width: u32, height: u32) -> Occupancy {
        Occupancy{width, counts: vec![0; (width * height) as usize]}
    }

    fn cells(&self, rect: &Rect) -> impl Iterator<Item = usize> + '_ {
        let width = self.width as usize;
        let (left, right) = (rect.left() as usize, rect.right() as usize);
        (rect.top() as usize..=rect.bottom() as usize)
            .flat_map(move |y| (left..=right).map(move |x| y * width + x))
    }

    fn set(&mut self, rect: &Rect, value: u16) {
        let cells: Vec<usize> = self.cells(rect).collect();
        for i in cells {
            self.counts[i] = value;
        }
    }

    fn increment(&mut self, rect: &Rect) {
        let cells: Vec<usize> = self.cells(rect).collect();
        for i in cells {
            self.counts[i] = self.counts[i].saturating_add(1);
        }
    }

    fn collides(&self, rect: &Rect) -> bool {
        self.cells(rect).any(|i| self.counts[i] >= 2)
    }
}

/// Grows `rect` by `margin` pixels on every side, clamped to the frame.
pub fn grow_rect(rect: &Rect, margin: u32, width: u32, height: u32) -> Rect {
    let margin = margin as i32;
    let left = (rect.left() - margin).max(0);
    let top = (rect.top() - margin).max(0);
    let right = (rect.right() + margin).min(width as i32 - 1);
    let bottom = (rect.bottom() + margin).min(height as i32 - 1);
    Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32)
}

/// Expands each soma slice by up to `margin` pixels to give contour
/// extraction some context, such that no two expanded windows overlap. Slices
/// are processed in order; each one shrinks its own margin one pixel at a
/// time until it no longer collides with the windows and footprints already
/// on the occupancy grid. This is a greedy per-slice search, not an optimal
/// partition.
///
/// Slices must lie within the `width` x `height` frame.
pub fn expand_slices(slices: &[Rect], margin: u32, width: u32, height: u32) -> Vec<Rect> {
    let mut occupancy = Occupancy::new(width, height);
    for s in slices {
        occupancy.set(s, 1);
    }
    let mut expanded = Vec::with_capacity(slices.len());
    for s in slices {
        occupancy.set(s, 0);
        let mut px = margin;
        let mut window = grow_rect(s, px, width, height);
        occupancy.increment(&window);
        while px > 0 && occupancy.collides(&window) {
            // Undo this attempt before retrying with a smaller margin.
            occupancy.set(&window, 1);
            occupancy.set(s, 0);
            px -= 1;
            window = grow_rect(s, px, width, height);
            occupancy.increment(&window);
        }
        debug!("slice {:?} expanded by {} to {:?}", s, px, window);
        expanded.push(window);
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlaps(a: &Rect, b: &Rect) -> bool {
        a.intersect(*b).is_some()
    }

    #[test]
    fn test_isolated_slice_gets_full_margin() {
        let slices = vec![Rect::at(50, 50).of_size(10, 10)];
        let expanded = expand_slices(&slices, 10, 200, 200);
        assert_eq!(expanded, vec![Rect::at(40, 40).of_size(30, 30)]);
    }

    #[test]
    fn test_clamped_to_frame() {
        let slices = vec![Rect::at(2, 3).of_size(5, 5)];
        let expanded = expand_slices(&slices, 10, 20, 20);
        assert_eq!(expanded, vec![Rect::at(0, 0).of_size(17, 18)]);
    }

    #[test]
    fn test_neighbors_do_not_overlap() {
        // Gap of 10 pixels between the two slices.
        let slices = vec![Rect::at(20, 20).of_size(10, 10),
                          Rect::at(40, 20).of_size(10, 10)];
        let expanded = expand_slices(&slices, 10, 100, 100);
        assert_eq!(expanded.len(), 2);
        assert!(!overlaps(&expanded[0], &expanded[1]));
        // The first window stops short of the second slice's footprint.
        assert!(expanded[0].right() < 40);
        assert!(expanded[0].width() > 10);
        assert!(expanded[1].width() >= 10);
        // Windows always contain their slice.
        for (s, e) in slices.iter().zip(&expanded) {
            assert_eq!(e.intersect(*s), Some(*s));
        }
    }

    #[test]
    fn test_zero_margin_when_touching() {
        let slices = vec![Rect::at(10, 10).of_size(5, 5),
                          Rect::at(15, 10).of_size(5, 5)];
        let expanded = expand_slices(&slices, 10, 50, 50);
        assert_eq!(expanded[0], slices[0]);
    }
}
