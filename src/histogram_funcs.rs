// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use crate::image_funcs::Frame;

#[derive(Debug)]
pub struct HistogramStats {
    pub mean: f64,
    pub stddev: f64,
}

/// Full-range histogram of a 16 bit frame.
pub fn histogram_u16(frame: &Frame) -> Vec<u32> {
    let mut histogram = vec![0_u32; 65536];
    for &p in frame.as_raw() {
        histogram[p as usize] += 1;
    }
    histogram
}

pub fn stats_for_histogram(histogram: &[u32]) -> HistogramStats {
    let mut count: u64 = 0;
    let mut first_moment: u64 = 0;
    for h in 0..histogram.len() {
        let bin_count = histogram[h] as u64;
        count += bin_count;
        first_moment += bin_count * h as u64;
    }
    if count == 0 {
        return HistogramStats{mean: 0.0, stddev: 0.0};
    }
    let mean = first_moment as f64 / count as f64;
    let mut second_moment: f64 = 0.0;
    for h in 0..histogram.len() {
        let bin_count = histogram[h] as u64;
        second_moment += bin_count as f64 * (h as f64 - mean) * (h as f64 - mean);
    }
    let stddev = (second_moment / count as f64).sqrt();
    HistogramStats{mean, stddev}
}

/// Returns the `percentile` (0..100) of the histogram entries, linearly
/// interpolating between the two bracketing ranks. Returns None for an empty
/// histogram.
pub fn percentile_of_histogram(histogram: &[u32], percentile: f64) -> Option<f64> {
    assert!((0.0..=100.0).contains(&percentile));
    let count: u64 = histogram.iter().map(|&c| c as u64).sum();
    if count == 0 {
        return None;
    }
    let rank = percentile / 100.0 * (count - 1) as f64;
    let lower_rank = rank.floor() as u64;
    let upper_rank = rank.ceil() as u64;
    let lower = value_at_rank(histogram, lower_rank);
    let upper = value_at_rank(histogram, upper_rank);
    Some(lower as f64 + (upper as f64 - lower as f64) * (rank - lower_rank as f64))
}

// Value of the entry with the given zero-based rank in sorted order.
fn value_at_rank(histogram: &[u32], rank: u64) -> usize {
    let mut seen: u64 = 0;
    for h in 0..histogram.len() {
        seen += histogram[h] as u64;
        if seen > rank {
            return h;
        }
    }
    unreachable!()  // Rank is below the total count.
}

/// Zeroes every pixel below the `percentile` of the frame's nonzero pixel
/// values. A frame without nonzero pixels is left alone.
pub fn nonzero_percentile_threshold(frame: &mut Frame, percentile: f64) {
    let mut histogram = histogram_u16(frame);
    histogram[0] = 0;
    let cutoff = match percentile_of_histogram(&histogram, percentile) {
        Some(c) => c,
        None => return,
    };
    for p in frame.pixels_mut() {
        if (p.0[0] as f64) < cutoff {
            p.0[0] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use image::Luma;
    use crate::histogram_funcs::{nonzero_percentile_threshold,
                                 percentile_of_histogram, stats_for_histogram};
    use crate::image_funcs::Frame;

    #[test]
    fn test_stats_for_histogram() {
        let mut histogram = [0_u32; 1024];
        histogram[10] = 2;
        histogram[20] = 2;
        let stats = stats_for_histogram(&histogram);
        assert_eq!(stats.mean, 15.0);
        assert_eq!(stats.stddev, 5.0);
    }

    #[test]
    fn test_percentile_of_histogram() {
        let mut histogram = [0_u32; 256];
        assert_eq!(percentile_of_histogram(&histogram, 40.0), None);
        // Values 1, 2, 3, 4, 5.
        for h in 1..=5 {
            histogram[h] = 1;
        }
        assert_abs_diff_eq!(percentile_of_histogram(&histogram, 0.0).unwrap(), 1.0);
        assert_abs_diff_eq!(percentile_of_histogram(&histogram, 50.0).unwrap(), 3.0);
        assert_abs_diff_eq!(percentile_of_histogram(&histogram, 40.0).unwrap(), 2.6,
                            epsilon = 1e-9);
        assert_abs_diff_eq!(percentile_of_histogram(&histogram, 100.0).unwrap(), 5.0);
    }

    #[test]
    fn test_nonzero_percentile_threshold() {
        let mut frame = Frame::new(5, 2);
        for (x, v) in [0_u16, 100, 200, 300, 400].iter().enumerate() {
            frame.put_pixel(x as u32, 0, Luma([*v]));
        }
        // Nonzero values are 100..400; the 40th percentile is 220.
        nonzero_percentile_threshold(&mut frame, 40.0);
        let row: Vec<u16> = (0..5).map(|x| frame.get_pixel(x, 0).0[0]).collect();
        assert_eq!(row, vec![0, 0, 0, 300, 400]);

        // All-zero frame is untouched.
        let mut blank = Frame::new(3, 3);
        nonzero_percentile_threshold(&mut blank, 40.0);
        assert!(blank.pixels().all(|p| p.0[0] == 0));
    }
}
