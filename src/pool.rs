// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::annotate::{annotate_well, write_annotated_stack};
use crate::error::{Result, TrackError};
use crate::stack::load_tiff_stack;
use crate::tracker::{Tracker, WellResult};

/// One well's stack on disk.
#[derive(Clone, Debug)]
pub struct WellJob {
    pub well: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct WellOutcome {
    pub well: String,
    pub result: Result<WellResult>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `work` for `well`, turning a panic into [TrackError::WorkerPanicked].
pub fn run_isolated<T, F>(well: &str, work: F) -> Result<T>
    where F: FnOnce() -> Result<T>
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => Err(TrackError::WorkerPanicked{well: well.to_string(),
                                                       message: panic_message(&*payload)}),
    }
}

fn process_well(tracker: &Tracker, job: &WellJob, annotation_dir: Option<&Path>)
                -> Result<WellResult> {
    let stack = load_tiff_stack(&job.path)?;
    let result = tracker.track(&job.well, &stack)?;
    if let Some(dir) = annotation_dir {
        let path = dir.join(format!("{}.tif", job.well));
        write_annotated_stack(&annotate_well(&stack, &result)?, &path)?;
    }
    Ok(result)
}

/// Loads and tracks each well on a pool of `workers` threads (0 picks one
/// per core). When `annotation_dir` is given, each tracked well's annotated
/// frames are written there as `<well>.tif`. A failing well does not affect
/// the others; outcomes are returned in job order.
pub fn track_wells(tracker: &Tracker, jobs: &[WellJob], workers: usize,
                   annotation_dir: Option<&Path>) -> Result<Vec<WellOutcome>> {
    let pool_start = Instant::now();
    if let Some(dir) = annotation_dir {
        fs::create_dir_all(dir)?;
    }
    let pool = ThreadPoolBuilder::new().num_threads(workers).build()?;
    info!("Tracking {} wells on {} workers", jobs.len(), pool.current_num_threads());
    let outcomes: Vec<WellOutcome> = pool.install(|| {
        jobs.par_iter().map(|job| {
            let result = run_isolated(&job.well, || process_well(tracker, job, annotation_dir));
            if let Err(e) = &result {
                warn!("Well {} failed: {}", job.well, e);
            }
            WellOutcome{well: job.well.clone(), result}
        }).collect()
    });
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    info!("Tracked {} wells ({} failed) in {:?}",
          outcomes.len(), failed, pool_start.elapsed());
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use image::Luma;
    use tiff::encoder::{colortype, TiffEncoder};
    use crate::config::TrackerConfig;
    use crate::image_funcs::Frame;
    use crate::units::{Microscope, UnitConverter};
    use super::*;

    #[test]
    fn test_run_isolated() {
        let ok: Result<u32> = run_isolated("A01", || Ok(7));
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32> = run_isolated("A02", || panic!("bad frame"));
        match err {
            Err(TrackError::WorkerPanicked{well, message}) => {
                assert_eq!(well, "A02");
                assert_eq!(message, "bad frame");
            }
            other => panic!("unexpected {:?}", other),
        }

        let err: Result<u32> = run_isolated("A03", || panic!("frame {}", 3));
        assert!(matches!(err, Err(TrackError::WorkerPanicked{ref message, ..})
                         if message == "frame 3"));
    }

    // 200x200 16 bit frame with a 24 pixel bright square.
    fn soma_frame() -> Frame {
        let mut frame = Frame::new(200, 200);
        for y in 80..104 {
            for x in 80..104 {
                frame.put_pixel(x, y, Luma([8000]));
            }
        }
        frame
    }

    fn write_stack(path: &Path, frames: &[Frame]) {
        let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
        for frame in frames {
            encoder.write_image::<colortype::Gray16>(frame.width(), frame.height(),
                                                     frame.as_raw()).unwrap();
        }
    }

    #[test]
    fn test_failed_wells_are_isolated() {
        let dir = std::env::temp_dir()
            .join(format!("survival_pool_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let good = dir.join("A01.tif");
        let blank = dir.join("A03.tif");
        write_stack(&good, &[soma_frame(), soma_frame(), soma_frame()]);
        write_stack(&blank, &[Frame::new(200, 200), soma_frame()]);

        let tracker = Tracker::with_converter(
            TrackerConfig::new(10.0, Microscope::Ixm, "2x2".parse().unwrap()),
            UnitConverter::from_px_per_um(1.0));
        let jobs = vec![WellJob{well: "A01".to_string(), path: good},
                        WellJob{well: "A02".to_string(), path: dir.join("missing.tif")},
                        WellJob{well: "A03".to_string(), path: blank}];
        let annotated = dir.join("annotated");
        let outcomes = track_wells(&tracker, &jobs, 2, Some(&annotated)).unwrap();
        let annotated_good = annotated.join("A01.tif").exists();
        let annotated_failed = annotated.join("A02.tif").exists() ||
            annotated.join("A03.tif").exists();
        fs::remove_dir_all(&dir).unwrap();

        let wells: Vec<&str> = outcomes.iter().map(|o| o.well.as_str()).collect();
        assert_eq!(wells, vec!["A01", "A02", "A03"]);
        match &outcomes[0].result {
            Ok(result) => {
                assert_eq!(result.neurons.len(), 1);
                assert_eq!(result.timepoints, 3);
                assert!(result.neurons[0].is_alive());
            }
            Err(e) => panic!("well A01 failed: {}", e),
        }
        assert!(matches!(outcomes[1].result, Err(TrackError::Io(_))));
        assert!(matches!(&outcomes[2].result,
                         Err(TrackError::NoNeuronsFound{well}) if well == "A03"));
        assert!(annotated_good);
        assert!(!annotated_failed);
    }
}
