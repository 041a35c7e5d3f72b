// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

use imageproc::rect::Rect;
use log::{info, warn};
use tiff::decoder::{Decoder, DecodingResult, Limits};

use crate::error::{Result, TrackError};
use crate::image_funcs::{crop, Frame};

/// The frames of one well, one per timepoint, all the same size.
#[derive(Clone, Debug, Default)]
pub struct Stack {
    frames: Vec<Frame>,
}

impl Stack {
    pub fn new(frames: Vec<Frame>) -> Stack {
        if let Some(first) = frames.first() {
            let dims = first.dimensions();
            assert!(frames.iter().all(|f| f.dimensions() == dims),
                    "stack frames differ in size");
        }
        Stack{frames}
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// (width, height) of the frames; None for an empty stack.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.frames.first().map(|f| f.dimensions())
    }

    /// Returns a copy with `margin` pixels removed from every edge of every
    /// frame.
    pub fn crop_margin(&self, well: &str, margin: u32) -> Result<Stack> {
        let (width, height) = self.dimensions().ok_or_else(
            || TrackError::EmptyStack{well: well.to_string()})?;
        if width <= 2 * margin || height <= 2 * margin {
            return Err(TrackError::StackTooSmall{well: well.to_string(),
                                                 width, height, margin});
        }
        let rect = Rect::at(margin as i32, margin as i32)
            .of_size(width - 2 * margin, height - 2 * margin);
        Ok(Stack{frames: self.frames.iter().map(|f| crop(f, &rect)).collect()})
    }
}

fn unsupported(path: &Path, reason: String) -> TrackError {
    TrackError::UnsupportedStack{path: path.display().to_string(), reason}
}

/// Reads every page of a grayscale TIFF as one frame. 8 bit samples are
/// widened to the 16 bit range.
pub fn load_tiff_stack(path: &Path) -> Result<Stack> {
    let load_start = Instant::now();
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?
        .with_limits(Limits::unlimited());
    let mut frames = Vec::<Frame>::new();
    loop {
        let (width, height) = decoder.dimensions()?;
        match decoder.colortype()? {
            tiff::ColorType::Gray(8) | tiff::ColorType::Gray(16) => (),
            other => {
                return Err(unsupported(path, format!("color type {:?}", other)));
            }
        }
        let pixels: Vec<u16> = match decoder.read_image()? {
            DecodingResult::U8(buf) => buf.iter().map(|&v| v as u16 * 257).collect(),
            DecodingResult::U16(buf) => buf,
            _ => {
                return Err(unsupported(path, "sample format".to_string()));
            }
        };
        let frame = Frame::from_raw(width, height, pixels).ok_or_else(
            || unsupported(path, format!("page {} is truncated", frames.len())))?;
        if let Some(first) = frames.first() {
            if first.dimensions() != frame.dimensions() {
                return Err(unsupported(
                    path, format!("page {} is {}x{}, expected {:?}",
                                  frames.len(), width, height, first.dimensions())));
            }
        }
        frames.push(frame);
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    info!("Loaded {} frames from {:?} in {:?}",
          frames.len(), path, load_start.elapsed());
    Ok(Stack::new(frames))
}

/// Lists the `.tif`/`.tiff` files in `dir` as (well id, path) pairs, sorted
/// by well id. The well id is the file stem.
pub fn enumerate_wells(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut wells = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_tiff = path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
            .unwrap_or(false);
        if !is_tiff {
            continue;
        }
        match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => wells.push((stem.to_string(), path.clone())),
            None => warn!("Skipping {:?}: file name is not valid UTF-8", path),
        }
    }
    wells.sort();
    Ok(wells)
}

#[cfg(test)]
mod tests {
    use image::Luma;
    use super::*;

    #[test]
    fn test_crop_margin() {
        let frame = Frame::from_fn(10, 8, |x, y| Luma([(y * 10 + x) as u16]));
        let stack = Stack::new(vec![frame.clone(), frame]);
        let cropped = stack.crop_margin("A01", 2).unwrap();
        assert_eq!(cropped.len(), 2);
        assert_eq!(cropped.dimensions(), Some((6, 4)));
        assert_eq!(cropped.frames()[1].get_pixel(0, 0).0[0], 22);
    }

    #[test]
    fn test_crop_errors() {
        let stack = Stack::new(vec![]);
        assert!(matches!(stack.crop_margin("A01", 2), Err(TrackError::EmptyStack{..})));
        let stack = Stack::new(vec![Frame::new(10, 40)]);
        assert!(matches!(stack.crop_margin("A01", 5),
                         Err(TrackError::StackTooSmall{width: 10, ..})));
    }

    #[test]
    fn test_enumerate_wells() {
        let dir = std::env::temp_dir()
            .join(format!("survival_wells_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for name in ["B02.tif", "A01.TIFF", "notes.txt"] {
            fs::write(dir.join(name), b"").unwrap();
        }
        let wells = enumerate_wells(&dir).unwrap();
        let ids: Vec<&str> = wells.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(ids, vec!["A01", "B02"]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_multipage_tiff() {
        use tiff::encoder::{colortype, TiffEncoder};
        let path = std::env::temp_dir()
            .join(format!("survival_stack_{}.tif", std::process::id()));
        {
            let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
            let page0: Vec<u8> = (0..12).collect();
            let page1: Vec<u8> = vec![255; 12];
            encoder.write_image::<colortype::Gray8>(4, 3, &page0).unwrap();
            encoder.write_image::<colortype::Gray8>(4, 3, &page1).unwrap();
        }
        let stack = load_tiff_stack(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.dimensions(), Some((4, 3)));
        assert_eq!(stack.frames()[0].get_pixel(1, 0).0[0], 257);
        assert_eq!(stack.frames()[1].get_pixel(3, 2).0[0], 65535);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_tiff_stack(Path::new("/nonexistent/well.tif")).unwrap_err();
        assert!(matches!(err, TrackError::Io(_)));
    }
}
