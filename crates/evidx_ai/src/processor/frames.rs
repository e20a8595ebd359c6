use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use evidx_core::error::{codes, AppError};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat, RgbaImage};

/// A decoded-on-demand sequence of video frames.
pub trait FrameSource {
    fn frame_count(&self) -> usize;
    fn decode_frame(&self, index: usize) -> Result<DynamicImage, AppError>;
}

/// Evenly spaced frame indices from `0` to `total - 1` inclusive, at most `max_frames` of them.
///
/// Index `i` of `n` is `floor(i * (total - 1) / (n - 1))`; a single sample is frame 0.
pub fn sample_frame_indices(total: usize, max_frames: usize) -> Vec<usize> {
    let n = total.min(max_frames);
    match n {
        0 => Vec::new(),
        1 => vec![0],
        _ => (0..n).map(|i| i * (total - 1) / (n - 1)).collect(),
    }
}

/// Sampled frames of an animated GIF, fully composited.
///
/// Decoding streams twice: once to count frames, once to keep only the frames at
/// [`sample_frame_indices`] positions, so memory is bounded by `max_frames` rather than the
/// length of the video. Counting stops at the first corrupt frame; that frame still occupies
/// its position and decodes to an error.
pub struct GifFrames {
    total: usize,
    kept: BTreeMap<usize, Result<RgbaImage, String>>,
}

fn gif_decoder(bytes: &[u8]) -> Result<GifDecoder<Cursor<&[u8]>>, AppError> {
    GifDecoder::new(Cursor::new(bytes)).map_err(|e| {
        AppError::new(codes::CONTENT_INVALID, "Failed to open GIF video").with_details(e.to_string())
    })
}

impl GifFrames {
    pub fn from_bytes(bytes: &[u8], max_frames: usize) -> Result<Self, AppError> {
        match image::guess_format(bytes) {
            Ok(ImageFormat::Gif) => {}
            _ => {
                return Err(AppError::new(
                    codes::CONTENT_INVALID,
                    "Unsupported video container; expected an animated GIF or a frame directory",
                ))
            }
        }

        let mut total = 0usize;
        for frame in gif_decoder(bytes)?.into_frames() {
            total += 1;
            if frame.is_err() {
                break;
            }
        }

        let wanted: BTreeSet<usize> = sample_frame_indices(total, max_frames).into_iter().collect();
        let mut kept = BTreeMap::new();
        for (index, frame) in gif_decoder(bytes)?.into_frames().enumerate().take(total) {
            if !wanted.contains(&index) {
                continue;
            }
            kept.insert(index, frame.map(|f| f.into_buffer()).map_err(|e| e.to_string()));
        }
        Ok(Self { total, kept })
    }
}

impl FrameSource for GifFrames {
    fn frame_count(&self) -> usize {
        self.total
    }

    fn decode_frame(&self, index: usize) -> Result<DynamicImage, AppError> {
        match self.kept.get(&index) {
            Some(Ok(buf)) => Ok(DynamicImage::ImageRgba8(buf.clone())),
            Some(Err(e)) => Err(AppError::new(codes::CONTENT_INVALID, "Failed to decode GIF frame")
                .with_details(format!("frame={index}; err={e}"))),
            None if index < self.total => Err(AppError::new(
                codes::CONTENT_INVALID,
                "Frame was not kept by sampling",
            )
            .with_details(format!("frame={index}; kept={}", self.kept.len()))),
            None => Err(AppError::new(codes::CONTENT_INVALID, "Frame index out of range")
                .with_details(format!("frame={index}; total={}", self.total))),
        }
    }
}

/// A directory of still images treated as consecutive frames, ordered by file name.
pub struct ImageSequence {
    files: Vec<PathBuf>,
}

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        let entries = fs::read_dir(dir).map_err(|e| {
            AppError::new(codes::CONTENT_NOT_FOUND, "Failed to read frame directory")
                .with_details(format!("path={}; err={}", dir.display(), e))
        })?;
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .and_then(|s| s.to_str())
                    .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(Self { files })
    }
}

impl FrameSource for ImageSequence {
    fn frame_count(&self) -> usize {
        self.files.len()
    }

    fn decode_frame(&self, index: usize) -> Result<DynamicImage, AppError> {
        let path = self.files.get(index).ok_or_else(|| {
            AppError::new(codes::CONTENT_INVALID, "Frame index out of range")
                .with_details(format!("frame={index}; total={}", self.files.len()))
        })?;
        let bytes = fs::read(path).map_err(|e| {
            AppError::new(codes::CONTENT_NOT_FOUND, "Failed to read frame file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        image::load_from_memory(&bytes).map_err(|e| {
            AppError::new(codes::CONTENT_INVALID, "Failed to decode frame image")
                .with_details(format!("path={}; err={}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_evenly_including_last_frame() {
        assert_eq!(sample_frame_indices(100, 8), vec![0, 14, 28, 42, 56, 70, 84, 99]);
        assert_eq!(sample_frame_indices(8, 8), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn short_sources_yield_every_frame() {
        assert_eq!(sample_frame_indices(3, 8), vec![0, 1, 2]);
        assert_eq!(sample_frame_indices(1, 8), vec![0]);
        assert!(sample_frame_indices(0, 8).is_empty());
    }

    #[test]
    fn non_gif_bytes_are_rejected() {
        let err = GifFrames::from_bytes(b"not a video", 8).err().expect("err");
        assert_eq!(err.code, codes::CONTENT_INVALID);
    }

    fn animated_gif(frames: usize) -> Vec<u8> {
        use image::codecs::gif::GifEncoder;
        use image::{Frame, Rgba};

        let mut buf = Vec::new();
        {
            let mut enc = GifEncoder::new(&mut buf);
            let frames = (0..frames).map(|i| Frame::new(RgbaImage::from_pixel(4, 4, Rgba([i as u8, 0, 0, 255]))));
            enc.encode_frames(frames).unwrap();
        }
        buf
    }

    #[test]
    fn long_gif_keeps_only_sampled_frames() {
        let gif = GifFrames::from_bytes(&animated_gif(30), 4).unwrap();
        assert_eq!(gif.frame_count(), 30);
        assert_eq!(gif.kept.keys().copied().collect::<Vec<_>>(), vec![0, 9, 19, 29]);

        let last = gif.decode_frame(29).unwrap();
        assert_eq!((last.width(), last.height()), (4, 4));
        assert_eq!(gif.decode_frame(5).unwrap_err().code, codes::CONTENT_INVALID);
    }
}
