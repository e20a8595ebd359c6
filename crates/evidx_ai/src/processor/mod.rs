use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use evidx_core::config::ProcessingConfig;
use evidx_core::domain::Modality;
use evidx_core::error::{codes, AppError};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub mod frames;

pub use frames::{sample_frame_indices, FrameSource, GifFrames, ImageSequence};

/// Where raw evidence comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRef {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Text(String),
}

impl ContentRef {
    /// Short human-readable label for logs and reports.
    pub fn label(&self) -> String {
        match self {
            ContentRef::Path(p) => p.display().to_string(),
            ContentRef::Bytes(b) => format!("<{} bytes>", b.len()),
            ContentRef::Text(t) => {
                let head: String = t.chars().take(40).collect();
                format!("text:{head:?}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    /// Lowercase format name, e.g. `png`.
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Wav,
    Flac,
    Ogg,
    Mp3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedAudio {
    pub format: AudioFormat,
    pub bytes: Vec<u8>,
}

/// One unit of oracle input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedInput {
    Text(String),
    Image(EncodedImage),
    Audio(EncodedAudio),
}

impl PreparedInput {
    pub fn describe(&self) -> String {
        match self {
            PreparedInput::Text(t) => format!("text ({} chars)", t.chars().count()),
            PreparedInput::Image(img) => format!(
                "image/{} {}x{} ({} bytes)",
                img.format,
                img.width,
                img.height,
                img.bytes.len()
            ),
            PreparedInput::Audio(a) => format!("audio/{:?} ({} bytes)", a.format, a.bytes.len()),
        }
    }
}

/// Processor output: every input for one evidence item. Video carries one input per
/// successfully decoded sampled frame; all other modalities carry exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedInput {
    pub modality: Modality,
    pub inputs: Vec<PreparedInput>,
    pub skipped_frames: usize,
}

#[derive(Debug, Clone)]
pub struct ModalityProcessor {
    max_frames: usize,
    depth_size: u32,
}

impl Default for ModalityProcessor {
    fn default() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }
}

impl ModalityProcessor {
    pub fn new(max_frames: usize, depth_size: u32) -> Self {
        Self {
            max_frames: max_frames.max(1),
            depth_size: depth_size.max(1),
        }
    }

    pub fn from_config(cfg: &ProcessingConfig) -> Self {
        Self::new(cfg.video_frames, cfg.depth_size)
    }

    pub fn prepare(&self, content: &ContentRef, modality: Modality) -> Result<ProcessedInput, AppError> {
        let inputs = match modality {
            Modality::Text => vec![PreparedInput::Text(load_text(content)?)],
            Modality::Vision => vec![PreparedInput::Image(validate_image(load_bytes(content)?)?)],
            Modality::Audio => vec![PreparedInput::Audio(validate_audio(load_bytes(content)?)?)],
            Modality::Depth => vec![PreparedInput::Image(normalize_depth(
                &load_bytes(content)?,
                self.depth_size,
            )?)],
            Modality::Video => {
                let source = open_frame_source(content, self.max_frames)?;
                return Ok(self.prepare_frames(source.as_ref()));
            }
        };
        Ok(ProcessedInput {
            modality,
            inputs,
            skipped_frames: 0,
        })
    }

    /// Sample and encode frames in memory. Frames that fail to decode or encode are skipped.
    pub fn prepare_frames(&self, source: &dyn FrameSource) -> ProcessedInput {
        let total = source.frame_count();
        let indices = sample_frame_indices(total, self.max_frames);
        let mut inputs = Vec::with_capacity(indices.len());
        let mut skipped = 0usize;

        for idx in indices {
            let frame = source.decode_frame(idx).and_then(|img| encode_png(&img));
            match frame {
                Ok(img) => inputs.push(PreparedInput::Image(img)),
                Err(e) => {
                    warn!(frame = idx, total, code = %e.code, details = ?e.details, "skipping undecodable video frame");
                    skipped += 1;
                }
            }
        }
        if inputs.is_empty() {
            warn!(total, "video produced no usable frames");
        } else {
            debug!(total, sampled = inputs.len(), skipped, "video frames prepared");
        }

        ProcessedInput {
            modality: Modality::Video,
            inputs,
            skipped_frames: skipped,
        }
    }
}

fn ensure_exists(path: &Path) -> Result<(), AppError> {
    if !path.exists() {
        return Err(AppError::new(codes::CONTENT_NOT_FOUND, "Content path does not exist")
            .with_details(format!("path={}", path.display())));
    }
    Ok(())
}

fn load_bytes(content: &ContentRef) -> Result<Vec<u8>, AppError> {
    match content {
        ContentRef::Path(p) => {
            ensure_exists(p)?;
            if p.is_dir() {
                return Err(AppError::new(codes::CONTENT_INVALID, "Content path is a directory")
                    .with_details(format!("path={}", p.display())));
            }
            fs::read(p).map_err(|e| {
                AppError::new(codes::CONTENT_NOT_FOUND, "Failed to read content file")
                    .with_details(format!("path={}; err={}", p.display(), e))
            })
        }
        ContentRef::Bytes(b) => Ok(b.clone()),
        ContentRef::Text(_) => Err(AppError::new(
            codes::CONTENT_INVALID,
            "Literal text is only valid for the text modality",
        )),
    }
}

fn load_text(content: &ContentRef) -> Result<String, AppError> {
    match content {
        ContentRef::Text(t) => Ok(t.clone()),
        ContentRef::Path(p) => {
            ensure_exists(p)?;
            fs::read_to_string(p).map_err(|e| {
                AppError::new(codes::CONTENT_INVALID, "Failed to read text content as UTF-8")
                    .with_details(format!("path={}; err={}", p.display(), e))
            })
        }
        ContentRef::Bytes(b) => String::from_utf8(b.clone()).map_err(|e| {
            AppError::new(codes::CONTENT_INVALID, "Text content is not valid UTF-8")
                .with_details(e.to_string())
        }),
    }
}

fn format_name(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .copied()
        .unwrap_or("unknown")
        .to_string()
}

fn validate_image(bytes: Vec<u8>) -> Result<EncodedImage, AppError> {
    let format = image::guess_format(&bytes).map_err(|e| {
        AppError::new(codes::CONTENT_INVALID, "Unrecognized image format")
            .with_details(e.to_string())
    })?;
    let (width, height) = ImageReader::with_format(Cursor::new(&bytes), format)
        .into_dimensions()
        .map_err(|e| {
            AppError::new(codes::CONTENT_INVALID, "Failed to read image header")
                .with_details(e.to_string())
        })?;
    Ok(EncodedImage {
        format: format_name(format),
        width,
        height,
        bytes,
    })
}

fn sniff_audio(bytes: &[u8]) -> Option<AudioFormat> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return Some(AudioFormat::Wav);
    }
    if bytes.starts_with(b"fLaC") {
        return Some(AudioFormat::Flac);
    }
    if bytes.starts_with(b"OggS") {
        return Some(AudioFormat::Ogg);
    }
    if bytes.starts_with(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0) {
        return Some(AudioFormat::Mp3);
    }
    None
}

fn validate_audio(bytes: Vec<u8>) -> Result<EncodedAudio, AppError> {
    let format = sniff_audio(&bytes).ok_or_else(|| {
        AppError::new(codes::CONTENT_INVALID, "Unrecognized audio format")
            .with_details(format!("len={}", bytes.len()))
    })?;
    Ok(EncodedAudio { format, bytes })
}

/// Depth maps are single-channel: grayscale, resize to `size`x`size`, re-encode as PNG.
fn normalize_depth(bytes: &[u8], size: u32) -> Result<EncodedImage, AppError> {
    let img = image::load_from_memory(bytes).map_err(|e| {
        AppError::new(codes::CONTENT_INVALID, "Failed to decode depth map")
            .with_details(e.to_string())
    })?;
    let gray = img.to_luma8();
    let resized = image::imageops::resize(&gray, size, size, FilterType::Triangle);
    encode_png(&DynamicImage::ImageLuma8(resized))
}

pub(crate) fn encode_png(img: &DynamicImage) -> Result<EncodedImage, AppError> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| {
            AppError::new(codes::CONTENT_INVALID, "Failed to encode image as PNG")
                .with_details(e.to_string())
        })?;
    Ok(EncodedImage {
        format: "png".to_string(),
        width: img.width(),
        height: img.height(),
        bytes,
    })
}

fn open_frame_source(content: &ContentRef, max_frames: usize) -> Result<Box<dyn FrameSource>, AppError> {
    match content {
        ContentRef::Path(p) if p.is_dir() => Ok(Box::new(ImageSequence::open(p)?)),
        ContentRef::Path(_) | ContentRef::Bytes(_) => {
            let bytes = load_bytes(content)?;
            Ok(Box::new(GifFrames::from_bytes(&bytes, max_frames)?))
        }
        ContentRef::Text(_) => Err(AppError::new(
            codes::CONTENT_INVALID,
            "Literal text is only valid for the text modality",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(w, h, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 128]));
        encode_png(&DynamicImage::ImageRgb8(img)).unwrap().bytes
    }

    #[test]
    fn depth_is_grayscale_at_canonical_size() {
        let p = ModalityProcessor::new(8, 224);
        let out = p
            .prepare(&ContentRef::Bytes(png_bytes(40, 30)), Modality::Depth)
            .expect("prepare");
        assert_eq!(out.inputs.len(), 1);
        let PreparedInput::Image(img) = &out.inputs[0] else {
            panic!("expected image input");
        };
        assert_eq!((img.width, img.height), (224, 224));
        let decoded = image::load_from_memory(&img.bytes).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
    }

    #[test]
    fn vision_passes_bytes_through() {
        let bytes = png_bytes(12, 9);
        let out = ModalityProcessor::default()
            .prepare(&ContentRef::Bytes(bytes.clone()), Modality::Vision)
            .expect("prepare");
        let PreparedInput::Image(img) = &out.inputs[0] else {
            panic!("expected image input");
        };
        assert_eq!(img.bytes, bytes);
        assert_eq!(img.format, "png");
        assert_eq!((img.width, img.height), (12, 9));
    }

    #[test]
    fn empty_text_is_valid() {
        let out = ModalityProcessor::default()
            .prepare(&ContentRef::Text(String::new()), Modality::Text)
            .expect("prepare");
        assert_eq!(out.inputs, vec![PreparedInput::Text(String::new())]);
    }

    #[test]
    fn missing_path_is_content_not_found() {
        let err = ModalityProcessor::default()
            .prepare(
                &ContentRef::Path(PathBuf::from("/definitely/not/here.jpg")),
                Modality::Vision,
            )
            .unwrap_err();
        assert_eq!(err.code, codes::CONTENT_NOT_FOUND);
    }

    #[test]
    fn format_validation_rejects_garbage() {
        let p = ModalityProcessor::default();
        let err = p
            .prepare(&ContentRef::Bytes(b"hello".to_vec()), Modality::Vision)
            .unwrap_err();
        assert_eq!(err.code, codes::CONTENT_INVALID);
        let err = p
            .prepare(&ContentRef::Bytes(b"hello".to_vec()), Modality::Audio)
            .unwrap_err();
        assert_eq!(err.code, codes::CONTENT_INVALID);
        let err = p
            .prepare(&ContentRef::Text("x".to_string()), Modality::Depth)
            .unwrap_err();
        assert_eq!(err.code, codes::CONTENT_INVALID);
    }

    #[test]
    fn sniffs_common_audio_containers() {
        let mut wav = b"RIFF".to_vec();
        wav.extend_from_slice(&[0, 0, 0, 0]);
        wav.extend_from_slice(b"WAVEfmt ");
        assert_eq!(sniff_audio(&wav), Some(AudioFormat::Wav));
        assert_eq!(sniff_audio(b"fLaC\0\0"), Some(AudioFormat::Flac));
        assert_eq!(sniff_audio(b"ID3\x04"), Some(AudioFormat::Mp3));
        assert_eq!(sniff_audio(b"RIFF"), None);
    }

    struct BrokenEveryOther {
        total: usize,
    }

    impl FrameSource for BrokenEveryOther {
        fn frame_count(&self) -> usize {
            self.total
        }

        fn decode_frame(&self, index: usize) -> Result<DynamicImage, AppError> {
            if index % 2 == 1 {
                return Err(AppError::new(codes::CONTENT_INVALID, "corrupt"));
            }
            Ok(DynamicImage::ImageRgb8(RgbImage::new(4, 4)))
        }
    }

    #[test]
    fn undecodable_frames_are_skipped() {
        let p = ModalityProcessor::new(4, 224);
        // indices 0, 3, 6, 9 -> odd ones (3, 9) fail
        let out = p.prepare_frames(&BrokenEveryOther { total: 10 });
        assert_eq!(out.modality, Modality::Video);
        assert_eq!(out.inputs.len(), 2);
        assert_eq!(out.skipped_frames, 2);
    }
}
