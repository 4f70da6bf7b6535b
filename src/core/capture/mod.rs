//! Camera capture.
//!
//! A [`FrameSource`] abstracts the camera device. [`CameraSession`] owns an
//! opened device for its lifetime and releases it on drop, so the device is
//! never held open past the camera UI being dismissed, a successful capture,
//! or an early return.
//!
//! Snapshots are JPEG-encoded at quality 80 into a [`CapturedImage`], which
//! converts to and from a base64 data URL.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;
use uuid::Uuid;

/// JPEG quality used for snapshots.
pub const JPEG_QUALITY: u8 = 80;

/// Content type of encoded snapshots.
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Errors raised while acquiring or capturing from the camera.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Raw RGB8 frame at the device's native resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB8 pixels, `width * height * 3` bytes
    pub rgb: Vec<u8>,
}

/// A camera device.
pub trait FrameSource: Send {
    /// Acquire the device.
    fn open(&mut self) -> CaptureResult<()>;

    /// Grab the current frame.
    fn grab(&mut self) -> CaptureResult<Frame>;

    /// Release the device. Must be safe to call on an unopened device.
    fn close(&mut self);
}

/// An encoded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub id: Uuid,
    pub content_type: String,
    pub bytes: Bytes,
}

impl CapturedImage {
    pub fn new(content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Encode as `data:<content type>;base64,<payload>`.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            STANDARD.encode(&self.bytes)
        )
    }

    /// Decode a base64 data URL.
    pub fn from_data_url(data_url: &str) -> Option<Self> {
        let (content_type, payload) = parse_data_url(data_url)?;
        let bytes = STANDARD.decode(payload).ok()?;
        Some(Self::new(content_type, bytes))
    }

    /// File extension for the content type.
    pub fn extension(&self) -> &'static str {
        extension_for(&self.content_type)
    }
}

/// Split a base64 data URL into its content type and payload.
pub fn parse_data_url(data_url: &str) -> Option<(&str, &str)> {
    let rest = data_url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let content_type = meta.strip_suffix(";base64")?;
    if content_type.is_empty() {
        return None;
    }
    Some((content_type, payload))
}

/// File extension for an image content type.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

/// Encode an RGB8 frame as JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> CaptureResult<Bytes> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.width == 0 || frame.height == 0 || frame.rgb.len() != expected {
        return Err(CaptureError::Encode(format!(
            "frame {}x{} has {} bytes, expected {}",
            frame.width,
            frame.height,
            frame.rgb.len(),
            expected
        )));
    }

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&frame.rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(Bytes::from(out))
}

/// An opened camera. The device is released when the session is dropped.
pub struct CameraSession<'a> {
    source: &'a mut dyn FrameSource,
}

impl<'a> CameraSession<'a> {
    /// Open the device. On failure the device is closed again before returning.
    pub fn acquire(source: &'a mut dyn FrameSource) -> CaptureResult<Self> {
        if let Err(e) = source.open() {
            source.close();
            tracing::warn!("Failed to open camera: {}", e);
            return Err(e);
        }
        tracing::debug!("Camera opened");
        Ok(Self { source })
    }

    /// Grab the current frame and encode it as JPEG.
    pub fn snapshot(&mut self) -> CaptureResult<CapturedImage> {
        let frame = self.source.grab()?;
        let bytes = encode_jpeg(&frame, JPEG_QUALITY)?;
        tracing::debug!(
            "Captured {}x{} frame ({} bytes)",
            frame.width,
            frame.height,
            bytes.len()
        );
        Ok(CapturedImage::new(JPEG_CONTENT_TYPE, bytes))
    }
}

impl Drop for CameraSession<'_> {
    fn drop(&mut self) {
        self.source.close();
        tracing::debug!("Camera released");
    }
}

/// Open the camera, take one snapshot and release the device.
pub fn capture_once(source: &mut dyn FrameSource) -> CaptureResult<CapturedImage> {
    let mut camera = CameraSession::acquire(source)?;
    camera.snapshot()
}

/// A camera backed by a still image on disk.
#[derive(Debug)]
pub struct FileFrameSource {
    path: PathBuf,
    frame: Option<Frame>,
}

impl FileFrameSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            frame: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for FileFrameSource {
    fn open(&mut self) -> CaptureResult<()> {
        match std::fs::metadata(&self.path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(CaptureError::PermissionDenied);
            }
            Err(e) => {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        }

        let decoded = image::open(&self.path)
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .to_rgb8();
        self.frame = Some(Frame {
            width: decoded.width(),
            height: decoded.height(),
            rgb: decoded.into_raw(),
        });
        Ok(())
    }

    fn grab(&mut self) -> CaptureResult<Frame> {
        self.frame
            .clone()
            .ok_or_else(|| CaptureError::DeviceUnavailable("camera not open".to_string()))
    }

    fn close(&mut self) {
        self.frame = None;
    }
}
