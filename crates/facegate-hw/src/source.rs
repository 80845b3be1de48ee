//! Frame sources: the live camera or a replayed set of still images.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "pgm"];

/// Anything that yields grayscale frames on demand.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Open a frame source from a path: `/dev/*` opens V4L2, anything else is
/// treated as an image file or a directory of images.
pub fn open_source(path: &str) -> Result<Box<dyn FrameSource>, CameraError> {
    if path.starts_with("/dev/") {
        Ok(Box::new(Camera::open(path)?))
    } else {
        Ok(Box::new(StillImageSource::open(Path::new(path))?))
    }
}

/// Replays decoded images in a loop, in file-name order.
pub struct StillImageSource {
    origin: PathBuf,
    frames: Vec<Frame>,
    next: usize,
    sequence: u32,
}

impl StillImageSource {
    pub fn open(path: &Path) -> Result<Self, CameraError> {
        if !path.exists() {
            return Err(CameraError::DeviceNotFound(path.display().to_string()));
        }

        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)
                .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", path.display())))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let frames = files
            .iter()
            .enumerate()
            .map(|(i, file)| {
                let gray = image::open(file)?.into_luma8();
                let (width, height) = gray.dimensions();
                Ok(Frame::from_gray(gray.into_raw(), width, height, i as u32)?)
            })
            .collect::<Result<Vec<Frame>, CameraError>>()?;

        Self::from_frames(path, frames)
    }

    /// Build a source from already-decoded frames.
    pub fn from_frames(origin: &Path, frames: Vec<Frame>) -> Result<Self, CameraError> {
        if frames.is_empty() {
            return Err(CameraError::NoImages(origin.display().to_string()));
        }
        tracing::info!(path = %origin.display(), count = frames.len(), "still image source opened");
        Ok(Self {
            origin: origin.to_path_buf(),
            frames,
            next: 0,
            sequence: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let mut frame = self.frames[self.next].clone();
        self.next = (self.next + 1) % self.frames.len();
        frame.sequence = self.sequence;
        frame.timestamp = std::time::Instant::now();
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn describe(&self) -> String {
        format!("images {} ({} frames)", self.origin.display(), self.frames.len())
    }
}
