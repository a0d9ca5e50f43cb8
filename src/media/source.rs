//! Fallback frame sources
//!
//! Used by the pacing loop while the live pipeline has not produced its first
//! frame yet. A source is pulled at most once per first-frame poll period.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::frame::Frame;
use crate::error::Result;

/// File extensions picked up by [`FolderFrameSource`]
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// A source of substitute frames
pub trait FallbackSource: Send {
    /// Next frame, or `None` if the source has nothing to offer right now
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Cycles over a fixed set of in-memory frames
#[derive(Debug, Clone)]
pub struct StaticFrameSource {
    frames: Vec<Frame>,
    index: usize,
}

impl StaticFrameSource {
    /// Create a source cycling over `frames`
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames, index: 0 }
    }

    /// A source that always yields the same frame
    pub fn single(frame: Frame) -> Self {
        Self::new(vec![frame])
    }
}

impl FallbackSource for StaticFrameSource {
    fn next_frame(&mut self) -> Option<Frame> {
        if self.frames.is_empty() {
            return None;
        }
        let frame = self.frames[self.index % self.frames.len()].clone();
        self.index = (self.index + 1) % self.frames.len();
        Some(frame)
    }
}

/// Cycles over the image files in a directory, oldest first
///
/// The directory is rescanned whenever the current listing is exhausted, so
/// images written by the pipeline while streaming are picked up on the next
/// pass.
#[derive(Debug)]
pub struct FolderFrameSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    index: usize,
}

impl FolderFrameSource {
    /// Create a source reading from `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: Vec::new(),
            index: 0,
        })
    }

    /// Directory being read
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn refresh(&mut self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to list fallback folder");
                self.files.clear();
                self.index = 0;
                return;
            }
        };

        let mut files: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| has_image_extension(path))
            .map(|path| {
                let modified = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .collect();
        files.sort();

        self.files = files.into_iter().map(|(_, path)| path).collect();
        self.index = 0;
    }

    fn next_path(&mut self) -> Option<PathBuf> {
        if self.index >= self.files.len() {
            self.refresh();
        }
        let path = self.files.get(self.index)?.clone();
        self.index += 1;
        Some(path)
    }
}

impl FallbackSource for FolderFrameSource {
    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let path = self.next_path()?;
            match load_image(&path) {
                Ok(frame) => return Some(frame),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to load fallback frame");
                    // Give up for this pass once the listing is exhausted
                    if self.index >= self.files.len() {
                        return None;
                    }
                }
            }
        }
    }
}

/// Decode an image file into an RGB frame
pub fn load_image(path: &Path) -> Result<Frame> {
    let image = image::open(path)?.to_rgb8();
    let (width, height) = image.dimensions();
    Ok(Frame::from_rgb(width, height, image.into_raw())?)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
