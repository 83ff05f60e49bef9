//! Persistence of faces no enrolled student claimed.
//!
//! Every unknown face gets a crop on disk and its embedding in the
//! [`EmbeddingStore`], both named `unknown_<timestamp>_<seq>`. The sequence
//! restarts at zero on each call, so two calls within the same second write
//! to the same names; the later call overwrites the earlier one.

use crate::matcher::PendingUnknown;
use crate::store::{unknown_key, EmbeddingStore, StoreError};
use crate::types::{BoundingBox, UnknownFace};
use chrono::{DateTime, TimeZone};
use image::{ImageFormat, RgbImage};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_PUBLIC_PREFIX: &str = "/ai-engine/unknown_faces";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("face {index} at {location:?} lies outside the {width}x{height} image")]
    EmptyCrop {
        index: usize,
        location: BoundingBox,
        width: u32,
        height: u32,
    },
    #[error("failed to write face crop {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Writes unknown-face crops and embeddings.
#[derive(Debug)]
pub struct UnknownFaceArchiver {
    faces_dir: PathBuf,
    public_prefix: String,
    store: Arc<EmbeddingStore>,
}

impl UnknownFaceArchiver {
    pub fn new(
        faces_dir: impl Into<PathBuf>,
        public_prefix: impl Into<String>,
        store: Arc<EmbeddingStore>,
    ) -> Result<Self, ArchiveError> {
        let faces_dir = faces_dir.into();
        fs::create_dir_all(&faces_dir).map_err(|source| ArchiveError::Io {
            path: faces_dir.clone(),
            source,
        })?;
        Ok(Self {
            faces_dir,
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
            store,
        })
    }

    pub fn faces_dir(&self) -> &std::path::Path {
        &self.faces_dir
    }

    /// Archive `pending` faces cut from `image`, in order.
    ///
    /// Artifacts already written stay on disk if a later face fails.
    pub fn archive<Tz: TimeZone>(
        &self,
        image: &RgbImage,
        pending: Vec<PendingUnknown>,
        now: &DateTime<Tz>,
    ) -> Result<Vec<UnknownFace>, ArchiveError>
    where
        Tz::Offset: std::fmt::Display,
    {
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let mut archived = Vec::with_capacity(pending.len());

        for (seq, face) in pending.into_iter().enumerate() {
            let (x, y, w, h) = clamp_to_image(&face.location, image.width(), image.height())
                .ok_or(ArchiveError::EmptyCrop {
                    index: seq,
                    location: face.location,
                    width: image.width(),
                    height: image.height(),
                })?;

            let name = unknown_key(&timestamp, seq);
            let file_name = format!("{name}.jpg");
            let crop_path = self.faces_dir.join(&file_name);
            if crop_path.exists() {
                tracing::warn!(
                    path = %crop_path.display(),
                    "unknown-face name collision; overwriting crop from an earlier call"
                );
            }

            let crop = image::imageops::crop_imm(image, x, y, w, h).to_image();
            crop.save_with_format(&crop_path, ImageFormat::Jpeg)
                .map_err(|source| ArchiveError::Image {
                    path: crop_path.clone(),
                    source,
                })?;

            let embedding_path = self.store.save(&face.embedding, &name)?;

            tracing::debug!(name = %name, width = w, height = h, "unknown face archived");
            archived.push(UnknownFace {
                location: face.location,
                face_image_path: format!("{}/{file_name}", self.public_prefix),
                embedding_path,
                best_confidence: face.best_confidence,
            });
        }

        Ok(archived)
    }
}

/// Clip a box to the image, returning `(x, y, width, height)` if anything remains.
fn clamp_to_image(location: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let max_x = i32::try_from(width).unwrap_or(i32::MAX);
    let max_y = i32::try_from(height).unwrap_or(i32::MAX);

    let left = location.left.clamp(0, max_x);
    let right = location.right.clamp(0, max_x);
    let top = location.top.clamp(0, max_y);
    let bottom = location.bottom.clamp(0, max_y);

    if right <= left || bottom <= top {
        return None;
    }
    Some((
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}
