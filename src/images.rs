//! Uploaded pictures: validated, cropped to a fixed size, re-encoded as JPEG
//! and written under the public image directory.
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use image::{DynamicImage, codecs::jpeg::JpegEncoder, imageops::FilterType};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::error::HttpError;

/// Request bodies carrying uploads may be this large.
pub const UPLOAD_LIMIT: usize = 20 * 1024 * 1024;

pub const USER_PHOTO: Size = Size {
    width: 500,
    height: 500,
};
pub const TOUR_IMAGE: Size = Size {
    width: 2000,
    height: 1333,
};

const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Not an image! Please upload only images.")]
    NotAnImage,
    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("could not encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("could not store image: {0}")]
    Io(#[from] std::io::Error),
    #[error("resize task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<ImageError> for HttpError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::NotAnImage => HttpError::bad_request(ImageError::NotAnImage.to_string()),
            ImageError::Decode(e) => {
                HttpError::bad_request("The uploaded image could not be read.").with_detail(e)
            }
            other => HttpError::internal(other),
        }
    }
}

/// One file part of a multipart request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub content_type: String,
    pub bytes: Bytes,
}

impl Upload {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

/// Crop to fill `size` around the centre and encode as JPEG.
pub fn resize_to_jpeg(bytes: &[u8], size: Size) -> Result<Vec<u8>, ImageError> {
    let decoded = image::load_from_memory(bytes).map_err(ImageError::Decode)?;
    let resized = decoded.resize_to_fill(size.width, size.height, FilterType::Lanczos3);

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(resized.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(ImageError::Encode)?;
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ImageStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resize off the async workers and write `<root>/<dir>/<filename>`.
    /// Returns the file name, which is what documents store.
    pub async fn save(
        &self,
        upload: Upload,
        dir: &str,
        filename: String,
        size: Size,
    ) -> Result<String, ImageError> {
        if !upload.is_image() {
            return Err(ImageError::NotAnImage);
        }

        let encoded = tokio::task::spawn_blocking(move || resize_to_jpeg(&upload.bytes, size)).await??;

        let dir = self.root.join(dir);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&filename), encoded).await?;

        tracing::debug!(file = %filename, "image stored");
        Ok(filename)
    }

    /// Process every upload concurrently and wait for all of them. The first
    /// failure aborts the rest and nothing is reported as stored.
    pub async fn save_all(
        &self,
        uploads: Vec<(Upload, String)>,
        dir: &str,
        size: Size,
    ) -> Result<Vec<String>, ImageError> {
        let mut names = vec![String::new(); uploads.len()];
        let mut tasks = JoinSet::new();

        for (idx, (upload, filename)) in uploads.into_iter().enumerate() {
            let store = self.clone();
            let dir = dir.to_string();
            tasks.spawn(async move {
                store
                    .save(upload, &dir, filename, size)
                    .await
                    .map(|name| (idx, name))
            });
        }

        // dropping the set on an early return aborts what is still running
        while let Some(joined) = tasks.join_next().await {
            let (idx, name) = joined??;
            names[idx] = name;
        }
        Ok(names)
    }
}
