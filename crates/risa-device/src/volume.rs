use bytemuck::Pod;
use risa_core::{Result, RisaError};

use crate::image::Image;

/// A stack of same-shaped images with 2-D slice access by index.
///
/// Used by result writers to gather reconstructed slices; the pipeline
/// itself only ever moves single images.
pub struct Volume<T: Pod> {
    slices: Vec<Image<T>>,
    width: usize,
    height: usize,
}

impl<T: Pod> Volume<T> {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            slices: Vec::new(),
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Append a slice; its shape must match the volume.
    pub fn push(&mut self, image: Image<T>) -> Result<()> {
        if image.width() != self.width || image.height() != self.height {
            return Err(RisaError::Pipeline(format!(
                "volume slice shape {}x{} does not match {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            )));
        }
        self.slices.push(image);
        Ok(())
    }

    pub fn slice(&self, index: usize) -> Option<&Image<T>> {
        self.slices.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Image<T>> {
        self.slices.iter()
    }

    /// Drop the oldest slice once `limit` is exceeded.
    pub fn truncate_front(&mut self, limit: usize) {
        while self.slices.len() > limit {
            self.slices.remove(0);
        }
    }
}
