use std::time::{Duration, Instant};

use bytemuck::Pod;

use crate::buffer::{Buffer, Residency};
use crate::context::DeviceId;

/// The unit of flow through the pipeline.
///
/// An image owns exactly one buffer plus the metadata stages need to route
/// and label it: dimensions, frame index, plane, acquisition timestamp and
/// the accelerator currently holding the backing memory. Moving an image
/// transfers buffer ownership; dropping it returns a pooled buffer to the
/// registration it came from.
pub struct Image<T: Pod> {
    buffer: Buffer<T>,
    width: usize,
    height: usize,
    index: u64,
    plane: u32,
    device: DeviceId,
    start: Instant,
}

impl<T: Pod> Image<T> {
    /// Wrap a buffer with the given 2-D shape.
    ///
    /// The buffer must hold at least `width * height` elements.
    pub fn new(buffer: Buffer<T>, width: usize, height: usize) -> Self {
        debug_assert!(buffer.len() >= width * height);
        Self {
            buffer,
            width,
            height,
            index: 0,
            plane: 0,
            device: 0,
            start: Instant::now(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn elements(&self) -> usize {
        self.width * self.height
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn plane(&self) -> u32 {
        self.plane
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn residency(&self) -> Residency {
        self.buffer.residency()
    }

    pub fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    pub fn set_plane(&mut self, plane: u32) {
        self.plane = plane;
    }

    pub fn set_device(&mut self, device: DeviceId) {
        self.device = device;
    }

    pub fn set_start(&mut self, start: Instant) {
        self.start = start;
    }

    /// Time since the frame was stamped by the receiver.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Copy all metadata except the buffer from another image.
    pub fn inherit_meta<U: Pod>(&mut self, other: &Image<U>) {
        self.index = other.index;
        self.plane = other.plane;
        self.device = other.device;
        self.start = other.start;
    }

    pub fn data(&self) -> &[T] {
        &self.buffer[..self.width * self.height]
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        let elements = self.width * self.height;
        &mut self.buffer[..elements]
    }

    /// Row `y` of the image.
    pub fn row(&self, y: usize) -> &[T] {
        &self.data()[y * self.width..(y + 1) * self.width]
    }

    pub fn into_buffer(self) -> Buffer<T> {
        self.buffer
    }
}

impl<T: Pod> Clone for Image<T> {
    /// Deep copy into a fresh non-pooled allocation.
    fn clone(&self) -> Self {
        let mut buffer = Buffer::owned(self.elements(), self.buffer.residency());
        buffer[..].copy_from_slice(self.data());
        Self {
            buffer,
            width: self.width,
            height: self.height,
            index: self.index,
            plane: self.plane,
            device: self.device,
            start: self.start,
        }
    }
}

impl<T: Pod> std::fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("index", &self.index)
            .field("plane", &self.plane)
            .field("device", &self.device)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("residency", &self.buffer.residency())
            .finish()
    }
}
