use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::context::DeviceId;
use crate::pool::Registration;

/// Where a buffer's backing memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Page-locked host memory, usable for asynchronous DMA.
    Host,
    /// Memory owned by the given accelerator.
    Device(DeviceId),
}

impl Residency {
    pub fn is_device(self) -> bool {
        matches!(self, Residency::Device(_))
    }
}

/// A typed slab of pool- or heap-backed memory.
///
/// Pooled buffers return to their registration's free list on drop; owned
/// buffers (deep copies) are plain allocations. A slab is referenced by at
/// most one live `Buffer` at a time; ownership is the borrow ticket.
pub struct Buffer<T: Pod> {
    slab: Option<Box<[T]>>,
    origin: Origin<T>,
    residency: Residency,
}

enum Origin<T: Pod> {
    Pool(Arc<Registration<T>>),
    Owned,
}

impl<T: Pod> Buffer<T> {
    pub(crate) fn pooled(slab: Box<[T]>, registration: Arc<Registration<T>>) -> Self {
        let residency = registration.residency();
        Self {
            slab: Some(slab),
            origin: Origin::Pool(registration),
            residency,
        }
    }

    /// Allocate a zero-initialised buffer outside any pool.
    pub fn owned(elements: usize, residency: Residency) -> Self {
        Self {
            slab: Some(vec![T::zeroed(); elements].into_boxed_slice()),
            origin: Origin::Owned,
            residency,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Pool registration this buffer came from, if any.
    pub fn registration_index(&self) -> Option<usize> {
        match &self.origin {
            Origin::Pool(registration) => Some(registration.index()),
            Origin::Owned => None,
        }
    }

    pub fn as_slice(&self) -> &[T] {
        self.slab.as_deref().expect("buffer slab already recycled")
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.slab
            .as_deref_mut()
            .expect("buffer slab already recycled")
    }
}

impl<T: Pod> Deref for Buffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Pod> DerefMut for Buffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Pod> Drop for Buffer<T> {
    fn drop(&mut self) {
        if let (Origin::Pool(registration), Some(slab)) = (&self.origin, self.slab.take()) {
            registration.recycle(slab);
        }
    }
}

impl<T: Pod> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("elements", &self.len())
            .field("residency", &self.residency)
            .field("registration", &self.registration_index())
            .finish()
    }
}
