use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use parking_lot::{Condvar, Mutex};

use crate::buffer::{Buffer, Residency};
use crate::context::DeviceId;

/// Preallocated memory pool, one per element type.
///
/// Stages register once at startup and borrow buffers during processing.
/// `request_memory` never allocates on the hot path: an empty free list
/// blocks the caller until another borrower drops its buffer. This is the
/// pipeline's primary backpressure mechanism; sizing the registrations so
/// that in-flight buffers never exceed pool capacity is the operator's
/// responsibility (`mempoolsize_*`).
pub struct MemoryPool<T: Pod> {
    registrations: Mutex<Vec<Arc<Registration<T>>>>,
}

/// A stage's slot in the pool: a fixed set of same-sized slabs.
pub struct Registration<T: Pod> {
    index: usize,
    elements: usize,
    capacity: usize,
    residency: Residency,
    free: Mutex<Vec<Box<[T]>>>,
    available: Condvar,
    closed: AtomicBool,
}

impl<T: Pod> Registration<T> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Return a slab to the free list and wake one blocked requester.
    ///
    /// After teardown the slab is simply dropped.
    pub(crate) fn recycle(&self, slab: Box<[T]>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.free.lock().push(slab);
        self.available.notify_one();
    }
}

impl<T: Pod> MemoryPool<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registrations: Mutex::new(Vec::new()),
        })
    }

    /// Reserve `count` buffers of `elements` elements each.
    ///
    /// Returns the registration index used to borrow buffers later.
    /// Indices are stable for the process lifetime; registrations are never
    /// recreated.
    pub fn register_stage(
        &self,
        count: usize,
        elements: usize,
        residency: Residency,
    ) -> usize {
        let mut registrations = self.registrations.lock();
        let index = registrations.len();
        let slabs = (0..count)
            .map(|_| vec![T::zeroed(); elements].into_boxed_slice())
            .collect();
        registrations.push(Arc::new(Registration {
            index,
            elements,
            capacity: count,
            residency,
            free: Mutex::new(slabs),
            available: Condvar::new(),
            closed: AtomicBool::new(false),
        }));
        tracing::debug!(index, count, elements, ?residency, "pool registration");
        index
    }

    /// Borrow a buffer from a registration, blocking while none is free.
    pub fn request_memory(&self, index: usize) -> risa_core::Result<Buffer<T>> {
        let registration = self.registration(index)?;
        let mut free = registration.free.lock();
        loop {
            if registration.closed.load(Ordering::Acquire) {
                return Err(risa_core::RisaError::Pool(format!(
                    "registration {index} has been freed"
                )));
            }
            if let Some(slab) = free.pop() {
                drop(free);
                return Ok(Buffer::pooled(slab, registration.clone()));
            }
            registration.available.wait(&mut free);
        }
    }

    /// Release all buffers of a registration at teardown.
    ///
    /// Buffers still in flight are dropped instead of recycled when their
    /// images go out of scope.
    pub fn free_memory(&self, index: usize) -> risa_core::Result<()> {
        let registration = self.registration(index)?;
        registration.closed.store(true, Ordering::Release);
        let drained = registration.free.lock().drain(..).count();
        registration.available.notify_all();
        tracing::debug!(index, drained, "pool registration freed");
        Ok(())
    }

    /// Buffers currently on the free list of a registration.
    pub fn available(&self, index: usize) -> risa_core::Result<usize> {
        Ok(self.registration(index)?.free.lock().len())
    }

    /// Buffers preallocated for a registration.
    pub fn capacity(&self, index: usize) -> risa_core::Result<usize> {
        Ok(self.registration(index)?.capacity)
    }

    /// Element count of the buffers in a registration.
    pub fn elements(&self, index: usize) -> risa_core::Result<usize> {
        Ok(self.registration(index)?.elements)
    }

    fn registration(&self, index: usize) -> risa_core::Result<Arc<Registration<T>>> {
        self.registrations
            .lock()
            .get(index)
            .cloned()
            .ok_or_else(|| {
                risa_core::RisaError::Pool(format!(
                    "stage must be registered before requesting memory (index {index})"
                ))
            })
    }
}

/// Register one stage slot per device, all with the same shape.
pub fn register_per_device<T: Pod>(
    pool: &MemoryPool<T>,
    devices: impl Iterator<Item = DeviceId>,
    count: usize,
    elements: usize,
) -> std::collections::BTreeMap<DeviceId, usize> {
    devices
        .map(|device| {
            (
                device,
                pool.register_stage(count, elements, Residency::Device(device)),
            )
        })
        .collect()
}
