use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytemuck::Pod;
use parking_lot::Mutex;

use risa_core::Result;
use risa_device::{DeviceId, DeviceRegistry, Image, Stream, StreamPriority};

use crate::message::Message;
use crate::queue::Queue;
use crate::stage::Stage;

/// How incoming frames are assigned to per-device worker queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Route by the device id carried on the image (device-resident data).
    ByDevice,
    /// Static round-robin scheduling (host-resident data entering the
    /// accelerators, i.e. the upload stage).
    RoundRobin,
}

/// One frame's worth of work for a compute stage.
///
/// Implementations hold their constant initialisation data (averages,
/// coefficients, permutation tables) and their pool registrations; `run`
/// is invoked on the stage's worker thread for the given device and
/// schedules the actual transform on that worker's command stream.
pub trait Transform: Send + Sync + 'static {
    type In: Pod + Send + 'static;
    type Out: Pod + Send + 'static;

    fn name(&self) -> &'static str;

    fn priority(&self) -> StreamPriority {
        StreamPriority::Normal
    }

    fn run(
        &self,
        device: DeviceId,
        stream: &Stream,
        input: Image<Self::In>,
    ) -> Result<Image<Self::Out>>;
}

/// Per-accelerator worker fan-out implementing the stage contract once for
/// all compute stages.
///
/// One bounded input queue and one worker thread per device; each worker
/// owns a dedicated prioritised command stream. Downstream stages see a
/// single logical output stream; ordering is FIFO per device only.
pub struct DeviceFanout<T: Transform> {
    transform: Arc<T>,
    queues: Vec<(DeviceId, Arc<Queue<Message<Image<T::In>>>>)>,
    results: Arc<Queue<Message<Image<T::Out>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    routing: Routing,
}

impl<T: Transform> DeviceFanout<T> {
    pub fn new(
        transform: T,
        registry: &DeviceRegistry,
        routing: Routing,
        queue_limit: usize,
    ) -> Result<Self> {
        let transform = Arc::new(transform);
        let results = Arc::new(Queue::unbounded());
        let mut queues = Vec::with_capacity(registry.count());
        let mut workers = Vec::with_capacity(registry.count());

        for device in registry.devices() {
            let queue = Arc::new(Queue::bounded(queue_limit));
            let worker = spawn_worker(
                Arc::clone(&transform),
                device,
                Arc::clone(&queue),
                Arc::clone(&results),
            )?;
            queues.push((device, queue));
            workers.push(worker);
        }

        tracing::debug!(
            stage = transform.name(),
            devices = queues.len(),
            ?routing,
            "stage workers started"
        );

        Ok(Self {
            transform,
            queues,
            results,
            workers: Mutex::new(workers),
            next: AtomicUsize::new(0),
            routing,
        })
    }

    fn route(&self, image: &Image<T::In>) -> usize {
        match self.routing {
            Routing::RoundRobin => {
                self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len()
            }
            Routing::ByDevice => {
                let device = image.device();
                match self.queues.iter().position(|(d, _)| *d == device) {
                    Some(slot) => slot,
                    None => {
                        tracing::warn!(
                            stage = self.transform.name(),
                            device,
                            "frame carries unknown device id; routing to first worker"
                        );
                        0
                    }
                }
            }
        }
    }
}

impl<T: Transform> Stage for DeviceFanout<T> {
    type Input = Image<T::In>;
    type Output = Image<T::Out>;

    fn process(&self, input: Message<Self::Input>) {
        match input {
            Message::Frame(image) => {
                let slot = self.route(&image);
                self.queues[slot].1.push(Message::Frame(image));
            }
            Message::EndOfStream => {
                // One sentinel per worker, then wait for all of them to
                // drain before the single outward sentinel is published.
                for (_, queue) in &self.queues {
                    queue.push(Message::EndOfStream);
                }
                for worker in self.workers.lock().drain(..) {
                    if worker.join().is_err() {
                        tracing::error!(
                            stage = self.transform.name(),
                            "stage worker panicked during shutdown"
                        );
                    }
                }
                self.results.push(Message::EndOfStream);
            }
        }
    }

    fn wait(&self) -> Message<Self::Output> {
        self.results.take()
    }
}

fn spawn_worker<T: Transform>(
    transform: Arc<T>,
    device: DeviceId,
    queue: Arc<Queue<Message<Image<T::In>>>>,
    results: Arc<Queue<Message<Image<T::Out>>>>,
) -> Result<JoinHandle<()>> {
    let name = format!("risa-{}-d{device}", transform.name());
    let handle = std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            // The stream binds this worker to its accelerator for the whole
            // run; every transform for this device is ordered through it.
            let stream = Stream::new(device, transform.priority());
            loop {
                match queue.take() {
                    Message::Frame(image) => match transform.run(device, &stream, image) {
                        Ok(output) => results.push(Message::Frame(output)),
                        Err(e) => {
                            tracing::error!(
                                stage = transform.name(),
                                device,
                                error = %e,
                                "fatal stage failure, terminating run"
                            );
                            std::process::exit(1);
                        }
                    },
                    Message::EndOfStream => break,
                }
            }
            stream.synchronize();
            tracing::debug!(stage = transform.name(), device, "stage worker drained");
        })
        .map_err(|e| risa_core::RisaError::Pipeline(format!("cannot spawn worker: {e}")))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use risa_device::{Buffer, MemoryPool, Residency};
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Doubles every sample into a pooled output buffer.
    struct Doubler {
        pool: Arc<MemoryPool<u16>>,
        registrations: BTreeMap<DeviceId, usize>,
        delay: Duration,
    }

    impl Doubler {
        fn new(registry: &DeviceRegistry, pool_size: usize, delay: Duration) -> Self {
            let pool = MemoryPool::new();
            let registrations = registry
                .devices()
                .map(|d| (d, pool.register_stage(pool_size, 4, Residency::Device(d))))
                .collect();
            Self {
                pool,
                registrations,
                delay,
            }
        }
    }

    impl Transform for Doubler {
        type In = u16;
        type Out = u16;

        fn name(&self) -> &'static str {
            "doubler"
        }

        fn run(
            &self,
            device: DeviceId,
            stream: &Stream,
            input: Image<u16>,
        ) -> Result<Image<u16>> {
            let buffer = self.pool.request_memory(self.registrations[&device])?;
            let mut output = Image::new(buffer, input.width(), input.height());
            output.inherit_meta(&input);
            output.set_device(device);

            let delay = self.delay;
            let job = stream.submit(move || {
                std::thread::sleep(delay);
                let mut output = output;
                for (out, sample) in output.data_mut().iter_mut().zip(input.data()) {
                    *out = sample * 2;
                }
                output
            });
            Ok(job.wait())
        }
    }

    fn frame(index: u64, device: DeviceId, fill: u16) -> Image<u16> {
        let mut img = Image::new(Buffer::owned(4, Residency::Host), 2, 2);
        img.set_index(index);
        img.set_device(device);
        img.data_mut().fill(fill);
        img
    }

    #[test]
    fn frames_then_exactly_one_sentinel() {
        let registry = DeviceRegistry::with_count(1).unwrap();
        let stage = DeviceFanout::new(
            Doubler::new(&registry, 8, Duration::ZERO),
            &registry,
            Routing::ByDevice,
            0,
        )
        .unwrap();

        for i in 0..5 {
            stage.process(Message::Frame(frame(i, 0, i as u16)));
        }
        stage.process(Message::EndOfStream);

        for i in 0..5u64 {
            let out = stage.wait().into_frame().expect("frame expected");
            assert_eq!(out.index(), i);
            assert_eq!(out.data()[0], i as u16 * 2);
        }
        assert!(stage.wait().is_end());
    }

    #[test]
    fn two_devices_keep_per_device_fifo() {
        let registry = DeviceRegistry::with_count(2).unwrap();
        let stage = DeviceFanout::new(
            Doubler::new(&registry, 8, Duration::from_millis(1)),
            &registry,
            Routing::ByDevice,
            0,
        )
        .unwrap();

        // Round-robin assignment across the two accelerators.
        for i in 0..10u64 {
            stage.process(Message::Frame(frame(i, (i % 2) as DeviceId, 0)));
        }
        stage.process(Message::EndOfStream);

        let mut per_device: BTreeMap<DeviceId, Vec<u64>> = BTreeMap::new();
        loop {
            match stage.wait() {
                Message::Frame(img) => {
                    per_device.entry(img.device()).or_default().push(img.index())
                }
                Message::EndOfStream => break,
            }
        }

        let total: usize = per_device.values().map(Vec::len).sum();
        assert_eq!(total, 10);
        for (device, indices) in per_device {
            let mut sorted = indices.clone();
            sorted.sort_unstable();
            assert_eq!(indices, sorted, "device {device} out of order");
        }
    }

    #[test]
    fn small_pool_backpressures_without_leaking() {
        let registry = DeviceRegistry::with_count(1).unwrap();
        let doubler = Doubler::new(&registry, 2, Duration::from_millis(10));
        let pool = Arc::clone(&doubler.pool);
        let stage =
            Arc::new(DeviceFanout::new(doubler, &registry, Routing::ByDevice, 0).unwrap());

        // Feed from a separate thread: the worker blocks in the pool after
        // two frames until the consumer below releases output buffers.
        let feeder_stage = Arc::clone(&stage);
        let feeder = std::thread::spawn(move || {
            for i in 0..10 {
                feeder_stage.process(Message::Frame(frame(i, 0, 0)));
            }
            feeder_stage.process(Message::EndOfStream);
        });

        let mut indices = Vec::new();
        loop {
            match stage.wait() {
                Message::Frame(img) => indices.push(img.index()),
                Message::EndOfStream => break,
            }
        }
        feeder.join().unwrap();

        assert_eq!(indices, (0..10).collect::<Vec<u64>>());
        // All pooled buffers back on the free list once outputs are dropped.
        assert_eq!(pool.available(0).unwrap(), 2);
    }

    #[test]
    fn sentinel_without_data_still_terminates() {
        let registry = DeviceRegistry::with_count(2).unwrap();
        let stage = DeviceFanout::new(
            Doubler::new(&registry, 1, Duration::ZERO),
            &registry,
            Routing::RoundRobin,
            0,
        )
        .unwrap();
        stage.process(Message::EndOfStream);
        assert!(stage.wait().is_end());
    }
}
