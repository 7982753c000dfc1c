use std::sync::Arc;
use std::thread::JoinHandle;

use risa_core::{Result, RisaError};

use crate::message::Message;
use crate::port::Port;
use crate::queue::Queue;
use crate::stage::{SinkStage, SourceStage, Stage};

/// Connection point into a stage: the queue its upstream port feeds.
pub struct Inlet<T: Send> {
    queue: Arc<Queue<Message<T>>>,
}

impl<T: Send> Clone for Inlet<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

/// Connection point out of a stage: the port its outputs leave through.
pub struct Outlet<T: Send> {
    port: Arc<Port<T>>,
}

impl<T: Send> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        Self {
            port: Arc::clone(&self.port),
        }
    }
}

/// Owns the stage threads of one run.
///
/// Stages are added, connected, then started; `wait` joins every thread
/// and returns once the sentinel has flowed through the whole chain.
pub struct Pipeline {
    launchers: Vec<(String, Box<dyn FnOnce() + Send + 'static>)>,
    threads: Vec<(String, JoinHandle<()>)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            launchers: Vec::new(),
            threads: Vec::new(),
        }
    }

    /// Add a source; one thread pulls frames out of it until end-of-stream.
    pub fn add_source<S: SourceStage>(&mut self, name: &str, mut source: S) -> Outlet<S::Output> {
        let port = Arc::new(Port::new());
        let thread_port = Arc::clone(&port);
        self.launchers.push((
            name.to_string(),
            Box::new(move || loop {
                match source.load() {
                    Message::Frame(frame) => thread_port.forward(frame),
                    Message::EndOfStream => {
                        thread_port.end_of_stream();
                        break;
                    }
                }
            }),
        ));
        Outlet { port }
    }

    /// Add an interior stage.
    ///
    /// Two threads run per stage: a feeder moving input messages into
    /// `process`, and a drainer forwarding `wait` results downstream. The
    /// feeder stops after handing over the sentinel; the drainer stops
    /// after forwarding it.
    pub fn add_stage<S: Stage>(
        &mut self,
        name: &str,
        stage: S,
        queue_limit: usize,
    ) -> (Inlet<S::Input>, Outlet<S::Output>) {
        let stage = Arc::new(stage);
        let queue: Arc<Queue<Message<S::Input>>> = Arc::new(Queue::bounded(queue_limit));
        let port = Arc::new(Port::new());

        let feeder_stage = Arc::clone(&stage);
        let feeder_queue = Arc::clone(&queue);
        self.launchers.push((
            format!("{name}-in"),
            Box::new(move || loop {
                let message = feeder_queue.take();
                let is_end = message.is_end();
                feeder_stage.process(message);
                if is_end {
                    break;
                }
            }),
        ));

        let drainer_port = Arc::clone(&port);
        self.launchers.push((
            format!("{name}-out"),
            Box::new(move || loop {
                match stage.wait() {
                    Message::Frame(frame) => drainer_port.forward(frame),
                    Message::EndOfStream => {
                        drainer_port.end_of_stream();
                        break;
                    }
                }
            }),
        ));

        (Inlet { queue }, Outlet { port })
    }

    /// Add a sink; one thread consumes frames until the sentinel.
    pub fn add_sink<S: SinkStage>(&mut self, name: &str, mut sink: S) -> Inlet<S::Input> {
        let queue = Arc::new(Queue::unbounded());
        let thread_queue = Arc::clone(&queue);
        self.launchers.push((
            name.to_string(),
            Box::new(move || loop {
                match thread_queue.take() {
                    Message::Frame(frame) => sink.save(frame),
                    Message::EndOfStream => {
                        sink.finish();
                        break;
                    }
                }
            }),
        ));
        Inlet { queue }
    }

    /// Attach an outlet to an inlet (1:1 by default; call repeatedly for
    /// fan-out, or attach several outlets to one inlet for fan-in).
    pub fn connect<T: Send>(&self, outlet: &Outlet<T>, inlet: &Inlet<T>) {
        outlet.port.attach(Arc::clone(&inlet.queue));
    }

    /// Spawn every stage thread.
    pub fn start(&mut self) -> Result<()> {
        for (name, launcher) in self.launchers.drain(..) {
            let handle = std::thread::Builder::new()
                .name(format!("risa-{name}"))
                .spawn(launcher)
                .map_err(|e| {
                    RisaError::Pipeline(format!("cannot spawn stage thread `{name}`: {e}"))
                })?;
            self.threads.push((name, handle));
        }
        tracing::info!(threads = self.threads.len(), "pipeline started");
        Ok(())
    }

    /// Join every stage thread; returns after the sentinel has passed
    /// through the entire chain.
    pub fn wait(self) -> Result<()> {
        let mut failed = Vec::new();
        for (name, handle) in self.threads {
            if handle.join().is_err() {
                failed.push(name);
            }
        }
        if failed.is_empty() {
            tracing::info!("pipeline drained");
            Ok(())
        } else {
            Err(RisaError::Pipeline(format!(
                "stage threads panicked: {}",
                failed.join(", ")
            )))
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
