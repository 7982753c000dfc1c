use crate::message::Message;

/// Head of a pipeline: produces frames until the stream ends.
///
/// `load` blocks until the next frame is available and returns
/// `EndOfStream` exactly once, after which it is not called again.
pub trait SourceStage: Send + 'static {
    type Output: Send + 'static;

    fn load(&mut self) -> Message<Self::Output>;
}

/// An interior pipeline stage.
///
/// `process` is called by the upstream port with each input message; the
/// stage routes valid frames to its internal workers. On the sentinel it
/// must broadcast one sentinel to each worker, join them, and publish a
/// single sentinel on its output before returning. `wait` dequeues the next
/// completed output and is called from a separate thread, so both sides of
/// the stage run concurrently.
pub trait Stage: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn process(&self, input: Message<Self::Input>);

    fn wait(&self) -> Message<Self::Output>;
}

/// Tail of a pipeline: consumes frames, then observes the sentinel.
pub trait SinkStage: Send + 'static {
    type Input: Send + 'static;

    fn save(&mut self, frame: Self::Input);

    /// Called once when the sentinel arrives, before the pipeline joins.
    fn finish(&mut self) {}
}
