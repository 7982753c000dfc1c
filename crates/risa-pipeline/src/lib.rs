//! Typed streaming pipeline framework.
//!
//! A pipeline is a linear chain of stages connected by ports. Each stage
//! accepts typed input messages, produces typed output messages at some
//! later time, and propagates a single end-of-stream sentinel. Shutdown is
//! ordered and lossless: the sentinel is the only control signal, and a
//! stage forwards it downstream only after all of its in-flight frames have
//! been published.

pub mod fanout;
pub mod message;
pub mod pipeline;
pub mod port;
pub mod queue;
pub mod stage;

pub use fanout::{DeviceFanout, Routing, Transform};
pub use message::Message;
pub use pipeline::{Inlet, Outlet, Pipeline};
pub use port::Port;
pub use queue::Queue;
pub use stage::{SinkStage, SourceStage, Stage};
