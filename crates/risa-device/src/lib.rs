pub mod buffer;
pub mod context;
pub mod image;
pub mod pool;
pub mod stream;
pub mod volume;

pub use buffer::{Buffer, Residency};
pub use context::{DeviceId, DeviceRegistry};
pub use image::Image;
pub use pool::MemoryPool;
pub use stream::{JobHandle, Stream, StreamPriority};
pub use volume::Volume;
