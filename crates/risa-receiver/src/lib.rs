//! UDP ingestion and sinogram assembly.
//!
//! One receive thread per detector module writes raw samples into a
//! per-module ring buffer and advances a completion notification. The
//! receiver stitches completed frames into full sinograms and feeds them
//! into the pipeline; frames that roll off the rings before they can be
//! assembled are dropped and counted, since losing raw frames is preferable
//! to stalling the detector.

pub mod module;
pub mod notification;
pub mod packet;
pub mod receiver;
pub mod ring;

pub use module::ModuleReceiver;
pub use notification::FrameNotification;
pub use packet::{PacketHeader, PacketView};
pub use receiver::Receiver;
pub use ring::ModuleRing;
