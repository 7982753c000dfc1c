use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use risa_core::{Result, RisaError, ScanGeometry};

use crate::notification::FrameNotification;
use crate::packet::{self, HEADER_WORDS};
use crate::ring::ModuleRing;

/// Receive socket buffer, sized for detector bursts.
const RECV_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Receives one detector module's UDP stream into its ring buffer.
///
/// Runs on a dedicated thread. The stream has no explicit end marker: a
/// receive timeout means the detector stopped transmitting, which finishes
/// this module's part of the run.
pub struct ModuleReceiver {
    module_id: usize,
    socket: UdpSocket,
    local_addr: SocketAddr,
    ring: Arc<ModuleRing>,
    notification: Arc<FrameNotification>,
    geometry: ScanGeometry,
    samples_per_packet: usize,
    timeout: Duration,
}

impl ModuleReceiver {
    pub fn bind(
        address: &str,
        port: u16,
        module_id: usize,
        geometry: ScanGeometry,
        samples_per_packet: usize,
        timeout: Duration,
        ring: Arc<ModuleRing>,
        notification: Arc<FrameNotification>,
    ) -> Result<Self> {
        let detectors = geometry.detectors_per_module();
        if samples_per_packet == 0 || detectors % samples_per_packet != 0 {
            return Err(RisaError::Config(format!(
                "samples_per_packet ({samples_per_packet}) must divide \
                 detectors per module ({detectors})"
            )));
        }

        let addr: SocketAddr = format!("{address}:{port}").parse().map_err(|_| {
            RisaError::Config(format!("invalid receiver address `{address}:{port}`"))
        })?;
        let socket = bind_socket(addr, timeout).map_err(|e| {
            RisaError::Receiver(format!("module {module_id}: cannot bind {addr}: {e}"))
        })?;
        let local_addr = socket.local_addr().map_err(RisaError::Io)?;

        tracing::debug!(module_id, %local_addr, "module receiver bound");
        Ok(Self {
            module_id,
            socket,
            local_addr,
            ring,
            notification,
            geometry,
            samples_per_packet,
            timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive loop; returns when the detector goes quiet.
    pub fn run(self) {
        let detectors = self.geometry.detectors_per_module();
        let projections = self.geometry.projections as u32;
        let words = HEADER_WORDS + self.samples_per_packet;
        let mut buf = vec![0u16; words];

        let mut packets: u64 = 0;
        let mut gaps: u64 = 0;
        let mut last_seq: Option<u64> = None;
        let chunks_per_projection = (detectors / self.samples_per_packet) as u64;

        loop {
            let received = self.socket.recv(bytemuck::cast_slice_mut(&mut buf));
            let len = match received {
                Ok(len) => len,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    break;
                }
                Err(e) => {
                    tracing::error!(module = self.module_id, error = %e, "receive failed");
                    break;
                }
            };
            if len != words * 2 {
                tracing::debug!(module = self.module_id, len, "malformed datagram dropped");
                continue;
            }

            let view = match packet::parse(&buf) {
                Ok(view) => view,
                Err(e) => {
                    tracing::debug!(module = self.module_id, error = %e, "undecodable packet");
                    continue;
                }
            };
            let header = view.header;
            if header.module_id as usize != self.module_id {
                tracing::debug!(
                    module = self.module_id,
                    got = header.module_id,
                    "packet for another module, dropped"
                );
                continue;
            }

            packets += 1;
            let seq = header.projection_index as u64 * chunks_per_projection
                + header.sample_offset as u64 / self.samples_per_packet as u64;
            if let Some(last) = last_seq {
                if seq > last + 1 {
                    gaps += seq - last - 1;
                    tracing::warn!(
                        module = self.module_id,
                        last,
                        seq,
                        "packet gap or reordering"
                    );
                }
            }
            last_seq = Some(seq);

            let frame = header.projection_index as u64 / projections as u64;
            let projection_in_frame = header.projection_index % projections;
            let offset =
                projection_in_frame as usize * detectors + header.sample_offset as usize;
            if !self.ring.write(frame, offset, view.payload) {
                tracing::debug!(module = self.module_id, frame, offset, "stripe out of range");
                continue;
            }

            // The final chunk of a frame completes this module's share.
            if projection_in_frame == projections - 1
                && header.sample_offset as usize + self.samples_per_packet == detectors
            {
                self.notification.notify(self.module_id, frame);
            }
        }

        self.notification.finish(self.module_id);
        tracing::info!(
            module = self.module_id,
            packets,
            gaps,
            timeout_ms = self.timeout.as_millis() as u64,
            "no packets arriving within timeout, module finishing"
        );
    }
}

fn bind_socket(addr: SocketAddr, timeout: Duration) -> std::io::Result<UdpSocket> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_BYTES) {
        tracing::warn!(error = %e, requested = RECV_BUFFER_BYTES, "cannot size SO_RCVBUF");
    }
    socket.bind(&addr.into())?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(timeout))?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use risa_core::ConfigReader;

    fn geometry() -> ScanGeometry {
        let cfg = ConfigReader::from_str(
            r#"{
                "number_of_fan_detectors": 64,
                "number_of_det_modules": 4,
                "number_of_planes": 2,
                "sampling_rate": 1,
                "scan_rate": 100000
            }"#,
        )
        .unwrap();
        ScanGeometry::from_config(&cfg).unwrap()
    }

    #[test]
    fn rejects_non_dividing_packet_size() {
        let g = geometry();
        let ring = Arc::new(ModuleRing::new(4, g.module_elements()));
        let notification = Arc::new(FrameNotification::new(g.modules, 8, 4).unwrap());
        let result = ModuleReceiver::bind(
            "127.0.0.1",
            0,
            0,
            g,
            5,
            Duration::from_millis(100),
            ring,
            notification,
        );
        assert!(result.is_err());
    }

    #[test]
    fn binds_ephemeral_port() {
        let g = geometry();
        let ring = Arc::new(ModuleRing::new(4, g.module_elements()));
        let notification = Arc::new(FrameNotification::new(g.modules, 8, 4).unwrap());
        let receiver = ModuleReceiver::bind(
            "127.0.0.1",
            0,
            1,
            g,
            g.detectors_per_module(),
            Duration::from_millis(100),
            ring,
            notification,
        )
        .unwrap();
        assert_ne!(receiver.local_addr().port(), 0);
    }
}
