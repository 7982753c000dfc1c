//! Loopback ingestion tests: real sockets, synthetic detector traffic.

use std::net::UdpSocket;
use std::sync::Arc;

use risa_core::ConfigReader;
use risa_device::MemoryPool;
use risa_pipeline::{Message, SourceStage};
use risa_receiver::{packet, Receiver};

const MODULES: usize = 2;
const DETECTORS_PER_MODULE: usize = 16;
const PROJECTIONS: usize = 4;

fn config() -> ConfigReader {
    ConfigReader::from_str(
        r#"{
            "number_of_fan_detectors": 32,
            "number_of_det_modules": 2,
            "number_of_planes": 2,
            "sampling_rate": 1,
            "scan_rate": 250000,
            "inputBufferSize": 64,
            "notification_depth": 64,
            "receiver_address": "127.0.0.1",
            "receiver_base_port": 0,
            "receiver_timeout_ms": 300,
            "mempoolsize_receiver": 128
        }"#,
    )
    .unwrap()
}

/// Deterministic sample value for (module, frame, projection, detector).
fn sample(module: usize, frame: u64, projection: usize, detector: usize) -> u16 {
    (frame as usize * 1000 + module * 100 + projection * 10 + detector) as u16
}

/// Send one complete frame to every module socket.
fn send_frame(sender: &UdpSocket, receiver: &Receiver, frame: u64) {
    for (module, addr) in receiver.local_addrs().iter().enumerate() {
        for projection in 0..PROJECTIONS {
            let payload: Vec<u16> = (0..DETECTORS_PER_MODULE)
                .map(|d| sample(module, frame, projection, d))
                .collect();
            let words = packet::build(
                packet::PacketHeader {
                    module_id: module as u16,
                    projection_index: (frame * PROJECTIONS as u64) as u32 + projection as u32,
                    sample_offset: 0,
                },
                &payload,
            );
            sender
                .send_to(bytemuck::cast_slice(&words), addr)
                .expect("send failed");
        }
    }
}

fn drain(receiver: &mut Receiver) -> Vec<(u64, u32, Vec<u16>)> {
    let mut frames = Vec::new();
    loop {
        match receiver.load() {
            Message::Frame(img) => {
                frames.push((img.index(), img.plane(), img.data().to_vec()))
            }
            Message::EndOfStream => break,
        }
    }
    frames
}

#[test]
fn contiguous_frames_arrive_in_order_without_losses() {
    let pool = MemoryPool::new();
    let mut receiver = Receiver::new(&config(), Arc::clone(&pool)).unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    for frame in 0..20u64 {
        send_frame(&sender, &receiver, frame);
    }

    let frames = drain(&mut receiver);
    let indices: Vec<u64> = frames.iter().map(|(i, _, _)| *i).collect();
    assert_eq!(indices, (0..20).collect::<Vec<_>>());
    assert_eq!(receiver.lost_frames(), 0);

    // Plane alternates with the frame index.
    for (index, plane, _) in &frames {
        assert_eq!(*plane, (*index % 2) as u32);
    }

    // Stitching: module stripes are concatenated module-major.
    let (_, _, data) = &frames[3];
    let stripe = DETECTORS_PER_MODULE * PROJECTIONS;
    assert_eq!(data.len(), 2 * stripe);
    assert_eq!(data[0], sample(0, 3, 0, 0));
    assert_eq!(data[stripe], sample(1, 3, 0, 0));
    assert_eq!(
        data[stripe + 2 * DETECTORS_PER_MODULE + 5],
        sample(1, 3, 2, 5)
    );
}

#[test]
fn skipped_frames_are_gaps_not_losses() {
    let pool = MemoryPool::new();
    let mut receiver = Receiver::new(&config(), Arc::clone(&pool)).unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    for frame in (0..40u64).step_by(2) {
        send_frame(&sender, &receiver, frame);
    }

    let frames = drain(&mut receiver);
    let indices: Vec<u64> = frames.iter().map(|(i, _, _)| *i).collect();
    assert_eq!(indices, (0..40).step_by(2).collect::<Vec<_>>());
    // Frames never acknowledged by any module are not losses.
    assert_eq!(receiver.lost_frames(), 0);
}

#[test]
fn incomplete_frame_is_dropped_once_stale() {
    let pool = MemoryPool::new();
    let mut receiver = Receiver::new(&config(), Arc::clone(&pool)).unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    // Frame 0: only module 0 transmits; it can never complete.
    for projection in 0..PROJECTIONS {
        let payload = vec![1u16; DETECTORS_PER_MODULE];
        let words = packet::build(
            packet::PacketHeader {
                module_id: 0,
                projection_index: projection as u32,
                sample_offset: 0,
            },
            &payload,
        );
        sender
            .send_to(
                bytemuck::cast_slice(&words),
                receiver.local_addrs()[0],
            )
            .unwrap();
    }

    // Then a long run of complete frames pushes frame 0 out of the window.
    for frame in 70..75u64 {
        send_frame(&sender, &receiver, frame);
    }

    let frames = drain(&mut receiver);
    let indices: Vec<u64> = frames.iter().map(|(i, _, _)| *i).collect();
    assert_eq!(indices, (70..75).collect::<Vec<_>>());
    assert_eq!(receiver.lost_frames(), 1);
}
