//! Integration tests for the buffer ring

mod mocks;

use camcast_core::capture::{BufferRing, Owner};
use camcast_core::error::CaptureError;
use mocks::{idr_frame, p_frame, SimulatedEncoder, BUFFER_SIZE};

fn configured(frames: Vec<Vec<u8>>) -> (BufferRing, SimulatedEncoder) {
    let mut device = SimulatedEncoder::with_frames(frames);
    let mut ring = BufferRing::new();
    ring.configure(&mut device, 4).unwrap();
    (ring, device)
}

#[test]
fn test_configure_maps_every_buffer() {
    let (ring, device) = configured(vec![]);
    assert_eq!(ring.len(), 4);
    assert_eq!(device.mapped(), 4);
    assert!(!ring.is_streaming());
    for index in 0..4 {
        assert_eq!(ring.owner(index), Some(Owner::User));
        assert_eq!(ring.buffer_len(index), Some(BUFFER_SIZE));
    }
    assert_eq!(ring.owner(4), None);
}

#[test]
fn test_short_grant_is_accepted() {
    let mut device = SimulatedEncoder::new();
    device.grant_limit = Some(2);
    let mut ring = BufferRing::new();
    assert_eq!(ring.configure(&mut device, 4).unwrap(), 2);
    assert_eq!(ring.len(), 2);
}

#[test]
fn test_single_buffer_grant_is_rejected() {
    let mut device = SimulatedEncoder::new();
    device.grant_limit = Some(1);
    let mut ring = BufferRing::new();
    let err = ring.configure(&mut device, 4).unwrap_err();
    assert!(matches!(err, CaptureError::DeviceConfig(_)));
    assert_eq!(device.buffer_requests, vec![4, 0]);
    assert!(ring.is_empty());
}

#[test]
fn test_partial_mapping_failure_unmaps_everything() {
    let mut device = SimulatedEncoder::new();
    device.fail_map_at = Some(2);
    let mut ring = BufferRing::new();

    let err = ring.configure(&mut device, 4).unwrap_err();
    assert!(matches!(err, CaptureError::DeviceConfig(_)));
    assert_eq!(device.mapped(), 0);
    assert_eq!(device.buffer_requests, vec![4, 0]);
    assert!(ring.is_empty());
}

#[test]
fn test_enqueue_all_hands_buffers_to_kernel() {
    let (mut ring, mut device) = configured(vec![]);
    ring.enqueue_all(&mut device).unwrap();

    assert!(ring.is_streaming());
    assert_eq!(device.queued(), 4);
    for index in 0..4 {
        assert_eq!(ring.owner(index), Some(Owner::Kernel));
    }

    // Idempotent while streaming
    ring.enqueue_all(&mut device).unwrap();
    assert_eq!(device.stream_ons, 1);
}

#[test]
fn test_enqueue_without_buffers_fails() {
    let mut device = SimulatedEncoder::new();
    let mut ring = BufferRing::new();
    let err = ring.enqueue_all(&mut device).unwrap_err();
    assert!(matches!(err, CaptureError::Streaming(_)));
}

#[test]
fn test_dequeue_before_streaming_is_no_frame() {
    let (mut ring, mut device) = configured(vec![idr_frame()]);
    let err = ring.dequeue_one(&mut device).unwrap_err();
    assert!(matches!(err, CaptureError::NoFrame(_)));
    assert!(ring.held().is_none());
}

#[test]
fn test_dequeue_without_fill_is_no_frame() {
    let (mut ring, mut device) = configured(vec![]);
    ring.enqueue_all(&mut device).unwrap();

    let err = ring.dequeue_one(&mut device).unwrap_err();
    assert!(matches!(err, CaptureError::NoFrame(_)));
    assert!(err.is_retryable());
    assert!(ring.held().is_none());
}

#[test]
fn test_dequeue_and_release_cycle() {
    let idr = idr_frame();
    let (mut ring, mut device) = configured(vec![idr.clone(), p_frame()]);
    ring.enqueue_all(&mut device).unwrap();

    let (index, info) = ring.dequeue_one(&mut device).unwrap();
    assert_eq!(index, 0);
    assert_eq!(info.size, idr.len());
    assert_eq!(info.sequence, 1);
    assert!(info.valid);
    assert_eq!(ring.held(), Some(0));
    assert_eq!(ring.owner(0), Some(Owner::User));
    assert_eq!(device.queued(), 3);

    ring.release_current(&mut device).unwrap();
    assert_eq!(ring.held(), None);
    assert_eq!(ring.owner(0), Some(Owner::Kernel));
    assert_eq!(device.queued(), 4);

    let (index, info) = ring.dequeue_one(&mut device).unwrap();
    assert_eq!(index, 1);
    assert_eq!(info.sequence, 2);
    assert!(info.timestamp > std::time::Duration::ZERO);
}

#[test]
fn test_second_dequeue_while_held_is_rejected() {
    let (mut ring, mut device) = configured(vec![idr_frame(), p_frame()]);
    ring.enqueue_all(&mut device).unwrap();

    ring.dequeue_one(&mut device).unwrap();
    let err = ring.dequeue_one(&mut device).unwrap_err();
    assert!(matches!(err, CaptureError::BufferHeld { index: 0 }));
    assert_eq!(device.dequeues, 1);
}

#[test]
fn test_release_twice_is_noop() {
    let (mut ring, mut device) = configured(vec![idr_frame()]);
    ring.enqueue_all(&mut device).unwrap();
    ring.dequeue_one(&mut device).unwrap();

    ring.release_current(&mut device).unwrap();
    ring.release_current(&mut device).unwrap();
    assert_eq!(device.queued(), 4);
}

#[test]
fn test_error_flag_marks_frame_invalid() {
    let mut device = SimulatedEncoder::new();
    device.push_error_frame(p_frame());
    let mut ring = BufferRing::new();
    ring.configure(&mut device, 4).unwrap();
    ring.enqueue_all(&mut device).unwrap();

    let (_, info) = ring.dequeue_one(&mut device).unwrap();
    assert!(!info.valid);
}

#[test]
fn test_empty_frame_is_invalid() {
    let (mut ring, mut device) = configured(vec![Vec::new()]);
    ring.enqueue_all(&mut device).unwrap();

    let (_, info) = ring.dequeue_one(&mut device).unwrap();
    assert_eq!(info.size, 0);
    assert!(!info.valid);
}

#[test]
fn test_stop_returns_all_buffers() {
    let (mut ring, mut device) = configured(vec![idr_frame()]);
    ring.enqueue_all(&mut device).unwrap();
    ring.dequeue_one(&mut device).unwrap();

    ring.stop(&mut device).unwrap();
    assert!(!ring.is_streaming());
    assert_eq!(ring.held(), None);
    for index in 0..4 {
        assert_eq!(ring.owner(index), Some(Owner::User));
    }

    // Not started: tolerated
    ring.stop(&mut device).unwrap();
    assert_eq!(device.stream_offs, 1);

    // Restart queues everything again
    ring.enqueue_all(&mut device).unwrap();
    assert_eq!(device.queued(), 4);
}

#[test]
fn test_teardown_is_idempotent() {
    let (mut ring, mut device) = configured(vec![]);
    ring.enqueue_all(&mut device).unwrap();

    ring.teardown(&mut device);
    assert!(ring.is_empty());
    assert!(!ring.is_streaming());
    assert_eq!(device.mapped(), 0);
    assert_eq!(device.buffer_requests, vec![4, 0]);

    ring.teardown(&mut device);
    assert_eq!(device.buffer_requests, vec![4, 0]);
    assert_eq!(device.unmaps, 1);
}

#[test]
fn test_reconfigure_tears_down_first() {
    let (mut ring, mut device) = configured(vec![]);
    ring.configure(&mut device, 3).unwrap();
    assert_eq!(ring.len(), 3);
    assert_eq!(device.buffer_requests, vec![4, 0, 3]);
}

#[test]
fn test_refused_requeue_keeps_buffer_held() {
    let (mut ring, mut device) = configured(vec![idr_frame(), p_frame()]);
    ring.enqueue_all(&mut device).unwrap();
    ring.dequeue_one(&mut device).unwrap();

    device.fail_queue = 1;
    let err = ring.release_current(&mut device).unwrap_err();
    assert!(matches!(err, CaptureError::Streaming(_)));
    assert_eq!(ring.held(), Some(0));
    assert_eq!(ring.owner(0), Some(Owner::User));
    assert_eq!(device.queued(), 3);

    // Still held, so the next dequeue is refused until the retry succeeds
    assert!(matches!(
        ring.dequeue_one(&mut device).unwrap_err(),
        CaptureError::BufferHeld { index: 0 }
    ));

    ring.release_current(&mut device).unwrap();
    assert_eq!(ring.held(), None);
    assert_eq!(ring.owner(0), Some(Owner::Kernel));
    assert_eq!(device.queued(), 4);
    assert_eq!(&device.queue_attempts[4..], &[0, 0]);
}

#[test]
fn test_unknown_buffer_index_is_handed_back() {
    let (mut ring, mut device) = configured(vec![idr_frame(), p_frame()]);
    ring.enqueue_all(&mut device).unwrap();

    device.misreport_index = Some(9);
    let err = ring.dequeue_one(&mut device).unwrap_err();
    assert!(matches!(err, CaptureError::NoFrame(_)));
    assert_eq!(ring.held(), None);
    assert_eq!(device.queue_attempts.last(), Some(&9));

    // The ring keeps working with the next frame
    let (index, info) = ring.dequeue_one(&mut device).unwrap();
    assert_eq!(index, 1);
    assert!(info.valid);
}
