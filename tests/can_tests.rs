//! Unit tests for the CAN plane.
//!
//! Covers identifier and frame validation, status formatting, and the bounded
//! transmit/receive loops over a fake driver.

#![allow(dead_code)]

#[path = "../src/can.rs"]
mod can;
#[path = "../src/config.rs"]
mod config;
#[path = "support/fake_can.rs"]
mod fake_can;

use can::{BusState, BusStatus, CanConfig, CanError, CanFrame, CanPlane, NodeId};
use embassy_futures::block_on;
use embassy_time::{Duration, Instant};
use fake_can::{started_plane, FakeCan};

const SHORT: Duration = Duration::from_millis(30);

#[test]
fn test_node_id_bounds() {
    assert!(NodeId::new(0).is_some());
    assert!(NodeId::new(0x1FFF_FFFF).is_some());
    assert!(NodeId::new(0x2000_0000).is_none());
}

#[test]
fn test_node_id_format_selection() {
    assert!(!NodeId::new(0x7FF).unwrap().is_extended());
    assert!(NodeId::new(0x800).unwrap().is_extended());
}

#[test]
fn test_node_id_display() {
    assert_eq!(NodeId::new(0x101).unwrap().to_string(), "0x101");
    assert_eq!(NodeId::new(0x1ABCDEF).unwrap().to_string(), "0x1ABCDEF");
}

#[test]
fn test_frame_payload_limits() {
    assert!(CanFrame::new(0x100, false, &[0; 8]).is_some());
    assert!(CanFrame::new(0x100, false, &[0; 9]).is_none());

    let empty = CanFrame::new(0x100, false, &[]).unwrap();
    assert_eq!(empty.dlc(), 0);
    assert!(empty.data().is_empty());
}

#[test]
fn test_frame_id_must_fit_format() {
    assert!(CanFrame::new(0x800, false, &[]).is_none());
    assert!(CanFrame::new(0x800, true, &[]).is_some());
    assert!(CanFrame::new(0x2000_0000, true, &[]).is_none());
}

#[test]
fn test_frame_from_node_picks_format() {
    let standard = CanFrame::from_node(NodeId::new(0x101).unwrap(), &[1, 2]).unwrap();
    assert!(!standard.is_extended());
    assert_eq!(standard.id(), 0x101);
    assert_eq!(standard.data(), &[1, 2]);

    let extended = CanFrame::from_node(NodeId::new(0x18FF_0001).unwrap(), &[3]).unwrap();
    assert!(extended.is_extended());
    assert_eq!(extended.dlc(), 1);
}

#[test]
fn test_bus_status_display() {
    let status = BusStatus {
        state: BusState::BusOff,
        tx_error_count: 255,
        rx_error_count: 3,
    };
    assert_eq!(status.to_string(), "state=BUS_OFF tec=255 rec=3");
    assert_eq!(BusStatus::STOPPED.to_string(), "state=STOPPED tec=0 rec=0");
}

#[test]
fn test_config_defaults_and_validation() {
    let config = CanConfig::default();
    assert_eq!(config.bitrate, 500_000);
    assert!(config.validate().is_ok());

    let odd = CanConfig {
        bitrate: 333_000,
        ..config
    };
    assert_eq!(odd.validate(), Err(CanError::HardwareInit));
}

#[test]
fn test_install_rejects_unsupported_bitrate() {
    let config = CanConfig {
        bitrate: 42,
        ..CanConfig::default()
    };
    assert_eq!(
        CanPlane::install(FakeCan::new(), &config).err(),
        Some(CanError::HardwareInit)
    );
}

#[test]
fn test_status_before_start_is_stopped() {
    let plane = CanPlane::install(FakeCan::new(), &CanConfig::default()).unwrap();
    assert_eq!(plane.status(), BusStatus::STOPPED);
    plane.start().unwrap();
    assert_eq!(plane.status().state, BusState::Running);
}

#[test]
fn test_transmit_queues_frame_unchanged() {
    let plane = started_plane();
    let frame = CanFrame::new(0x101, false, &[0xDE, 0xAD]).unwrap();

    assert_eq!(block_on(plane.transmit(&frame, SHORT)), Ok(()));
    assert_eq!(plane.driver().sent(), vec![frame]);
}

#[test]
fn test_transmit_bus_off_fails_without_queuing() {
    let plane = started_plane();
    plane.driver().set_bus_off(true);
    let frame = CanFrame::new(0x101, false, &[1]).unwrap();

    assert_eq!(block_on(plane.transmit(&frame, SHORT)), Err(CanError::BusOff));
    assert!(plane.driver().sent().is_empty());
    assert_eq!(plane.status().state, BusState::BusOff);
}

#[test]
fn test_transmit_times_out_when_slot_never_frees() {
    let plane = started_plane();
    plane.driver().set_tx_busy(true);
    let frame = CanFrame::new(0x101, false, &[1]).unwrap();

    let started = Instant::now();
    assert_eq!(block_on(plane.transmit(&frame, SHORT)), Err(CanError::TxTimeout));
    assert!(started.elapsed() >= SHORT);
}

#[test]
fn test_receive_returns_frames_in_order() {
    let plane = started_plane();
    let a = CanFrame::new(0x102, false, &[1]).unwrap();
    let b = CanFrame::new(0x103, false, &[2]).unwrap();
    plane.driver().push_rx(a);
    plane.driver().push_rx(b);

    assert_eq!(block_on(plane.receive(SHORT)), Ok(a));
    assert_eq!(block_on(plane.receive(SHORT)), Ok(b));
}

#[test]
fn test_receive_times_out_on_quiet_bus() {
    let plane = started_plane();
    let started = Instant::now();
    assert_eq!(block_on(plane.receive(SHORT)), Err(CanError::RxTimeout));
    assert!(started.elapsed() >= SHORT);
}

#[test]
fn test_recover_reaches_driver() {
    let plane = started_plane();
    plane.driver().set_bus_off(true);
    plane.driver().heal_on_recover();

    assert_eq!(plane.recover(), Ok(()));
    assert_eq!(plane.driver().recover_calls(), 1);
    assert_eq!(plane.status().state, BusState::Running);
}
