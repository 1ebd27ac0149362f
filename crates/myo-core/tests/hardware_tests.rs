//! Hardware integration tests for myo-core
//!
//! These tests require a Myo armband in range and should be run with:
//! ```text
//! cargo test --package myo-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set `MYO_DEVICE` to the armband's address. Without it the tests are
//! skipped even when `--ignored` is passed.

use std::env;
use std::time::Duration;

use tokio::time::timeout;

use myo_core::{
    BleConnector, ChannelStreams, DeviceSession, RunnerConfig, StopCondition, run_session,
};

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn get_device() -> Option<String> {
    env::var("MYO_DEVICE").ok().filter(|s| !s.is_empty())
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_read_device_info() {
    let Some(address) = get_device() else {
        eprintln!("MYO_DEVICE not set, skipping");
        return;
    };

    let connector = BleConnector::new();
    let result = timeout(
        BLE_TIMEOUT,
        DeviceSession::scoped(&connector, &address, |session| async move {
            let info = session.read_device_info().await?;
            let firmware = session.read_firmware_version().await?;
            Ok::<_, myo_core::Error>((info, firmware))
        }),
    )
    .await
    .expect("timed out");

    let (info, firmware) = result.expect("reading device info failed");
    println!("Serial: {}", info.serial_string());
    println!("Firmware: {}", firmware);
    assert!(firmware.major >= 1);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_stream_emg_for_two_seconds() {
    let Some(address) = get_device() else {
        eprintln!("MYO_DEVICE not set, skipping");
        return;
    };

    let mut drains = 0usize;
    let mut action = |_: &ChannelStreams| drains += 1;
    let streams = timeout(
        BLE_TIMEOUT,
        run_session(
            BleConnector::new(),
            &address,
            RunnerConfig::default(),
            &mut action,
            StopCondition::After(Duration::from_secs(2)),
        ),
    )
    .await
    .expect("timed out")
    .expect("session failed");

    println!(
        "{} samples per channel over {} drains",
        streams.samples_per_channel(),
        drains
    );
    // Raw EMG arrives at roughly 200 Hz per channel.
    assert!(streams.samples_per_channel() > 100);
}
