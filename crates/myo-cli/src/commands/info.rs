//! Info command implementation.

use anyhow::{Context, Result};
use tracing::warn;

use myo_core::{BleConnector, DeviceSession};

use crate::cli::{DeviceArgs, OutputFormat};
use crate::config::{Config, require_device};
use crate::format::{InfoReport, format_info_csv, format_info_text};
use crate::util::{connection_config, write_output};

pub async fn cmd_info(device: DeviceArgs, format: OutputFormat, config: &Config) -> Result<()> {
    let address = require_device(device.device, config)?;
    let timeout = device.timeout.unwrap_or(config.timeout_secs());
    let connector = BleConnector::with_config(connection_config(timeout));

    let report = DeviceSession::scoped(&connector, &address, |session| async move {
        let info = session.read_device_info().await?;
        let firmware = session.read_firmware_version().await?;

        // Standard GATT services; not every firmware exposes both.
        let battery = session
            .read_battery_level()
            .await
            .inspect_err(|e| warn!("Battery level unavailable: {}", e))
            .ok();
        let name = session
            .read_device_name()
            .await
            .inspect_err(|e| warn!("Device name unavailable: {}", e))
            .ok();

        Ok::<_, myo_core::Error>(InfoReport {
            address: session.address().to_string(),
            name,
            battery,
            firmware,
            info,
        })
    })
    .await
    .with_context(|| format!("Failed to read device info from {}", address))?;

    let content = match format {
        OutputFormat::Text => format_info_text(&report),
        OutputFormat::Json => serde_json::to_string_pretty(&report)? + "\n",
        OutputFormat::Csv => format_info_csv(&report),
    };
    write_output(None, &content)
}
