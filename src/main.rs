pub mod config;
pub mod driver;
pub mod usb;

use crate::config::BridgeConfig;
use crate::driver::driver_handle::{DriverHandle, HidReport, LedPattern};
use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    if let Err(err) = BridgeConfig::ensure_default_config() {
        warn!(%err, "Could not write default configuration");
    }
    let config = BridgeConfig::load_or_default();
    info!(
        vendor_id = config.device.vendor_id,
        product_id = config.device.product_id,
        interface = config.device.interface,
        "Loaded configuration"
    );

    let (report_sender, mut report_receiver) = mpsc::channel::<HidReport>(config.report_channel_capacity);

    // HID sink: one finished report per decoded frame arrives here. The
    // actual HID transport sits behind this channel.
    let sink_handle = tokio::spawn(async move {
        while let Some(report) = report_receiver.recv().await {
            debug!(report = ?report.as_bytes(), "HID report");
        }
    });

    let mut driver = DriverHandle::start(&config, report_sender)?;

    // Attach feedback on the LED ring, best-effort like all commands.
    if let Err(err) = driver.command().set_led(LedPattern::Player1) {
        warn!(%err, "Failed to set LED pattern");
    }

    info!("Controller bridge running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    driver.stop().await?;
    sink_handle.abort();
    info!("Controller bridge stopped");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
