//! Driver for BLE thermal label printers that speak TSPL.
//!
//! Provides the fragmented BLE transport, the TSPL command encoder, the
//! binary status decoder and a print orchestrator on top of the
//! `image-processor` render pipeline.

use std::fmt;
use std::time::Duration;

use image_processor::RenderError;
use tracing_subscriber::EnvFilter;

pub mod ble;
mod ble_init;
pub mod cache;
pub mod config;
pub mod link;
pub mod manager;
pub mod options;
pub mod printer;
pub mod responses;
pub mod transport;
pub mod tspl;

// Re-exports for convenience
pub use ble::{BleCentral, BleLink, DiscoveredPrinter};
pub use cache::{CachedPrinter, PrinterCache};
pub use config::DriverConfig;
pub use link::{GattProfile, Link};
pub use manager::ConnectionManager;
pub use options::{BitmapMode, CopyStrategy, Direction, LabelSize, MediaMode, PrintJobSpec};
pub use printer::{LabelPrinter, PrintReport};
pub use responses::{BatteryStatus, PrinterConfig, StatusFrame, StatusKind};
pub use transport::{ConnectionState, PeripheralHandle, TransportConfig};
pub use tspl::{CommandFrame, FrameKind, Segment};

/// Print head resolution in dots per millimetre (203 dpi).
pub const DOTS_PER_MM: f32 = 8.0;

/// Suspension point at which a timeout fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovery,
    Connect,
    Negotiate,
    Write,
    Notify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovery => "discovery",
            Stage::Connect => "connect",
            Stage::Negotiate => "MTU negotiation",
            Stage::Write => "write",
            Stage::Notify => "notification wait",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during printer operations.
#[derive(Debug, thiserror::Error)]
pub enum LabelPrinterError {
    #[error("No matching printer found: {0}")]
    NotFound(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("Not connected to the printer")]
    NotConnected,

    #[error("Link lost: {0}")]
    LinkLost(String),

    #[error("Link refused: {0}")]
    LinkRefused(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Image too small: {width}x{height}")]
    ImageTooSmall { width: u32, height: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("BLE error: {0}")]
    Ble(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Printer cache error: {0}")]
    Cache(String),
}

impl From<RenderError> for LabelPrinterError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::ImageTooSmall { width, height } => {
                LabelPrinterError::ImageTooSmall { width, height }
            }
            other => LabelPrinterError::InvalidJob(other.to_string()),
        }
    }
}

/// Result type alias for labelprinter operations.
pub type Result<T> = std::result::Result<T, LabelPrinterError>;

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
