//! Adapter start-up retries.
//!
//! On macOS the CoreBluetooth central reports state 0 (unknown) for a short
//! while after the process starts; opening the adapter during that window
//! fails. Other platforms fail fast.

use std::future::Future;
use std::time::Duration;

use crate::{LabelPrinterError, Result};

const RETRY_COUNT: usize = 6;
const RETRY_DELAY: Duration = Duration::from_millis(500);

const INVALID_STATE: &str = "central manager has invalid state";

/// Call `open` until it succeeds or fails with a non-transient error.
pub(crate) async fn open_with_retry<T, F, Fut>(mut open: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match open().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < RETRY_COUNT && cfg!(target_os = "macos") && is_warming_up(&e) => {
                tracing::debug!(attempt, error = %e, "BLE adapter not ready yet");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(with_permission_hint(e)),
        }
    }
}

fn is_warming_up(err: &LabelPrinterError) -> bool {
    match err {
        LabelPrinterError::Ble(msg) => {
            let msg = msg.to_ascii_lowercase();
            msg.contains(INVALID_STATE) && msg.contains("have=0")
        }
        _ => false,
    }
}

fn with_permission_hint(err: LabelPrinterError) -> LabelPrinterError {
    match err {
        LabelPrinterError::Ble(msg)
            if cfg!(target_os = "macos") && msg.to_ascii_lowercase().contains(INVALID_STATE) =>
        {
            LabelPrinterError::Ble(format!(
                "{msg} (macOS: check that Bluetooth is on and allowed for this app under System Settings > Privacy & Security > Bluetooth)"
            ))
        }
        other => other,
    }
}
