//! Driver configuration: defaults, `.env` loading and environment overrides.

pub mod validation;

use std::time::Duration;

use image_processor::{DitherMethod, RenderOptions};

use crate::transport::{MAX_MTU, TransportConfig};
use crate::{LabelPrinterError, Result};

pub use validation::{device_matches_target, normalize_device_id, validate_setting};

/// MTU reported by the BLE backend when the stack does not expose one.
pub const DEFAULT_LINK_MTU: u16 = 124;

const ENV_KEYS: &[&str] = &[
    "LABELPRINTER_ADDRESS",
    "LABELPRINTER_SCAN_TIMEOUT_SECS",
    "LABELPRINTER_CONNECT_TIMEOUT_SECS",
    "LABELPRINTER_WRITE_TIMEOUT_MS",
    "LABELPRINTER_QUERY_TIMEOUT_MS",
    "LABELPRINTER_CHUNK_DELAY_MS",
    "LABELPRINTER_MTU",
    "LABELPRINTER_MAX_BURN_RUN",
    "LABELPRINTER_DITHER",
    "LABELPRINTER_AUTO_ROTATE",
    "LABELPRINTER_CACHE_TTL_HOURS",
];

/// Runtime configuration for scanning, connecting and printing.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Target printer: MAC, platform UUID or advertised name. Empty means
    /// "use the cached printer".
    pub printer_address: String,
    /// Discovery window for scans and address lookup.
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub query_timeout: Duration,
    /// Pacing between fragments on links without flow control.
    pub chunk_delay: Duration,
    /// MTU the BLE link reports as accepted.
    pub link_mtu: u16,
    pub max_burn_run: usize,
    pub dither: DitherMethod,
    pub auto_rotate: bool,
    pub cache_ttl: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            printer_address: String::new(),
            scan_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(5),
            chunk_delay: Duration::from_millis(10),
            link_mtu: DEFAULT_LINK_MTU,
            max_burn_run: 8,
            dither: DitherMethod::default(),
            auto_rotate: false,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl DriverConfig {
    /// Load `.env` (if any) and apply `LABELPRINTER_*` overrides.
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults plus whatever `get` returns for each known key.
    ///
    /// Empty values are ignored; invalid ones fail with `InvalidConfig`.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut values = Vec::new();
        for &key in ENV_KEYS {
            let Some(value) = get(key).map(|v| v.trim().to_string()) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            validate_setting(key, &value)
                .map_err(|msg| LabelPrinterError::InvalidConfig(format!("{key}: {msg}")))?;
            values.push((key, value));
        }
        let g = |key: &str| -> String {
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        let d = Self::default();
        Ok(Self {
            printer_address: g("LABELPRINTER_ADDRESS"),
            scan_timeout: Duration::from_secs(parse_u64(
                &g("LABELPRINTER_SCAN_TIMEOUT_SECS"),
                d.scan_timeout.as_secs(),
            )),
            connect_timeout: Duration::from_secs(parse_u64(
                &g("LABELPRINTER_CONNECT_TIMEOUT_SECS"),
                d.connect_timeout.as_secs(),
            )),
            write_timeout: Duration::from_millis(parse_u64(
                &g("LABELPRINTER_WRITE_TIMEOUT_MS"),
                d.write_timeout.as_millis() as u64,
            )),
            query_timeout: Duration::from_millis(parse_u64(
                &g("LABELPRINTER_QUERY_TIMEOUT_MS"),
                d.query_timeout.as_millis() as u64,
            )),
            chunk_delay: Duration::from_millis(parse_u64(
                &g("LABELPRINTER_CHUNK_DELAY_MS"),
                d.chunk_delay.as_millis() as u64,
            )),
            link_mtu: parse_u16(&g("LABELPRINTER_MTU"), d.link_mtu),
            max_burn_run: parse_u64(&g("LABELPRINTER_MAX_BURN_RUN"), d.max_burn_run as u64) as usize,
            dither: DitherMethod::parse(&g("LABELPRINTER_DITHER")).unwrap_or(d.dither),
            auto_rotate: g("LABELPRINTER_AUTO_ROTATE") == "true",
            cache_ttl: Duration::from_secs(
                parse_u64(&g("LABELPRINTER_CACHE_TTL_HOURS"), 24) * 60 * 60,
            ),
        })
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            requested_mtu: MAX_MTU,
            negotiate_timeout: self.connect_timeout,
            write_timeout: self.write_timeout,
            chunk_delay: self.chunk_delay,
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions::new()
            .with_auto_rotate(self.auto_rotate)
            .with_dither(self.dither)
            .with_max_burn_run(self.max_burn_run)
    }
}

/// Load .env from multiple candidate paths.
pub fn load_dotenv() {
    let candidates = [".env", "../.env", "../../.env"];
    for path in &candidates {
        if dotenvy::from_filename(path).is_ok() {
            tracing::info!("Loaded .env from: {path}");
            return;
        }
    }
    tracing::debug!("No .env file found, using system environment variables");
}

fn parse_u64(s: &str, default: u64) -> u64 {
    if s.is_empty() {
        return default;
    }
    s.parse().unwrap_or(default)
}

fn parse_u16(s: &str, default: u16) -> u16 {
    if s.is_empty() {
        return default;
    }
    s.parse().unwrap_or(default)
}
