//! Status response decoder.
//!
//! `CONFIG?` and `BATTERY?` answer with fixed-layout binary frames: an ASCII
//! header, fixed-offset fields, CRLF. The layout is selected by the frame
//! length. `GETCHUNKSIZE` and `GETPRINTEDCOUNT` answer in plain ASCII.

use std::sync::LazyLock;

use regex::bytes::Regex;
use serde::Serialize;

use crate::{LabelPrinterError, Result};

static RE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

const CONFIG_HEADER: &[u8] = b"CONFIG ";
const BATTERY_HEADER: &[u8] = b"BATTERY ";
const BATTERY_HEADER_COMPACT: &[u8] = b"BATTERY";
const CRLF: &[u8] = b"\r\n";

/// Frame lengths of the two observed `CONFIG?` layouts.
pub const CONFIG_FRAME_LEN: usize = 19;
pub const CONFIG_FRAME_LEN_LEGACY: usize = 20;

/// Which reply a query expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Config,
    Battery,
    ChunkSize,
    PrintedCount,
}

/// Decoded `CONFIG?` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrinterConfig {
    /// Print resolution in dpi.
    pub resolution: u16,
    pub hardware_version: String,
    pub firmware_version: String,
    /// Shutdown timer / settings byte.
    pub settings: u8,
    /// Only present in the 20-byte layout.
    pub sound_enabled: Option<bool>,
    /// Only present in the 20-byte layout.
    pub config_version: Option<u8>,
}

/// Decoded `BATTERY?` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryStatus {
    pub percent: u8,
    pub charging: bool,
}

/// A decoded status reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusFrame {
    Config(PrinterConfig),
    Battery(BatteryStatus),
    ChunkSize { size: u32 },
    PrintedCount { count: u32 },
}

/// Decode the reply to a query of `kind`.
pub fn decode(bytes: &[u8], kind: StatusKind) -> Result<StatusFrame> {
    match kind {
        StatusKind::Config => decode_config(bytes).map(StatusFrame::Config),
        StatusKind::Battery => decode_battery(bytes).map(StatusFrame::Battery),
        StatusKind::ChunkSize => first_number(bytes).map(|size| StatusFrame::ChunkSize { size }),
        StatusKind::PrintedCount => {
            first_number(bytes).map(|count| StatusFrame::PrintedCount { count })
        }
    }
}

/// Decode one packed-BCD byte (`0x75` -> 75).
pub fn decode_bcd(byte: u8) -> Result<u8> {
    let (tens, ones) = (byte >> 4, byte & 0x0F);
    if tens > 9 || ones > 9 {
        return Err(malformed(format!("invalid BCD byte 0x{byte:02X}")));
    }
    Ok(tens * 10 + ones)
}

fn decode_config(bytes: &[u8]) -> Result<PrinterConfig> {
    let body = framed(bytes, CONFIG_HEADER, "CONFIG")?;
    match bytes.len() {
        CONFIG_FRAME_LEN => {
            // pad, resolution, pad, hw[3], fw[3], settings
            Ok(PrinterConfig {
                resolution: u16::from(body[1]),
                hardware_version: version(&body[3..6]),
                firmware_version: version(&body[6..9]),
                settings: body[9],
                sound_enabled: None,
                config_version: None,
            })
        }
        CONFIG_FRAME_LEN_LEGACY => {
            // resolution u16 LE, hw[3], fw[3], settings, sound, config version
            Ok(PrinterConfig {
                resolution: u16::from_le_bytes([body[0], body[1]]),
                hardware_version: version(&body[2..5]),
                firmware_version: version(&body[5..8]),
                settings: body[8],
                sound_enabled: Some(body[9] != 0),
                config_version: Some(body[10]),
            })
        }
        len => Err(malformed(format!(
            "CONFIG frame of {len} bytes, expected {CONFIG_FRAME_LEN} or {CONFIG_FRAME_LEN_LEGACY}"
        ))),
    }
}

fn decode_battery(bytes: &[u8]) -> Result<BatteryStatus> {
    let body = match bytes.len() {
        12 => framed(bytes, BATTERY_HEADER, "BATTERY")?,
        11 => framed(bytes, BATTERY_HEADER_COMPACT, "BATTERY")?,
        len => {
            return Err(malformed(format!(
                "BATTERY frame of {len} bytes, expected 11 or 12"
            )));
        }
    };

    let percent = decode_bcd(body[0])?;
    let charging = match body[1] {
        0 => false,
        1 => true,
        other => return Err(malformed(format!("charging flag {other}, expected 0 or 1"))),
    };
    Ok(BatteryStatus { percent, charging })
}

/// Check header and CRLF terminator, returning the bytes between them.
fn framed<'a>(bytes: &'a [u8], header: &[u8], name: &str) -> Result<&'a [u8]> {
    if !bytes.starts_with(header) {
        return Err(malformed(format!("missing {name} header")));
    }
    if !bytes.ends_with(CRLF) || bytes.len() < header.len() + CRLF.len() {
        return Err(malformed(format!("{name} frame lacks CRLF terminator")));
    }
    Ok(&bytes[header.len()..bytes.len() - CRLF.len()])
}

fn first_number(bytes: &[u8]) -> Result<u32> {
    let found = RE_NUMBER
        .find(bytes)
        .ok_or_else(|| malformed(format!("no number in reply {}", hex::encode(bytes))))?;
    std::str::from_utf8(found.as_bytes())
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| malformed("number out of range".into()))
}

fn version(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

fn malformed(msg: String) -> LabelPrinterError {
    LabelPrinterError::MalformedResponse(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_frame() -> Vec<u8> {
        let mut frame = b"CONFIG ".to_vec();
        frame.extend_from_slice(&[0x00, 0xCB, 0x00, 0, 1, 0, 1, 4, 2, 0x05]);
        frame.extend_from_slice(b"\r\n");
        frame
    }

    #[test]
    fn test_config_19_bytes() {
        let frame = config_frame();
        assert_eq!(frame.len(), 19);
        let decoded = decode(&frame, StatusKind::Config).unwrap();
        assert_eq!(
            decoded,
            StatusFrame::Config(PrinterConfig {
                resolution: 203,
                hardware_version: "0.1.0".into(),
                firmware_version: "1.4.2".into(),
                settings: 5,
                sound_enabled: None,
                config_version: None,
            })
        );
    }

    #[test]
    fn test_config_20_bytes() {
        let mut frame = b"CONFIG ".to_vec();
        frame.extend_from_slice(&[0x2C, 0x01, 0, 2, 0, 1, 5, 0, 0x0A, 1, 3]);
        frame.extend_from_slice(b"\r\n");
        assert_eq!(frame.len(), 20);

        let StatusFrame::Config(config) = decode(&frame, StatusKind::Config).unwrap() else {
            panic!("expected config frame");
        };
        assert_eq!(config.resolution, 300);
        assert_eq!(config.hardware_version, "0.2.0");
        assert_eq!(config.firmware_version, "1.5.0");
        assert_eq!(config.settings, 10);
        assert_eq!(config.sound_enabled, Some(true));
        assert_eq!(config.config_version, Some(3));
    }

    #[test]
    fn test_config_rejects_bad_frames() {
        let mut bad_header = config_frame();
        bad_header[0] = b'X';
        let mut bad_crlf = config_frame();
        bad_crlf[17] = b'\n';
        let mut short = config_frame();
        short.remove(10);

        for frame in [bad_header, bad_crlf, short, Vec::new()] {
            assert!(matches!(
                decode(&frame, StatusKind::Config),
                Err(LabelPrinterError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn test_bcd() {
        assert_eq!(decode_bcd(0x75).unwrap(), 75);
        assert_eq!(decode_bcd(0x99).unwrap(), 99);
        assert_eq!(decode_bcd(0x00).unwrap(), 0);
        assert!(matches!(
            decode_bcd(0x9A),
            Err(LabelPrinterError::MalformedResponse(_))
        ));
        assert!(decode_bcd(0xA0).is_err());
    }

    #[test]
    fn test_battery_frames() {
        let decoded = decode(b"BATTERY \x75\x00\r\n", StatusKind::Battery).unwrap();
        assert_eq!(
            decoded,
            StatusFrame::Battery(BatteryStatus {
                percent: 75,
                charging: false
            })
        );

        let compact = decode(b"BATTERY\x42\x01\r\n", StatusKind::Battery).unwrap();
        assert_eq!(
            compact,
            StatusFrame::Battery(BatteryStatus {
                percent: 42,
                charging: true
            })
        );
    }

    #[test]
    fn test_battery_rejects_bad_fields() {
        for frame in [
            &b"BATTERY \x9A\x00\r\n"[..],
            b"BATTERY \x50\x02\r\n",
            b"BATTERX \x50\x00\r\n",
            b"BATTERY \x50\x00\n\n",
            b"BATTERY \x50\r\n",
        ] {
            assert!(matches!(
                decode(frame, StatusKind::Battery),
                Err(LabelPrinterError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn test_kind_selects_decoder() {
        // A battery frame is not a config frame.
        assert!(decode(b"BATTERY \x75\x00\r\n", StatusKind::Config).is_err());
    }

    #[test]
    fn test_ascii_numbers() {
        assert_eq!(
            decode(b"CHUNKSIZE 240\r\n", StatusKind::ChunkSize).unwrap(),
            StatusFrame::ChunkSize { size: 240 }
        );
        assert_eq!(
            decode(b"1234\r\n", StatusKind::PrintedCount).unwrap(),
            StatusFrame::PrintedCount { count: 1234 }
        );
        assert!(decode(b"OK\r\n", StatusKind::ChunkSize).is_err());
        assert!(decode(b"99999999999\r\n", StatusKind::PrintedCount).is_err());
    }

    #[test]
    fn test_status_frame_json() {
        let frame = StatusFrame::Battery(BatteryStatus {
            percent: 80,
            charging: true,
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["kind"], "battery");
        assert_eq!(json["percent"], 80);
        assert_eq!(json["charging"], true);
    }
}
