//! Setting value validation and printer address matching.

use std::sync::LazyLock;

use image_processor::DitherMethod;
use regex::Regex;

static RE_MAC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9A-Fa-f]{2}[:\-]){5}([0-9A-Fa-f]{2})$").unwrap());
static RE_UUID_NO_HYPHEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{32}$").unwrap());
static RE_UUID_HYPHEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}$")
        .unwrap()
});

/// Longest advertised name accepted as a printer target.
const MAX_NAME_LEN: usize = 64;

/// MAC address (Linux/Windows) or platform UUID (macOS).
pub fn is_hardware_address(value: &str) -> bool {
    RE_MAC.is_match(value) || RE_UUID_NO_HYPHEN.is_match(value) || RE_UUID_HYPHEN.is_match(value)
}

/// Validate a setting value. Returns `Ok(())` if valid, or an error message.
pub fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    match key {
        "LABELPRINTER_ADDRESS" => {
            // Anything that is not a MAC or UUID is matched as an advertised name.
            if !value.is_empty()
                && !is_hardware_address(value)
                && (value.len() > MAX_NAME_LEN || value.chars().any(char::is_control))
            {
                return Err("expected MAC, UUID, or a printable device name".into());
            }
        }
        "LABELPRINTER_SCAN_TIMEOUT_SECS" | "LABELPRINTER_CONNECT_TIMEOUT_SECS" => {
            validate_int_range(value, 1, 120)?
        }
        "LABELPRINTER_WRITE_TIMEOUT_MS" | "LABELPRINTER_QUERY_TIMEOUT_MS" => {
            validate_int_range(value, 10, 60_000)?
        }
        "LABELPRINTER_CHUNK_DELAY_MS" => validate_int_range(value, 0, 1000)?,
        "LABELPRINTER_MTU" => validate_int_range(value, 23, 517)?,
        "LABELPRINTER_MAX_BURN_RUN" => validate_int_range(value, 2, 8)?,
        "LABELPRINTER_CACHE_TTL_HOURS" => validate_int_range(value, 0, 24 * 365)?,
        "LABELPRINTER_DITHER" => {
            if DitherMethod::parse(value).is_none() {
                return Err("must be 'floyd-steinberg' or 'bayer'".into());
            }
        }
        "LABELPRINTER_AUTO_ROTATE" => {
            if value != "true" && value != "false" {
                return Err("must be 'true' or 'false'".into());
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_int_range(value: &str, min: i64, max: i64) -> Result<(), String> {
    let v: i64 = value.parse().map_err(|_| "must be an integer")?;
    if v < min || v > max {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(())
}

/// Lowercase alphanumerics only, so `AA:BB:..` matches `aabb..`.
pub fn normalize_device_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Whether a discovered device is the one the caller asked for.
pub fn device_matches_target(device_id: &str, device_name: &str, target: &str) -> bool {
    let normalized_target = normalize_device_id(target);
    device_id.eq_ignore_ascii_case(target)
        || (!normalized_target.is_empty() && normalize_device_id(device_id) == normalized_target)
        || (!device_name.is_empty() && device_name.eq_ignore_ascii_case(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_printer_address() {
        let key = "LABELPRINTER_ADDRESS";
        assert!(validate_setting(key, "AA:BB:CC:DD:EE:FF").is_ok());
        assert!(validate_setting(key, "aabbccddeeff00112233445566778899").is_ok());
        assert!(validate_setting(key, "12345678-1234-1234-1234-123456789abc").is_ok());
        assert!(validate_setting(key, "P31S-1A2B").is_ok());
        assert!(validate_setting(key, "").is_ok());
        assert!(validate_setting(key, "bad\nname").is_err());
        assert!(validate_setting(key, &"x".repeat(65)).is_err());
    }

    #[test]
    fn test_hardware_address() {
        assert!(is_hardware_address("aa-bb-cc-dd-ee-ff"));
        assert!(!is_hardware_address("AA:BB:CC:DD:EE"));
        assert!(!is_hardware_address("P31S"));
    }

    #[test]
    fn test_numeric_ranges() {
        assert!(validate_setting("LABELPRINTER_MTU", "124").is_ok());
        assert!(validate_setting("LABELPRINTER_MTU", "20").is_err());
        assert!(validate_setting("LABELPRINTER_MTU", "abc").is_err());
        assert!(validate_setting("LABELPRINTER_MAX_BURN_RUN", "9").is_err());
        assert!(validate_setting("LABELPRINTER_CHUNK_DELAY_MS", "0").is_ok());
    }

    #[test]
    fn test_enums_and_booleans() {
        assert!(validate_setting("LABELPRINTER_DITHER", "bayer").is_ok());
        assert!(validate_setting("LABELPRINTER_DITHER", "threshold").is_err());
        assert!(validate_setting("LABELPRINTER_AUTO_ROTATE", "true").is_ok());
        assert!(validate_setting("LABELPRINTER_AUTO_ROTATE", "yes").is_err());
        assert!(validate_setting("UNRELATED", "whatever").is_ok());
    }

    #[test]
    fn normalize_device_id_removes_separators() {
        assert_eq!(normalize_device_id("AA:BB:CC:DD:EE:FF"), "aabbccddeeff");
        assert_eq!(
            normalize_device_id("12345678-1234-1234-1234-123456789abc"),
            "12345678123412341234123456789abc"
        );
    }

    #[test]
    fn target_matching_logic() {
        assert!(device_matches_target("AA:BB:CC:DD:EE:FF", "P31S", "aabbccddeeff"));
        assert!(device_matches_target("hci0/dev_AA_BB", "P31S-1A2B", "p31s-1a2b"));
        assert!(!device_matches_target("AA:BB:CC:DD:EE:FF", "P31S", "11:22:33:44:55:66"));
        assert!(!device_matches_target("AA:BB:CC:DD:EE:FF", "", ""));
    }
}
