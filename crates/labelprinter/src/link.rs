//! Link abstraction between the transport and the wireless stack.
//!
//! The transport only needs a handful of primitives from the underlying
//! stack; `BleLink` provides them over btleplug and tests use an in-memory
//! link that records everything written to it.

use std::future::Future;

use uuid::Uuid;

use crate::Result;

/// Primitive operations the transport needs from a connected peripheral.
pub trait Link: Send + Sync + 'static {
    /// Identifier of the remote peripheral (MAC, platform UUID or name).
    fn address(&self) -> &str;

    /// Request an ATT MTU of `requested` bytes and return what the link
    /// actually uses. May return less than requested, never more.
    fn request_mtu(&self, requested: u16) -> impl Future<Output = Result<u16>> + Send;

    /// Write one fragment without waiting for an acknowledgement.
    fn write_chunk(&self, chunk: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Whether the peripheral signals when it can accept more data.
    fn has_flow_control(&self) -> bool {
        false
    }

    /// Wait until the peripheral can take another fragment.
    fn ready(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;
}

/// One known set of service and characteristic identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattProfile {
    pub name: &'static str,
    pub service: Uuid,
    pub write: Uuid,
    pub notify: Uuid,
    pub read: Option<Uuid>,
}

const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Vendor primary service: `ff01` read, `ff02` write, `ff03` notify.
pub const PRIMARY_PROFILE: GattProfile = GattProfile {
    name: "primary",
    service: sig_uuid(0xff00),
    write: sig_uuid(0xff02),
    notify: sig_uuid(0xff03),
    read: Some(sig_uuid(0xff01)),
};

/// Profiles tried in order when resolving a connected peripheral.
pub const KNOWN_PROFILES: &[GattProfile] = &[
    PRIMARY_PROFILE,
    GattProfile {
        name: "alternate",
        service: sig_uuid(0xae00),
        write: sig_uuid(0xae01),
        notify: sig_uuid(0xae02),
        read: None,
    },
    GattProfile {
        name: "nordic-uart",
        service: Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e),
        write: Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e),
        notify: Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e),
        read: None,
    },
    GattProfile {
        name: "microchip-uart",
        service: Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455),
        write: Uuid::from_u128(0x49535343_8841_43f4_a8d4_ecbe34729bb3),
        notify: Uuid::from_u128(0x49535343_1e4d_4bd9_ba61_23c647249616),
        read: None,
    },
];

/// Pick the first known profile whose write and notify characteristics are
/// both present. `available` holds `(service, characteristic)` pairs.
pub fn resolve_profile(available: &[(Uuid, Uuid)]) -> Option<&'static GattProfile> {
    let has = |service: Uuid, characteristic: Uuid| {
        available
            .iter()
            .any(|&(s, c)| s == service && c == characteristic)
    };
    KNOWN_PROFILES
        .iter()
        .find(|p| has(p.service, p.write) && has(p.service, p.notify))
}

/// Whether an advertised service list contains any known printer service.
pub fn advertises_known_service(services: &[Uuid]) -> bool {
    KNOWN_PROFILES.iter().any(|p| services.contains(&p.service))
}


#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(profile: &GattProfile) -> Vec<(Uuid, Uuid)> {
        vec![
            (profile.service, profile.write),
            (profile.service, profile.notify),
        ]
    }

    #[test]
    fn test_sig_uuid_expansion() {
        assert_eq!(
            PRIMARY_PROFILE.service.to_string(),
            "0000ff00-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            PRIMARY_PROFILE.write.to_string(),
            "0000ff02-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_primary_profile_wins() {
        let mut available = pairs(&KNOWN_PROFILES[2]);
        available.extend(pairs(&PRIMARY_PROFILE));
        assert_eq!(resolve_profile(&available).unwrap().name, "primary");
    }

    #[test]
    fn test_falls_back_in_order() {
        let available = pairs(&KNOWN_PROFILES[3]);
        assert_eq!(resolve_profile(&available).unwrap().name, "microchip-uart");

        let mut available = pairs(&KNOWN_PROFILES[3]);
        available.extend(pairs(&KNOWN_PROFILES[1]));
        assert_eq!(resolve_profile(&available).unwrap().name, "alternate");
    }

    #[test]
    fn test_profile_needs_write_and_notify() {
        let available = vec![(PRIMARY_PROFILE.service, PRIMARY_PROFILE.write)];
        assert!(resolve_profile(&available).is_none());

        // Right characteristic under the wrong service does not count.
        let available = vec![
            (KNOWN_PROFILES[1].service, PRIMARY_PROFILE.write),
            (KNOWN_PROFILES[1].service, PRIMARY_PROFILE.notify),
        ];
        assert!(resolve_profile(&available).is_none());
    }

    #[test]
    fn test_advertised_services() {
        assert!(advertises_known_service(&[sig_uuid(0x180f), sig_uuid(0xae00)]));
        assert!(!advertises_known_service(&[sig_uuid(0x180f)]));
    }
}
