//! Raw advertising payload construction.

use tracing::debug;

use crate::config::AdvFlags;
use crate::uuid::BleUuid;

/// Payload limit for legacy advertising PDUs.
pub const LEGACY_ADV_MAX: usize = 31;
/// Payload limit for a single extended advertising data fragment.
pub const EXTENDED_ADV_MAX: usize = 251;
/// Device name cap inside any advertising payload.
pub const ADV_NAME_MAX: usize = 28;

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;
const AD_TYPE_UUID128_COMPLETE: u8 = 0x07;
const AD_TYPE_NAME_COMPLETE: u8 = 0x09;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvMode {
    Legacy,
    Extended,
}

impl AdvMode {
    pub fn limit(self) -> usize {
        match self {
            AdvMode::Legacy => LEGACY_ADV_MAX,
            AdvMode::Extended => EXTENDED_ADV_MAX,
        }
    }
}

/// Builds the advertising data for `mode`.
///
/// Layout is flags, complete local name, then the service UUID list. The
/// name is the only field that is shortened to fit. 32-bit UUIDs have no
/// complete-list form here and are left out.
pub fn build_payload(
    mode: AdvMode,
    flags: AdvFlags,
    name: &str,
    service: Option<BleUuid>,
) -> Vec<u8> {
    let uuid_ad = service.and_then(uuid_structure);
    let fixed = 3 + uuid_ad.as_ref().map_or(0, Vec::len);
    let name_room = mode.limit().saturating_sub(fixed + 2).min(ADV_NAME_MAX);
    let name = truncate_utf8(name, name_room);

    let mut out = Vec::with_capacity(mode.limit());
    out.extend_from_slice(&[0x02, AD_TYPE_FLAGS, flags.bits()]);
    if !name.is_empty() {
        out.push(name.len() as u8 + 1);
        out.push(AD_TYPE_NAME_COMPLETE);
        out.extend_from_slice(name.as_bytes());
    }
    if let Some(uuid_ad) = uuid_ad {
        out.extend_from_slice(&uuid_ad);
    }
    out
}

pub fn build_legacy_payload(flags: AdvFlags, name: &str, service: Option<BleUuid>) -> Vec<u8> {
    build_payload(AdvMode::Legacy, flags, name, service)
}

pub fn build_extended_payload(flags: AdvFlags, name: &str, service: Option<BleUuid>) -> Vec<u8> {
    build_payload(AdvMode::Extended, flags, name, service)
}

fn uuid_structure(uuid: BleUuid) -> Option<Vec<u8>> {
    match uuid {
        BleUuid::Uuid16(value) => {
            let [lo, hi] = value.to_le_bytes();
            Some(vec![0x03, AD_TYPE_UUID16_COMPLETE, lo, hi])
        }
        BleUuid::Uuid128(bytes) => {
            let mut ad = Vec::with_capacity(18);
            ad.push(0x11);
            ad.push(AD_TYPE_UUID128_COMPLETE);
            ad.extend_from_slice(&bytes);
            Some(ad)
        }
        BleUuid::Uuid32(value) => {
            debug!(uuid = value, "32-bit service uuid not advertised");
            None
        }
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
