//! Preset resolution.
//!
//! A [`Preset`] names one of a small closed set of radio/advertising/GATT
//! parameter tables. [`resolve`] turns a preset into a concrete [`BleConfig`]
//! that callers may tweak field-by-field before handing it to the transport.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::uuid::{BleUuid, UuidByteOrder};

/// Nordic UART service, used when no service UUID is configured.
pub const DEFAULT_SERVICE_UUID: &str = "6E400001-B5A3-F393-E0A9-E50E24DCCA9E";
/// Nordic UART RX characteristic.
pub const DEFAULT_CHAR_UUID: &str = "6E400002-B5A3-F393-E0A9-E50E24DCCA9E";
/// Advertising on channels 37, 38 and 39.
pub const ADV_CHANNEL_ALL: u8 = 0x07;
/// Smallest advertising interval the controller accepts (20 ms).
pub const MIN_ADV_INTERVAL: u16 = 0x20;

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident($repr:ty) { $($(#[$fmeta:meta])* $flag:ident = $value:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            $($(#[$fmeta])* pub const $flag: Self = Self($value);)*

            pub const fn bits(self) -> $repr {
                self.0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

flag_set! {
    /// Preferred PHY bit mask.
    PhyMask(u8) {
        LE_1M = 0x01,
        LE_2M = 0x02,
        LE_CODED = 0x04,
    }
}

flag_set! {
    /// GATT characteristic properties.
    CharProperties(u8) {
        READ = 0x02,
        WRITE_NO_RSP = 0x04,
        WRITE = 0x08,
        NOTIFY = 0x10,
        INDICATE = 0x20,
    }
}

flag_set! {
    /// GATT attribute permissions.
    CharPermissions(u16) {
        READ = 0x0001,
        READ_ENCRYPTED = 0x0002,
        READ_ENC_MITM = 0x0004,
        WRITE = 0x0010,
        WRITE_ENCRYPTED = 0x0020,
        WRITE_ENC_MITM = 0x0040,
    }
}

flag_set! {
    /// Flags AD structure contents.
    AdvFlags(u8) {
        LIMITED_DISCOVERABLE = 0x01,
        GENERAL_DISCOVERABLE = 0x02,
        BREDR_NOT_SUPPORTED = 0x04,
    }
}

flag_set! {
    /// Security manager authentication requirements.
    AuthReq(u8) {
        NO_BOND = 0x00,
        BOND = 0x01,
        MITM = 0x04,
        SECURE_CONNECTIONS = 0x08,
    }
}

flag_set! {
    /// Key distribution mask.
    KeyMask(u8) {
        ENC = 0x01,
        ID = 0x02,
        CSR = 0x04,
        LINK = 0x08,
    }
}

/// Closed set of named parameter tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// BLE 5: balanced throughput and power.
    Ble5Default,
    /// BLE 5: long advertising intervals, reduced tx power.
    Ble5LowPower,
    /// BLE 5: 2M PHY everywhere, no sleep, short intervals.
    Ble5UltraPerf,
    /// BLE 4.2: stock controller settings.
    #[default]
    Ble4Default,
    /// BLE 4.2: minimal power draw.
    Ble4LowPower,
    /// BLE 4.2: shortest legacy advertising intervals.
    Ble4HighPerf,
}

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::Ble5Default,
        Preset::Ble5LowPower,
        Preset::Ble5UltraPerf,
        Preset::Ble4Default,
        Preset::Ble4LowPower,
        Preset::Ble4HighPerf,
    ];

    /// Canonical snake-case name.
    pub fn name(self) -> &'static str {
        match self {
            Preset::Ble5Default => "ble5_default",
            Preset::Ble5LowPower => "ble5_low_power",
            Preset::Ble5UltraPerf => "ble5_ultra_perf",
            Preset::Ble4Default => "ble4_default",
            Preset::Ble4LowPower => "ble4_low_power",
            Preset::Ble4HighPerf => "ble4_high_perf",
        }
    }

    /// Looks a preset up by canonical name, ignoring case and `-`/`_`.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|p| p.name() == wanted)
    }

    /// Looks a preset up by its numeric identifier (declaration order).
    pub fn from_repr(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Whether the preset targets BLE 5 controllers.
    pub fn is_ble5(self) -> bool {
        matches!(
            self,
            Preset::Ble5Default | Preset::Ble5LowPower | Preset::Ble5UltraPerf
        )
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepMode {
    None,
    ModemSleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phy {
    Le1M,
    Le2M,
    Coded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyAdvType {
    ConnectableUndirected,
    ScannableUndirected,
    NonConnectable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoCapability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    NoInputNoOutput,
    KeyboardDisplay,
}

/// Controller bring-up parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerParams {
    /// Default transmit power in dBm.
    pub tx_power_dbm: i8,
    pub sleep_mode: SleepMode,
    /// Maximum concurrent advertising/scanning/connection activities.
    pub max_activities: u8,
    /// Enables BLE 5 controller features.
    pub ble50_features: bool,
}

/// Extended (BLE 5) advertising set parameters. Intervals in 0.625 ms units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtAdvParams {
    pub connectable: bool,
    pub interval_min: u16,
    pub interval_max: u16,
    pub channel_map: u8,
    pub tx_power_dbm: i8,
    pub primary_phy: Phy,
    pub secondary_phy: Phy,
    pub sid: u8,
    pub scan_req_notif: bool,
}

/// Legacy (BLE 4.x) advertising parameters. Intervals in 0.625 ms units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAdvParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub adv_type: LegacyAdvType,
    pub channel_map: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityParams {
    pub auth_req: AuthReq,
    pub io_cap: IoCapability,
    /// Encryption key size in bytes (7..=16).
    pub key_size: u8,
    pub init_key: KeyMask,
    pub rsp_key: KeyMask,
}

/// Preferred PHYs for connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyParams {
    pub tx: PhyMask,
    pub rx: PhyMask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattParams {
    pub app_id: u16,
    pub service_uuid: String,
    pub char_uuid: String,
    pub uuid_byte_order: UuidByteOrder,
    pub char_properties: CharProperties,
    pub char_permissions: CharPermissions,
}

impl GattParams {
    pub fn service_uuid(&self) -> Option<BleUuid> {
        BleUuid::parse_lenient(&self.service_uuid, self.uuid_byte_order)
    }

    pub fn char_uuid(&self) -> Option<BleUuid> {
        BleUuid::parse_lenient(&self.char_uuid, self.uuid_byte_order)
    }
}

/// Fully resolved parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleConfig {
    pub preset: Preset,
    pub controller: ControllerParams,
    pub ext_adv: ExtAdvParams,
    pub legacy_adv: LegacyAdvParams,
    pub security: SecurityParams,
    pub phy: PhyParams,
    pub adv_flags: AdvFlags,
    pub gatt: GattParams,
}

impl Default for BleConfig {
    fn default() -> Self {
        resolve(Preset::default())
    }
}

impl BleConfig {
    /// Checks cross-field invariants that presets guarantee but overrides
    /// might break.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (min, max) in [
            (self.ext_adv.interval_min, self.ext_adv.interval_max),
            (self.legacy_adv.interval_min, self.legacy_adv.interval_max),
        ] {
            if min < MIN_ADV_INTERVAL {
                return Err(ConfigError::Invalid("advertising interval below 20 ms"));
            }
            if min > max {
                return Err(ConfigError::Invalid(
                    "advertising interval_min exceeds interval_max",
                ));
            }
        }
        if !(7..=16).contains(&self.security.key_size) {
            return Err(ConfigError::Invalid("key_size must be within 7..=16"));
        }
        if self.gatt.service_uuid().is_none() {
            return Err(ConfigError::Invalid("service uuid does not parse"));
        }
        if self.gatt.char_uuid().is_none() {
            return Err(ConfigError::Invalid("characteristic uuid does not parse"));
        }
        Ok(())
    }
}

/// Whether advertising should use the extended (BLE 5) path.
pub fn supports_extended_advertising(config: &BleConfig) -> bool {
    config.preset.is_ble5()
}

/// Resolves a preset into its parameter table. Pure and deterministic.
pub fn resolve(preset: Preset) -> BleConfig {
    let mut config = BleConfig {
        preset,
        controller: ControllerParams {
            tx_power_dbm: 6,
            sleep_mode: SleepMode::ModemSleep,
            max_activities: 3,
            ble50_features: false,
        },
        ext_adv: ExtAdvParams {
            connectable: true,
            interval_min: 0x20,
            interval_max: 0x40,
            channel_map: ADV_CHANNEL_ALL,
            tx_power_dbm: 9,
            primary_phy: Phy::Le1M,
            secondary_phy: Phy::Le2M,
            sid: 0,
            scan_req_notif: false,
        },
        legacy_adv: LegacyAdvParams {
            interval_min: 0x20,
            interval_max: 0x40,
            adv_type: LegacyAdvType::ConnectableUndirected,
            channel_map: ADV_CHANNEL_ALL,
        },
        security: SecurityParams {
            auth_req: AuthReq::BOND,
            io_cap: IoCapability::NoInputNoOutput,
            key_size: 16,
            init_key: KeyMask::ENC,
            rsp_key: KeyMask::ENC,
        },
        phy: PhyParams {
            tx: PhyMask::LE_1M | PhyMask::LE_2M,
            rx: PhyMask::LE_1M | PhyMask::LE_2M,
        },
        adv_flags: AdvFlags::GENERAL_DISCOVERABLE | AdvFlags::BREDR_NOT_SUPPORTED,
        gatt: GattParams {
            app_id: 0,
            service_uuid: DEFAULT_SERVICE_UUID.to_string(),
            char_uuid: DEFAULT_CHAR_UUID.to_string(),
            uuid_byte_order: UuidByteOrder::LittleEndian,
            char_properties: CharProperties::READ | CharProperties::WRITE | CharProperties::NOTIFY,
            char_permissions: CharPermissions::READ | CharPermissions::WRITE,
        },
    };

    if preset.is_ble5() {
        apply_ble5(&mut config);
    } else {
        apply_ble4(&mut config);
    }
    config
}

/// Resolves a preset by name, falling back to the default preset when the
/// name is not recognized.
pub fn resolve_named(name: &str) -> BleConfig {
    match Preset::from_name(name) {
        Some(preset) => resolve(preset),
        None => {
            let fallback = Preset::default();
            warn!(requested = name, %fallback, "unknown preset, using default");
            resolve(fallback)
        }
    }
}

/// Resolves a preset by numeric identifier with the same fallback rule as
/// [`resolve_named`].
pub fn resolve_repr(value: u8) -> BleConfig {
    match Preset::from_repr(value) {
        Some(preset) => resolve(preset),
        None => {
            let fallback = Preset::default();
            warn!(requested = value, %fallback, "unknown preset id, using default");
            resolve(fallback)
        }
    }
}

fn apply_ble5(config: &mut BleConfig) {
    config.controller.max_activities = 6;
    config.controller.ble50_features = true;
    config.ext_adv.primary_phy = Phy::Le2M;
    config.ext_adv.secondary_phy = Phy::Le2M;

    match config.preset {
        Preset::Ble5UltraPerf => {
            config.controller.tx_power_dbm = 9;
            config.controller.sleep_mode = SleepMode::None;
            config.ext_adv.tx_power_dbm = 9;
            config.ext_adv.interval_min = 0x40;
            config.ext_adv.interval_max = 0x60;
            config.phy.tx = PhyMask::LE_2M;
            config.phy.rx = PhyMask::LE_2M;
        }
        Preset::Ble5LowPower => {
            config.controller.tx_power_dbm = -12;
            config.controller.sleep_mode = SleepMode::ModemSleep;
            config.ext_adv.tx_power_dbm = -6;
            config.ext_adv.interval_min = 0x200;
            config.ext_adv.interval_max = 0x400;
            config.phy.tx = PhyMask::LE_1M;
            config.phy.rx = PhyMask::LE_1M;
        }
        _ => {
            config.controller.tx_power_dbm = 6;
            config.controller.sleep_mode = SleepMode::ModemSleep;
            config.ext_adv.tx_power_dbm = 6;
            config.ext_adv.interval_min = 0x80;
            config.ext_adv.interval_max = 0x100;
            config.phy.tx = PhyMask::LE_1M | PhyMask::LE_2M;
            config.phy.rx = PhyMask::LE_1M | PhyMask::LE_2M;
        }
    }
}

fn apply_ble4(config: &mut BleConfig) {
    config.controller.max_activities = 3;
    config.controller.ble50_features = false;
    config.legacy_adv.adv_type = LegacyAdvType::ConnectableUndirected;
    config.legacy_adv.channel_map = ADV_CHANNEL_ALL;

    match config.preset {
        Preset::Ble4HighPerf => {
            config.controller.tx_power_dbm = 9;
            config.legacy_adv.interval_min = 0x20;
            config.legacy_adv.interval_max = 0x30;
        }
        Preset::Ble4LowPower => {
            config.controller.tx_power_dbm = -12;
            config.legacy_adv.interval_min = 0x80;
            config.legacy_adv.interval_max = 0xC0;
        }
        _ => {
            config.controller.tx_power_dbm = 6;
            config.legacy_adv.interval_min = 0x40;
            config.legacy_adv.interval_max = 0x60;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_deterministic_for_every_preset() {
        for preset in Preset::ALL {
            assert_eq!(resolve(preset), resolve(preset), "{preset}");
            assert_eq!(resolve(preset).preset, preset);
        }
    }

    #[test]
    fn every_preset_validates() {
        for preset in Preset::ALL {
            resolve(preset)
                .validate()
                .unwrap_or_else(|e| panic!("{preset} failed validation: {e}"));
        }
    }

    #[test]
    fn extended_advertising_only_for_ble5() {
        for preset in Preset::ALL {
            assert_eq!(
                supports_extended_advertising(&resolve(preset)),
                preset.is_ble5(),
                "{preset}"
            );
        }
    }

    #[test]
    fn ultra_perf_pins_2m_phy_and_disables_sleep() {
        let cfg = resolve(Preset::Ble5UltraPerf);
        assert_eq!(cfg.phy.tx, PhyMask::LE_2M);
        assert_eq!(cfg.phy.rx, PhyMask::LE_2M);
        assert_eq!(cfg.controller.sleep_mode, SleepMode::None);
        assert_eq!(cfg.controller.tx_power_dbm, 9);
        assert_eq!((cfg.ext_adv.interval_min, cfg.ext_adv.interval_max), (0x40, 0x60));
        assert_eq!(cfg.ext_adv.primary_phy, Phy::Le2M);
    }

    #[test]
    fn ble4_low_power_uses_long_legacy_intervals() {
        let cfg = resolve(Preset::Ble4LowPower);
        assert_eq!(cfg.controller.tx_power_dbm, -12);
        assert_eq!(cfg.controller.max_activities, 3);
        assert!(!cfg.controller.ble50_features);
        assert_eq!(
            (cfg.legacy_adv.interval_min, cfg.legacy_adv.interval_max),
            (0x80, 0xC0)
        );
    }

    #[test]
    fn unknown_names_fall_back_to_default() {
        assert_eq!(resolve_named("warp_speed").preset, Preset::Ble4Default);
        assert_eq!(resolve_named("BLE5-Ultra-Perf").preset, Preset::Ble5UltraPerf);
        assert_eq!(resolve_repr(2).preset, Preset::Ble5UltraPerf);
        assert_eq!(resolve_repr(200).preset, Preset::Ble4Default);
    }

    #[test]
    fn validate_rejects_inverted_intervals_and_bad_key_size() {
        let mut cfg = resolve(Preset::Ble4Default);
        cfg.legacy_adv.interval_min = 0x100;
        assert!(cfg.validate().is_err());

        let mut cfg = resolve(Preset::Ble4Default);
        cfg.security.key_size = 4;
        assert!(cfg.validate().is_err());

        let mut cfg = resolve(Preset::Ble4Default);
        cfg.gatt.service_uuid = "not-a-uuid".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn flag_sets_combine() {
        let props = CharProperties::READ | CharProperties::NOTIFY;
        assert!(props.contains(CharProperties::NOTIFY));
        assert!(!props.contains(CharProperties::WRITE));
        assert_eq!(props.bits(), 0x12);
    }
}
