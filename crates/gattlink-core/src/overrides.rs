//! TOML override documents layered on top of a resolved preset.
//!
//! Every field is optional; only keys present in the document replace the
//! preset value. The merged result is re-validated before it is returned.

use serde::Deserialize;

use crate::config::{
    resolve, resolve_named, AdvFlags, BleConfig, CharPermissions, CharProperties, IoCapability,
    Phy, PhyMask, SleepMode,
};
use crate::error::ConfigError;
use crate::uuid::UuidByteOrder;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    /// Preset name; unknown names fall back to the default preset.
    pub preset: Option<String>,
    #[serde(default)]
    pub controller: ControllerOverrides,
    #[serde(default)]
    pub ext_adv: AdvOverrides,
    #[serde(default)]
    pub legacy_adv: AdvOverrides,
    #[serde(default)]
    pub security: SecurityOverrides,
    #[serde(default)]
    pub phy: PhyOverrides,
    #[serde(default)]
    pub gatt: GattOverrides,
    pub adv_flags: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerOverrides {
    pub tx_power_dbm: Option<i8>,
    pub sleep_mode: Option<SleepMode>,
    pub max_activities: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdvOverrides {
    pub interval_min: Option<u16>,
    pub interval_max: Option<u16>,
    pub channel_map: Option<u8>,
    pub tx_power_dbm: Option<i8>,
    pub primary_phy: Option<Phy>,
    pub secondary_phy: Option<Phy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityOverrides {
    pub auth_req: Option<u8>,
    pub io_cap: Option<IoCapability>,
    pub key_size: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhyOverrides {
    pub tx: Option<u8>,
    pub rx: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GattOverrides {
    pub app_id: Option<u16>,
    pub service_uuid: Option<String>,
    pub char_uuid: Option<String>,
    pub uuid_byte_order: Option<UuidByteOrder>,
    pub char_properties: Option<u8>,
    pub char_permissions: Option<u16>,
}

impl ConfigOverrides {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Resolves the named preset (or the default one) and applies the
    /// overrides on top.
    pub fn into_config(self) -> Result<BleConfig, ConfigError> {
        let base = match self.preset.as_deref() {
            Some(name) => resolve_named(name),
            None => resolve(Default::default()),
        };
        self.apply(base)
    }

    /// Applies the overrides to `config`. The preset field is ignored here.
    pub fn apply(&self, mut config: BleConfig) -> Result<BleConfig, ConfigError> {
        let c = &self.controller;
        set(&mut config.controller.tx_power_dbm, c.tx_power_dbm);
        set(&mut config.controller.sleep_mode, c.sleep_mode);
        set(&mut config.controller.max_activities, c.max_activities);

        let e = &self.ext_adv;
        set(&mut config.ext_adv.interval_min, e.interval_min);
        set(&mut config.ext_adv.interval_max, e.interval_max);
        set(&mut config.ext_adv.channel_map, e.channel_map);
        set(&mut config.ext_adv.tx_power_dbm, e.tx_power_dbm);
        set(&mut config.ext_adv.primary_phy, e.primary_phy);
        set(&mut config.ext_adv.secondary_phy, e.secondary_phy);

        let l = &self.legacy_adv;
        if l.tx_power_dbm.is_some() || l.primary_phy.is_some() || l.secondary_phy.is_some() {
            return Err(ConfigError::Invalid(
                "legacy advertising has no tx power or phy settings",
            ));
        }
        set(&mut config.legacy_adv.interval_min, l.interval_min);
        set(&mut config.legacy_adv.interval_max, l.interval_max);
        set(&mut config.legacy_adv.channel_map, l.channel_map);

        let s = &self.security;
        set(&mut config.security.auth_req.0, s.auth_req);
        set(&mut config.security.io_cap, s.io_cap);
        set(&mut config.security.key_size, s.key_size);

        set(&mut config.phy.tx, self.phy.tx.map(PhyMask));
        set(&mut config.phy.rx, self.phy.rx.map(PhyMask));
        set(&mut config.adv_flags, self.adv_flags.map(AdvFlags));

        let g = &self.gatt;
        set(&mut config.gatt.app_id, g.app_id);
        set(&mut config.gatt.service_uuid, g.service_uuid.clone());
        set(&mut config.gatt.char_uuid, g.char_uuid.clone());
        set(&mut config.gatt.uuid_byte_order, g.uuid_byte_order);
        set(&mut config.gatt.char_properties, g.char_properties.map(CharProperties));
        set(&mut config.gatt.char_permissions, g.char_permissions.map(CharPermissions));

        config.validate()?;
        Ok(config)
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
