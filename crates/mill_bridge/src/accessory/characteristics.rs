//! Typed characteristic set of a heater accessory.
//!
//! Values use the accessory protocol's numeric encodings so a protocol layer
//! can serve them without translation.

use serde::Serialize;
use strum::Display;
use strum::EnumIter;
use strum::IntoStaticStr;

use crate::device::HeaterStatus;

/// Accessory category advertised to controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum Category {
    Bridge = 2,
    Heater = 20,
}

impl Category {
    pub fn value(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum Active {
    #[default]
    Inactive = 0,
    Active = 1,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum CurrentHeaterCoolerState {
    #[default]
    Inactive = 0,
    Idle = 1,
    Heating = 2,
    Cooling = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum TargetHeaterCoolerState {
    Auto = 0,
    Heat = 1,
    Cool = 2,
}

/// Names of the characteristics a heater accessory exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum Characteristic {
    Active,
    CurrentHeaterCoolerState,
    TargetHeaterCoolerState,
    CurrentTemperature,
    HeatingThresholdTemperature,
}

/// Wire value of one characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CharacteristicValue {
    UInt8(u8),
    Float(f64),
}

/// Snapshot of every characteristic of one heater.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Characteristics {
    pub active: Active,
    pub current_state: CurrentHeaterCoolerState,
    pub target_state: TargetHeaterCoolerState,
    pub current_temperature: f64,
    pub target_temperature: f64,
}

impl Characteristics {
    /// Values of a freshly created accessory: heat mode, nothing measured yet.
    pub fn initial() -> Self {
        Self {
            active: Active::default(),
            current_state: CurrentHeaterCoolerState::default(),
            target_state: TargetHeaterCoolerState::Heat,
            current_temperature: 0.0,
            target_temperature: 0.0,
        }
    }

    /// Copy both temperatures of `status` into the snapshot.
    ///
    /// Returns whether anything changed. The target temperature is display
    /// only; it is never sent back to the heater.
    pub fn apply_status(&mut self, status: &HeaterStatus) -> bool {
        let changed = self.current_temperature != status.current_temperature
            || self.target_temperature != status.target_temperature;
        self.current_temperature = status.current_temperature;
        self.target_temperature = status.target_temperature;
        changed
    }

    pub fn value(&self, characteristic: Characteristic) -> CharacteristicValue {
        match characteristic {
            Characteristic::Active => CharacteristicValue::UInt8(self.active as u8),
            Characteristic::CurrentHeaterCoolerState => {
                CharacteristicValue::UInt8(self.current_state as u8)
            }
            Characteristic::TargetHeaterCoolerState => {
                CharacteristicValue::UInt8(self.target_state as u8)
            }
            Characteristic::CurrentTemperature => {
                CharacteristicValue::Float(self.current_temperature)
            }
            Characteristic::HeatingThresholdTemperature => {
                CharacteristicValue::Float(self.target_temperature)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_initial_is_heat_mode() {
        let c = Characteristics::initial();
        assert_eq!(c.target_state, TargetHeaterCoolerState::Heat);
        assert_eq!(
            c.value(Characteristic::TargetHeaterCoolerState),
            CharacteristicValue::UInt8(1)
        );
        assert_eq!(c.active, Active::Inactive);
        assert_eq!(c.current_state, CurrentHeaterCoolerState::Inactive);
    }

    #[test]
    fn test_apply_status_reports_change() {
        let mut c = Characteristics::initial();
        let status = HeaterStatus {
            current_temperature: 19.5,
            target_temperature: 21.0,
        };

        assert!(c.apply_status(&status));
        assert!(!c.apply_status(&status));
        assert_eq!(c.current_temperature, 19.5);
        assert_eq!(c.target_temperature, 21.0);
        assert_eq!(c.target_state, TargetHeaterCoolerState::Heat);
    }

    #[test]
    fn test_every_characteristic_has_a_value() {
        let c = Characteristics::initial();
        let names: Vec<&'static str> = Characteristic::iter().map(|ch| ch.into()).collect();
        assert_eq!(
            names,
            [
                "Active",
                "CurrentHeaterCoolerState",
                "TargetHeaterCoolerState",
                "CurrentTemperature",
                "HeatingThresholdTemperature",
            ]
        );
        for ch in Characteristic::iter() {
            let _ = c.value(ch);
        }
    }

    #[test]
    fn test_category_values() {
        assert_eq!(Category::Heater.value(), 20);
        assert_eq!(Category::Bridge.value(), 2);
        assert_eq!(Category::Heater.to_string(), "Heater");
    }
}
