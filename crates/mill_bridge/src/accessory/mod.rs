//! Heater accessories and their characteristics.

mod characteristics;
mod heater;

pub use characteristics::Active;
pub use characteristics::Category;
pub use characteristics::Characteristic;
pub use characteristics::CharacteristicValue;
pub use characteristics::Characteristics;
pub use characteristics::CurrentHeaterCoolerState;
pub use characteristics::TargetHeaterCoolerState;
pub use heater::AccessoryState;
pub use heater::HeaterAccessory;
pub use heater::PollStats;
