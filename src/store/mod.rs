pub mod delivery;
pub mod orders;
pub mod platform;
pub mod stations;

pub use delivery::DeliveryPersonRegistry;
pub use orders::OrderLedger;
pub use platform::PlatformSettings;
pub use stations::StationInventory;
