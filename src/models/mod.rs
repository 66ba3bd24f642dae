pub mod delivery_person;
pub mod dispatch;
pub mod order;
pub mod platform;
pub mod role;
pub mod station;
