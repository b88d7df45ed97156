pub use super::monitor::Entity as Monitor;
pub use super::schedule::Entity as Schedule;
