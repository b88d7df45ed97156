pub mod monitor;
pub mod prelude;
pub mod schedule;
