pub mod backend;
pub mod chores;
pub mod config;
pub mod errors;
pub mod expenses;
pub mod home_setup;
pub mod logging;
pub mod penalty;
pub mod registration;
pub mod repo;
pub mod sync;

pub use splitfair_common as common;
