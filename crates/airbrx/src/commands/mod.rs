pub mod deploy;
pub mod setup;
pub mod status;
pub mod teardown;
