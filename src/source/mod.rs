pub mod error;
pub mod memory;
pub mod observation_source;
pub mod power_client;
