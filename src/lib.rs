pub mod assort;
pub mod audit_config;
pub mod config;
pub mod election;
pub mod errors;
pub mod estimate;
pub mod init;
pub mod record;
pub mod risk;
pub mod sampler;
pub mod selection;
pub mod ui;
pub mod verify;
pub mod workflow;
