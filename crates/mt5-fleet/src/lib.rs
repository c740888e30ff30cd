// Container lifecycle and telemetry core for a fleet of MT5 terminal instances.

// Re-export dependencies potentially needed by consumers (like the server)
pub use bollard;
pub use mt5_common as common;

pub mod config;
pub mod deploy;
pub mod gateway;
pub mod lifecycle;
pub mod logs;
pub mod manager;
pub mod naming;
pub mod ports;
pub mod registry;
pub mod stats;
pub mod test_utils;

pub use config::FleetConfig;
pub use gateway::{BollardGateway, GatewayError, RuntimeGateway};
pub use manager::{CreatedInstance, FleetManager};
