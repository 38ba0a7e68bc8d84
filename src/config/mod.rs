pub use openid_config::{
    Config, DatabaseConfig, MaintenanceConfig, NonceConfig, TelemetryConfig,
};
