pub mod client;
pub mod config;
pub mod error;
pub mod status;

pub use client::{GatewayClient, HealthReport, PaymentGateway};
pub use config::{
    Environment, GatewayConfig, GatewayConfigProvider, GatewaySettings, IpAllowlist,
    StaticConfigProvider, StoreId, DEFAULT_STORE_ID, MIN_PAYMENT_TIMEOUT_MINUTES,
};
pub use error::{GatewayError, GatewayResult};
pub use status::{PaymentStatus, StatusResponse};
