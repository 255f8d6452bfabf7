//! Configuration Module
//!
//! Configuration loading for the gateway service.

mod settings;

pub use settings::{
    ApiKey, BatchSettings, CacheSettings, GatewayConfig, PushSettings, ServerSettings,
    UpstreamSettings,
};
