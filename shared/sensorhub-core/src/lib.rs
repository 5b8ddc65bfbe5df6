//! SensorHub Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Reading, metric and alert types plus subscription filters
//! - The generic fan-out hub used for metric and alert delivery
//! - WebSocket delivery of a subscription to a remote client
//! - Standard service trait and runtime all microservices run under
//! - Error handling and environment configuration helpers

pub mod config;
pub mod domain;
pub mod error;
pub mod fanout;
pub mod service;
pub mod ws;

pub use config::{env_millis, env_or, env_string, require_positive};
pub use domain::*;
pub use error::{PipelineError, Result};
pub use fanout::{FanoutHub, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
pub use service::{DependencyStatus, HealthStatus, PipelineService, ReadinessStatus, ServiceRuntime};
