//! Courier Core - shared domain types and service infrastructure
//!
//! This crate provides:
//! - Identifier codec types ([`NullId`], [`NullString`], [`DualId`])
//! - The [`CourierService`] trait and [`ServiceRuntime`] bootstrap
//! - Error handling utilities
//! - Configuration loading

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::CourierConfig;
pub use domain::*;
pub use error::{CourierError, Result};
pub use service::{CourierService, DependencyStatus, HealthStatus, ReadinessStatus, ServiceRuntime};
