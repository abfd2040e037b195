//! Somnia payment gateway integration: checkout redirect, gateway callback
//! verification and order reconciliation.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod orders;
pub mod services;
pub mod validation;
pub mod workers;
