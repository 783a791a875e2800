//! # Airbridge
//!
//! Connects tenants to Airtable (OAuth with PKCE, or a personal access token) and to
//! their own Postgres databases, and exposes both over an authenticated HTTP API.

pub mod airtable;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod tenant_db;
pub use migration;
