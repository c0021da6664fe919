//! Infetech site: local persistence and personalization for a marketing site
//!
//! Browser-style key/value storage (sled) underneath typed record stores,
//! a rule engine that picks page copy from URL, IP and visit signals, and the
//! lead form, admin screens and auth gate built on top.

pub mod storage;
pub mod models;
// Keyed JSON-array stores for leads, campaigns, images and admin users
pub mod store;
pub mod config;
pub mod validation;
pub mod analytics;
pub mod geo;
pub mod signals;
pub mod visits;
pub mod rules;
pub mod content;
pub mod lead_form;
pub mod auth;
// CSV / JSON export and import
pub mod transfer;
pub mod admin;
// REST API module: Axum HTTP handlers on port 11111
pub mod rest;
