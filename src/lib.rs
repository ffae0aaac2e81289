//! HTTP service that classifies fruits and vegetables in uploaded images with
//! a pretrained checkpoint and returns the three most likely labels.

pub mod classifier;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod server;
