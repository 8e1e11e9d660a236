//! Configuration model and shared errors for SocialWise.

pub mod config;
pub mod error;
