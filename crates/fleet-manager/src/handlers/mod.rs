//! Request handlers organized by resource.

pub mod admin;
pub mod agents;
pub mod health;
pub mod tasks;
