//! Mesh Setup: device commissioning flow engine.

pub mod collaborators;
pub mod config;
pub mod contexts;
pub mod error;
pub mod flow;
pub mod scopes;
pub mod steps;
pub mod ui;
