//! Request handlers

pub mod generation;
pub mod health;
pub mod jobs;
pub mod query;
pub mod sources;
