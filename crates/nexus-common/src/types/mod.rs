//! Core types shared across the workspace
pub mod event;
pub mod genome;
pub mod outcome;
