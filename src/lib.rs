//! VibeCoach Library
//!
//! Core modules for the live coaching session orchestrator.

pub mod audio;
pub mod config;
pub mod error;
pub mod frame;
pub mod intake;
pub mod ledger;
pub mod poller;
pub mod session;
pub mod vision;
pub mod voice;
