//! Operator CLI for the VNC browser sandbox.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
