//! Command-line interface for drk
//!
//! This module contains CLI argument parsing and configuration

pub mod args;

pub use args::{Args, AttackArgs, Command, SignatureArgs};
