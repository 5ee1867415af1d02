//! Use-case services.
//!
//! # Responsibility
//! - Orchestrate identity and repository calls into account and list
//!   use-cases.
//! - Keep UI/FFI layers decoupled from storage details.

pub mod account_service;
pub mod session;
