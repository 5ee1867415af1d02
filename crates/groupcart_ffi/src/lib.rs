//! UI-facing bindings for GroupCart.

pub mod api;
