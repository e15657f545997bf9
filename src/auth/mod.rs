//! Credential handling
//!
//! One process-wide token record, owned by a [`TokenCoordinator`] that
//! serves valid tokens to any caller and keeps at most one refresh in flight.

pub mod client;
pub mod coordinator;
pub mod token;

pub use client::{HttpRefreshClient, RefreshClient, RefreshError};
pub use coordinator::{RefreshOutcome, RefreshSubscription, TokenCoordinator};
pub use token::{RefreshResponse, TokenRecord};
