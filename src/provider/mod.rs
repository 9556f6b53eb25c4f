//! Measurement provider surface
//!
//! This module provides:
//! - The `MeasurementApi` trait every collection loop is written
//!   against
//! - The wire types shared by all implementations
//! - The Globalping REST implementation
//!
//! All provider-specific logic must live in dedicated implementation
//! modules. The rest of the application interacts exclusively through
//! the `MeasurementApi` trait, which is also the mock seam for tests.

pub mod api;
pub mod types;
pub mod globalping;

use std::sync::Arc;

use api::MeasurementApi;
use globalping::GlobalpingClient;

/// Builds a provider client for one credential.
///
/// One client per API key: each credential shard gets its own
/// client and therefore its own quota view.
pub fn client_for_key(token: &str) -> Arc<dyn MeasurementApi> {
    Arc::new(GlobalpingClient::new(token.to_string()))
}
