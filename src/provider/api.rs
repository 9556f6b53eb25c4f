use crate::schema::Probe;

use super::types::{CreateError, CreateRequest, Measurement, RateLimitState};

/// MeasurementApi is the abstraction layer between:
/// - The generic collection runtime
/// - The remote measurement provider's HTTP API
///
/// Each implementation must:
/// - Create measurements from a `CreateRequest`
/// - Await a measurement's terminal state
/// - Expose the creation quota and the probe directory
///
/// DESIGN GOALS:
/// - Zero provider-specific logic outside implementations
/// - The collection loops and all tests interact exclusively
///   through this trait (mock implementations, no network)
///
/// THREAD SAFETY:
/// - Must be Send + Sync; one instance is shared across the tasks
///   of a credential shard.
///
#[async_trait::async_trait]
pub trait MeasurementApi: Send + Sync {
    /// Creates a measurement and returns its id.
    ///
    /// Failure classes are part of the contract (`CreateError`):
    /// quota exhaustion and "no matching probes" are ordinary
    /// outcomes the loops react to, not transport-level errors.
    async fn create_measurement(
        &self,
        req: &CreateRequest,
    ) -> Result<String, CreateError>;

    /// Suspends until the measurement reaches a terminal state and
    /// returns the final snapshot.
    ///
    /// The remote operation is asynchronous on the provider's side;
    /// implementations poll, they never block a thread.
    async fn await_measurement(&self, id: &str) -> anyhow::Result<Measurement>;

    /// Returns the current measurement-creation quota.
    async fn get_limits(&self) -> anyhow::Result<RateLimitState>;

    /// Returns the provider's probe directory.
    async fn list_probes(&self) -> anyhow::Result<Vec<Probe>>;
}
