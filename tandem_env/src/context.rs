//! Core environment context trait for Tandem components.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the orchestration core can
/// run against both the production runtime (tokio) and a manually driven
/// clock in tests.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Tests**: `ManualContext` - virtual clock advanced by the caller
///
/// # Determinism
///
/// All methods that would normally introduce non-determinism (time,
/// randomness) are controlled by the implementation.
#[async_trait]
pub trait RuntimeContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for step timestamps and duration measurements.
    /// Under a manual context, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time for external-facing timestamps.
    ///
    /// Under a manual context, this is derived from virtual clock + epoch
    /// offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// Under a manual context: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// In production: `tokio::spawn`
    /// Under a manual context: the future is dropped and the caller drives
    /// the would-be loop body directly
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// Under a manual context, returns the configured seed.
    fn seed(&self) -> u64;
}
