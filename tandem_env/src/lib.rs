//! Tandem Environment Abstraction Layer
//!
//! This crate provides the abstraction allowing the orchestration core to
//! run in both **Production** (tokio) and **Test** (manual clock) environments.
//!
//! # Core Concept
//!
//! All sources of non-determinism used by the scheduler and the state store
//! are funneled through one trait:
//! - Time (`now()`, `system_time()`, `sleep()`)
//! - Task spawning (`spawn()`)
//! - Seeding (`seed()`)
//!
//! Tests swap in `ManualContext` and advance the clock by hand, so timer
//! driven behavior (tick cadence, retry delays, duration budgets) becomes
//! a plain synchronous assertion.
//!
//! # Example
//!
//! ```ignore
//! use tandem_env::RuntimeContext;
//!
//! async fn tick_loop<C: RuntimeContext>(ctx: &C) {
//!     loop {
//!         ctx.sleep(Duration::from_secs(1)).await;
//!         tick();
//!     }
//! }
//! ```

mod context;
mod manual;
mod tokio_impl;

pub use context::RuntimeContext;
pub use manual::ManualContext;
pub use tokio_impl::TokioContext;
