//! Notification dispatch and retry engine.
//!
//! - [`policy`]: retry strategies (fixed delay, exponential backoff)
//! - [`gateway`]: the single-attempt delivery capability and its implementations
//! - [`store`]: in-memory record registry with per-record locking
//! - [`dispatcher`]: the state machine, worker pool and cancellation hook

pub mod dispatcher;
pub mod gateway;
pub mod policy;
pub mod store;

pub use dispatcher::{DispatchConfig, DispatchEngine, DispatchTicket, EngineStats};
pub use gateway::{DeliveryError, DeliveryGateway, SimulatedGateway, WebhookGateway};
pub use policy::{
    AttemptOutcome, ExponentialBackoffPolicy, FixedDelayPolicy, RetryDecision, RetryPolicy,
};
pub use store::{NotificationStore, StatusCounts};
