//! Ward Types - Core types for failure classification and resilience
//!
//! Ward is an in-process resilience layer. It turns raw failure signals into
//! a fixed taxonomy, aggregates them, guards risky operations with circuit
//! breakers and exposes a continuously updated health signal.
//!
//! ## Key Concepts
//!
//! - **RawSignal**: An unstructured failure report pushed in by a collaborator
//! - **ClassifiedError**: A deduplicated, aggregated ledger entry
//! - **CircuitState**: The three states of a circuit breaker
//! - **HealthSnapshot**: Immutable point-in-time health summary
//! - **Events**: Broadcast stream of resilience activity

#![deny(unsafe_code)]

pub mod circuit;
pub mod classified;
pub mod events;
pub mod health;
pub mod ids;
pub mod profile;
pub mod signal;

// Re-export main types
pub use circuit::{CircuitBreakerStats, CircuitState};
pub use classified::{ClassifiedError, ClassifiedErrorDraft, ErrorKind, ParseKindError, Severity};
pub use events::ResilienceEvent;
pub use health::{ErrorSummary, HealthSnapshot, HealthStatus};
pub use ids::ErrorId;
pub use profile::{DeploymentProfile, ParseProfileError};
pub use signal::{RawSignal, SignalPayload};
