//! probe-sync: synchronization layer for live AST probes
//!
//! A client for a remote code-analysis server. The user edits source text;
//! the client keeps node locators valid across edits and re-evaluates
//! probes (property queries on those nodes) over a request/response channel
//! that is either a real WebSocket or an HTTP long-poll emulation of one.
//!
//! # Layers
//!
//! - [`position`]: bit-packed `(line, column)` positions
//! - [`locator`]: node locators and the engine that adjusts them
//! - [`edit`]: editor bindings turning raw edits into [`Adjuster`]s
//! - [`rpc`]: request correlation, transports and discovery
//! - [`job`]: long-running cancellable evaluations
//! - [`probe`]: change fan-out, debouncing and live probes
//! - [`session`]: one connection with everything hanging off it
//!
//! # Example
//!
//! ```ignore
//! use probe_sync::{ClientConfig, ClientSession, LocatorHandle, Property};
//!
//! let session = ClientSession::connect(ClientConfig::load()?).await?;
//! let probe = session.open_probe(&locator, Property::named("pp"), source);
//! session.apply_range_changes(&[RangeChange::insert(Position::new(3, 1), "\n")]);
//! ```

pub mod cli;
pub mod config;
pub mod edit;
pub mod error;
pub mod job;
pub mod locator;
pub mod position;
pub mod probe;
pub mod rpc;
pub mod session;

// Re-export commonly used types
pub use cli::{Cli, Commands};
pub use config::ClientConfig;
pub use edit::{
    Adjuster, Bias, ChangeSet, DiffEditBinding, EditTransaction, RangeChange, RangeEditBinding,
    TextRange,
};
pub use error::{Result, SyncError};
pub use job::{JobController, JobOutcome, JobTicket, WorkerSubscription};
pub use locator::{LocatorHandle, NodeLocator, NodeLocatorStep, Property, PropertyArg, TypeAtLoc};
pub use position::{pack, unpack, Position, Span};
pub use probe::{ChangeEvent, ChangeNotificationBus, CullingTaskSubmitter, Probe, ProbeState};
pub use rpc::{ConnectionState, RequestCorrelator, RpcTransport, TransportKind};
pub use session::ClientSession;
