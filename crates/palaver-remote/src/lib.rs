//! # palaver-remote
//!
//! Client-side contract for the remote source of truth: a per-table query
//! model, row-level writes, and realtime change subscriptions delivered as
//! async streams. [`MemoryGateway`] implements the contract in-process for
//! demos and tests.

pub mod events;
pub mod gateway;
pub mod memory;
pub mod query;

mod error;

pub use error::{RemoteError, Result};
pub use events::{ChangeEvent, ChangeType, EventKind, Subscription, SubscriptionSpec};
pub use gateway::{GatewayExt, RemoteGateway};
pub use memory::MemoryGateway;
pub use query::{Filter, Order, Query, Table};
