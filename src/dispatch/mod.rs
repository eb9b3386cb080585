//! Dispatch orchestration
//!
//! Three concurrently scheduled execution units (outbound sender, inbound
//! receiver, diagnostic receiver) coordinated over one shared region.

pub mod events;
pub mod inbound;
pub mod orchestrator;
pub mod outbound;
pub mod unit;

pub use events::{ErrorEvent, InboundEvent};
pub use orchestrator::{Dispatcher, LinkState, LinkStats};
pub use unit::{CancelScope, OriginId, SendOptions, UnitKind, UnitState, UnitStats, UnitStatsReport};
