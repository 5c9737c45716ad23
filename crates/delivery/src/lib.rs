//! Questline Delivery
//!
//! The decision layer between an inbound answer and the game-server
//! client:
//!
//! ```text
//! inbound answer ──► Batch Buffer ──┬─► immediate single delivery
//!                   (burst check)   ├─► accumulation buffer ─► player
//!                                   │                          decides
//!                                   └─► wake timer, re-check later
//!
//! network failure ──► durable backlog ──► Queue Processor (replay)
//! ```
//!
//! Every delivery goes through the [`questline_ports::GameApi`] port;
//! failures are classified purely on the error taxonomy. Per-player
//! work is single-flight: the batch drain loop coalesces concurrent
//! triggers and the queue processor refuses to run twice.

pub mod batch;
pub mod burst;
pub mod dispatch;
pub mod queue;

pub use batch::{BatchCoordinator, BatchDecision, BatchSendReport, DrainState};
pub use burst::{BURST_MAX_GAP_MS, BURST_SAMPLE, BURST_WINDOW_MS, is_burst};
pub use dispatch::{DeliveryOutcome, Dispatcher};
pub use queue::{QueueProcessor, QueueReport, MAX_ITEM_ATTEMPTS};
