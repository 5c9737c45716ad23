//! Questline Ports
//!
//! Trait seams between the delivery core and its collaborators:
//! the remote game server, the persistence layer, the chat transport,
//! and the clock. Production adapters live in the infrastructure
//! crates; tests substitute in-memory implementations.

mod clock;
mod game;
mod messenger;
mod store;

pub use clock::Clock;
pub use game::GameApi;
pub use messenger::Messenger;
pub use store::PlayerStore;
