//! In-process broker doubles for testing the FerroQ delivery engine.
//!
//! Everything the engine talks to — queue, session, wire callback, storage,
//! management, executor, plugins — has a scriptable, recording double here.
//! Tests act as the queue's delivery loop: they hand references to
//! `handle`, follow up with `proceed_deliver`, and drive the queue executor
//! by hand through [`ManualExecutor`], so every interleaving the engine
//! cares about can be scripted deterministically.

mod callback;
mod executor;
mod fixture;
mod message;
mod plugin;
mod queue;
mod session;
mod storage;

pub use callback::{RecordingCallback, SentPacket, PACKET_OVERHEAD};
pub use executor::{ManualExecutor, ThreadExecutor};
pub use fixture::Fixture;
pub use message::{PropertyFilter, TestMessage, TestReference};
pub use plugin::{CountingPlugin, RecordingManagement};
pub use queue::TestQueue;
pub use session::{TestSession, TestTransaction, TxLog, TxOutcome, TxRecord};
pub use storage::InMemoryStorage;
