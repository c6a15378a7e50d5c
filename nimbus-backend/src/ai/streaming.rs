//! Streaming model output as a finite, forward-only chunk sequence.
//!
//! Generation runs in its own task and pushes events into a bounded channel;
//! the consumer side is a plain `Receiver`. Dropping the receiver is the
//! cancellation signal: the producer's next send fails and generation stops.

use tokio::sync::mpsc;

/// Events emitted while a completion streams.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    /// A new piece of generated text.
    Delta(String),
    /// Generation finished normally.
    Done,
    /// Generation failed; no further events follow.
    Error(String),
}

pub type ChunkSender = mpsc::Sender<ChunkEvent>;
pub type ChunkReceiver = mpsc::Receiver<ChunkEvent>;

/// Create a chunk channel with the default buffer size (32).
pub fn chunk_channel() -> (ChunkSender, ChunkReceiver) {
    mpsc::channel(32)
}
