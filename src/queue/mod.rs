//! TETHER Protocol - Command Queue layer.
//!
//! This module implements the ordered, asynchronously-driven command
//! queue that owns the transport connection:
//!
//! - **Actions**: [`Action`], the primitive operations the writer thread
//!   performs (write, wait, state changes, callbacks)
//! - **Transactions**: [`Transaction`] and [`TransactionBuilder`], the
//!   atomically-scheduled groups of actions
//! - **Queue**: [`CommandQueue`], the connect/disconnect/dispose
//!   lifecycle plus the dedicated reader and writer threads
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Device Session                 │
//! ├─────────────────────────────────────────┤
//! │          Command Queue                  │  ← this module
//! │  writer thread ── ordered transactions  │
//! │  reader thread ── blocking read loop    │
//! ├─────────────────────────────────────────┤
//! │          Transport (OS link)            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Exactly two OS threads serve a live connection. The single writer is
//! what makes every ordering guarantee hold; the reader forwards each
//! read synchronously, so inbound bytes can never be reordered either.

mod action;
mod command_queue;
mod transaction;

pub use action::Action;
pub use command_queue::CommandQueue;
pub use transaction::{Transaction, TransactionBuilder};
