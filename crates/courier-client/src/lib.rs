//! Client-side reconciliation layer.
//!
//! Owns the optimistic local view of a conversation and merges server
//! acknowledgments and server-pushed events into a single canonical list.
//! Sans-IO: the embedding client performs the durable write and the socket
//! traffic, then feeds the results in here.
//!
//! # Flow
//!
//! 1. [`ConversationView::begin_send`] appends an optimistic entry keyed by
//!    a locally generated temp id and the caller issues the durable write.
//! 2. [`ConversationView::confirm_send`] swaps the optimistic entry for the
//!    canonical message once the write acknowledges.
//! 3. [`ConversationView::fail_send`] drops the entry and hands the draft
//!    back for restore.
//! 4. [`ConversationView::apply_event`] merges pushed events, suppressing
//!    duplicates that arrive through more than one delivery channel.

mod conversation;

pub use conversation::{ConversationView, PendingMessage};
