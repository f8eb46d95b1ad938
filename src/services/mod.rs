//! Domain services used by the websocket routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the chat state and its invariants so route handlers
//! can stay focused on protocol translation and field validation.

pub mod chat;
