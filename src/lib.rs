//! Local Chat Library
//!
//! Core of a single-user chat client: messages, namespaced storage, a
//! conversation store with simulated delivery, and the error taxonomy.
//! The interactive binary is in `src/main.rs`.

pub mod chat;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage;
