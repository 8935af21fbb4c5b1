//! Telegram delivery adapter.
//!
//! Implements the pipeline's `Notifier` seam over the Bot API. This crate is
//! intentionally one-way: the pipeline never imports it; the server wires
//! the two together at startup.

pub mod callback;
pub mod client;

pub use callback::{generate_callback_data, parse_callback_data, CALLBACK_DATA_MAX_BYTES};
pub use client::{follow_up_keyboard, BotClient};
