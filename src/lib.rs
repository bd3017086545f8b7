//! channel-relay: mirrors a Telegram channel into another one.
//!
//! Listens for new posts in a source channel and copies each one, unchanged,
//! into a destination channel. Rate-limit signals from the platform are
//! waited out and retried without ever dropping the message.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod platform;
pub mod relay;
