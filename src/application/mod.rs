//! Application layer: the conversation state machine, the order ledger and
//! the background jobs built on top of the domain ports.
//!
//! Every operation takes the brand it runs for as an explicit argument;
//! nothing here holds per-request globals.

pub mod conversation;
pub mod effects;
pub mod ledger;
pub mod registry;
pub mod reminders;
pub mod webhook;
