//! leadflow: a lead-capture CRM backend.
//!
//! Ingests webhook deliveries from Instagram, Facebook Messenger, WhatsApp,
//! inbound email and a website contact form, normalizes them into a single
//! lead record per sender, and sends at-most-once automated replies.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod channels;
pub mod leads;
pub mod outbound;
pub mod templates;

pub mod pipeline;
pub mod server;
