//! Browser push notification subsystem.
//!
//! [`worker::WorkerRuntime`] renders pushed messages and routes clicks in the
//! background context. [`controller::SubscriptionController`] owns the
//! foreground subscription lifecycle: capability detection, permission,
//! key exchange with the push service and registration with the server.
//! Platform facilities are reached through the [`worker::WorkerHost`] and
//! [`controller::PushPlatform`] traits.

pub mod api;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod sim;
pub mod state;
pub mod worker;
