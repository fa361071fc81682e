//! Change-feed client for the catalogo-sync remote document store.
//!
//! Subscriptions are exposed as a [`futures_util::Stream`] of [`ChangeEvent`],
//! either whole-document (`Value`) or per-child (`ChildAdded`,
//! `ChildRemoved`, `ChildChanged`).

mod channel;
mod client;
mod error;
mod message;

pub use channel::{ChannelBuilder, Subscription};
pub use client::{ConnectionState, RealtimeClient, RealtimeClientOptions};
pub use error::RealtimeError;
pub use message::{ChangeEvent, ChannelEvent, ChildSnapshot, RealtimeMessage, SubscriptionKind};
