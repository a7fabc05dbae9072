//! Answers "is user U currently online?" across a fleet of stateless
//! processes. A shared expiring key-value store holds one key per online
//! user, refreshed by client heartbeats and removed either by an explicit
//! offline beacon or by the key's TTL running out.

pub mod api;
pub mod config;
pub mod heartbeat;
pub mod script;
pub mod store;
pub mod throttle;
pub mod tracker;

pub use config::Config;
pub use store::{MemoryStore, PresenceStore, RedisStore, StoreError};
pub use tracker::{Tracker, UserId};
