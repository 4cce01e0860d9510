//! Core types and traits for the Aquila MQTT broker.
//!
//! This crate holds the building blocks shared by the packet codec and the
//! broker: encoding primitives, MQTT 5.0 reason codes and properties, QoS
//! levels, and topic-filter matching. It is `no_std` compatible when the
//! `std` feature is disabled.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod codec;
pub mod error;
pub mod properties;
pub mod qos;
pub mod reason;
pub mod topic;

/// A specialized `Result` type for aquila operations.
pub type Result<T> = core::result::Result<T, crate::error::Error>;
