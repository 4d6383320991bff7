//! # altair - host SDK for a serial alt-az telescope mount
//!
//! Talks to a stepper-driver microcontroller over a serial line and turns
//! user-selected celestial targets into mount motion. Provides:
//! - COBS-framed, CRC8-checked packet link with ACK correlation and retry
//! - Background receiver with position/status/reference-lost event fan-out
//! - Two-star (and N-star Wahba) alignment solving with outlier rejection
//! - Celestial tracking start and approximate goto
//!
//! ## Quick Start
//! ```no_run
//! use altair::MountClient;
//! use std::time::Duration;
//!
//! let client = MountClient::connect().unwrap();
//! let events = client.subscribe();
//!
//! client.pause().unwrap();
//! client.get_positions().unwrap();
//! let evt = events.recv_timeout(Duration::from_secs(2)).unwrap();
//! println!("mount said: {:?}", evt);
//! ```

pub mod error;
pub mod types;
pub mod cobs;
pub mod crc;
pub mod frame;
pub mod serial;
pub mod client;
pub mod mat3;
pub mod astro;
pub mod align;
pub mod tracker;
pub mod liveview;

pub use align::{Alignment, AlignmentSet};
pub use client::{EventStream, MountClient};
pub use error::MountError;
pub use tracker::{Tracker, TrackingStart};
pub use types::*;

/// Result type alias for mount operations.
pub type Result<T> = std::result::Result<T, MountError>;
