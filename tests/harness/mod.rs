//! Test harness utilities for connection lifecycle testing.
//!
//! This module provides an in-memory transport with a real WebSocket peer
//! on the other end, and a handler that records every callback.

#![allow(dead_code)]

mod peer;
mod recorder;

pub use peer::{Peer, close_frame, connect, duplex_pair, stalled_pair, tcp_pair};
pub use recorder::{Event, Recorder};
