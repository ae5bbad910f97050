//! h2engine - HTTP/2 wire protocol engine
//!
//! This crate implements both ends of an HTTP/2 connection over any
//! blocking byte transport: framing, HPACK, stream state, flow control,
//! priority, server push and the GZIPPED_DATA/DROPPED_FRAME extensions.

pub mod http;
