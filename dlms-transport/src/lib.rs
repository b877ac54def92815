//! Transport layer module for DLMS/COSEM protocol
//!
//! This crate provides the TCP transport: connection lifecycle, outbound
//! writes, and reassembly of inbound bytes into length-prefixed wrapper
//! frames delivered on an event channel.

pub mod framer;
pub mod tcp;

pub use framer::{encode_frame, FrameAssembler, LENGTH_PREFIX_LEN};
pub use tcp::{ConnectionState, TcpSettings, TcpTransport, TransportEvent};
