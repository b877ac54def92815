//! Rust implementation of the DLMS/COSEM application layer core
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `dlms-core`: Core types (OBIS codes, data objects) and error handling
//! - `dlms-transport`: TCP transport with length-prefixed wrapper framing
//! - `dlms-application`: APDU codec and error responses
//! - `dlms-interface`: COSEM object model and interface classes
//!
//! # Data flow
//!
//! Bytes received by a [`transport::TcpTransport`] are reassembled into
//! frames and delivered as events. A session loop decodes each frame with
//! [`application::APdu::decode`], resolves the target object through an
//! [`interface::ObjectDirectory`], runs the GET/SET/ACTION on it, and sends
//! back the encoded response. Failures become error APDUs via
//! [`application::APdu::error_response`].
//!
//! # Usage
//!
//! ```no_run
//! use dlms::interface::{CosemObject, ObjectRegistry, Register, ScalerUnit, units};
//! use dlms::ObisCode;
//! use std::sync::Arc;
//!
//! # async fn run() -> dlms::DlmsResult<()> {
//! let objects = ObjectRegistry::new();
//! let energy = Arc::new(Register::new(
//!     ObisCode::from_string("1.0.1.8.0.255")?,
//!     0.0,
//!     ScalerUnit::new(0, units::WATT_HOUR),
//!     0,
//! ));
//! objects.register(energy.clone()).await?;
//! let _value = energy.get_attribute(2).await?;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use dlms_core::{DataObject, DataType, DlmsError, DlmsResult, ErrorKind, ObisCode};

// Re-export transport API
pub mod transport {
    pub use dlms_transport::*;
}

// Re-export application layer
pub mod application {
    pub use dlms_application::*;
}

// Re-export interface classes
pub mod interface {
    pub use dlms_interface::*;
}
