//! Application layer module for DLMS/COSEM protocol
//!
//! This crate provides the APDU codec and the mapping from object-model
//! errors to the error APDUs a session layer answers with.

pub mod apdu;
pub mod data_access;

pub use apdu::{
    APdu, ApduControl, ApduHeader, ApduType, BlockNumbers, APDU_HEADER_LENGTH,
    SEGMENTED_APDU_HEADER_LENGTH,
};
pub use data_access::DataAccessResult;
