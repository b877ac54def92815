//! APDU (Application Protocol Data Unit) codec
//!
//! Every APDU carries a small fixed header in front of its raw service payload:
//!
//! ```text
//! [type:1][control:1][invoke_id:1]([block_number:4 BE][block_number_ack:4 BE])?[payload...]
//! ```
//!
//! The control octet is bit-packed:
//!
//! | bit(s) | field            |
//! |--------|------------------|
//! | 7      | `is_segmented`   |
//! | 6      | `last_segment`   |
//! | 5..2   | `segment_number` |
//! | 1..0   | `service_type`   |
//!
//! The two block-number fields are present if and only if `is_segmented` is set.
//! Decoding keys off the control octet, and encoding refuses a header whose
//! block numbers disagree with it, so every encodable APDU decodes back to
//! the same header.

use crate::data_access::DataAccessResult;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dlms_core::{DlmsError, DlmsResult, ErrorKind};
use std::fmt;

/// Length of the fixed header of a non-segmented APDU
pub const APDU_HEADER_LENGTH: usize = 3;

/// Length of the fixed header of a segmented APDU (header plus both block numbers)
pub const SEGMENTED_APDU_HEADER_LENGTH: usize = APDU_HEADER_LENGTH + 8;

const SEGMENTED_BIT: u8 = 0x80;
const LAST_SEGMENT_BIT: u8 = 0x40;
const MAX_SEGMENT_NUMBER: u8 = 0x0F;
const MAX_SERVICE_TYPE: u8 = 0x03;

/// Numeric APDU service code
///
/// Several service names share one code: the GET and READ families, SET and
/// WRITE, and CONFIRMED_SERVICE_ERROR with GENERAL_BLOCK_TRANSFER. The codec
/// only ever sees the number, so the aliases are plain constants of the same
/// value rather than distinct variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApduType(pub u8);

impl ApduType {
    pub const INITIATE_REQUEST: ApduType = ApduType(0x01);
    pub const INITIATE_RESPONSE: ApduType = ApduType(0x08);
    pub const READ_REQUEST: ApduType = ApduType(0xC0);
    pub const READ_RESPONSE: ApduType = ApduType(0xC4);
    pub const WRITE_REQUEST: ApduType = ApduType(0xC1);
    pub const WRITE_RESPONSE: ApduType = ApduType(0xC5);
    pub const ACTION_REQUEST: ApduType = ApduType(0xC3);
    pub const ACTION_RESPONSE: ApduType = ApduType(0xC7);
    pub const GET_REQUEST: ApduType = ApduType(0xC0);
    pub const GET_RESPONSE: ApduType = ApduType(0xC4);
    pub const SET_REQUEST: ApduType = ApduType(0xC1);
    pub const SET_RESPONSE: ApduType = ApduType(0xC5);
    pub const EVENT_NOTIFICATION: ApduType = ApduType(0xC2);
    pub const CONFIRMED_SERVICE_ERROR: ApduType = ApduType(0xE0);
    pub const EXCEPTION_RESPONSE: ApduType = ApduType(0xD0);
    pub const GENERAL_BLOCK_TRANSFER: ApduType = ApduType(0xE0);

    /// Raw code
    pub fn code(&self) -> u8 {
        self.0
    }

    /// Name used for logging; aliased codes report the GET/SET/error name
    pub fn name(&self) -> &'static str {
        match *self {
            Self::INITIATE_REQUEST => "INITIATE_REQUEST",
            Self::INITIATE_RESPONSE => "INITIATE_RESPONSE",
            Self::GET_REQUEST => "GET_REQUEST",
            Self::GET_RESPONSE => "GET_RESPONSE",
            Self::SET_REQUEST => "SET_REQUEST",
            Self::SET_RESPONSE => "SET_RESPONSE",
            Self::ACTION_REQUEST => "ACTION_REQUEST",
            Self::ACTION_RESPONSE => "ACTION_RESPONSE",
            Self::EVENT_NOTIFICATION => "EVENT_NOTIFICATION",
            Self::CONFIRMED_SERVICE_ERROR => "CONFIRMED_SERVICE_ERROR",
            Self::EXCEPTION_RESPONSE => "EXCEPTION_RESPONSE",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for ApduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.0)
    }
}

impl From<u8> for ApduType {
    fn from(code: u8) -> Self {
        ApduType(code)
    }
}

/// Bit-packed APDU control octet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApduControl {
    pub is_segmented: bool,
    pub last_segment: bool,
    /// 4-bit segment counter
    pub segment_number: u8,
    /// 2-bit service type
    pub service_type: u8,
}

impl ApduControl {
    /// Control octet of a single, complete (non-segmented, final) APDU
    pub fn single() -> Self {
        Self {
            is_segmented: false,
            last_segment: true,
            segment_number: 0,
            service_type: 0,
        }
    }

    /// Control octet of one segment of a segmented APDU
    pub fn segment(segment_number: u8, last_segment: bool) -> Self {
        Self {
            is_segmented: true,
            last_segment,
            segment_number,
            service_type: 0,
        }
    }

    /// Pack into one octet
    ///
    /// # Errors
    /// Returns a validation error if `segment_number` does not fit in 4 bits or
    /// `service_type` does not fit in 2 bits.
    pub fn to_byte(&self) -> DlmsResult<u8> {
        if self.segment_number > MAX_SEGMENT_NUMBER {
            return Err(DlmsError::validation(
                "control.segment_number",
                format!("{} does not fit in 4 bits", self.segment_number),
            ));
        }
        if self.service_type > MAX_SERVICE_TYPE {
            return Err(DlmsError::validation(
                "control.service_type",
                format!("{} does not fit in 2 bits", self.service_type),
            ));
        }

        let mut value = 0u8;
        if self.is_segmented {
            value |= SEGMENTED_BIT;
        }
        if self.last_segment {
            value |= LAST_SEGMENT_BIT;
        }
        value |= self.segment_number << 2;
        value |= self.service_type;
        Ok(value)
    }

    /// Unpack from one octet
    pub fn from_byte(value: u8) -> Self {
        Self {
            is_segmented: value & SEGMENTED_BIT != 0,
            last_segment: value & LAST_SEGMENT_BIT != 0,
            segment_number: (value >> 2) & MAX_SEGMENT_NUMBER,
            service_type: value & MAX_SERVICE_TYPE,
        }
    }
}

/// Block counters carried by segmented APDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockNumbers {
    pub block_number: u32,
    pub block_number_ack: u32,
}

/// APDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApduHeader {
    pub control: ApduControl,
    /// Correlates a request with its response
    pub invoke_id: u8,
    /// Present iff `control.is_segmented`
    pub blocks: Option<BlockNumbers>,
}

impl ApduHeader {
    /// Header of a single, complete APDU with no block numbers
    pub fn single(invoke_id: u8) -> Self {
        Self {
            control: ApduControl::single(),
            invoke_id,
            blocks: None,
        }
    }

    /// Header of one segment of a segmented APDU
    pub fn segmented(
        invoke_id: u8,
        segment_number: u8,
        last_segment: bool,
        blocks: BlockNumbers,
    ) -> Self {
        Self {
            control: ApduControl::segment(segment_number, last_segment),
            invoke_id,
            blocks: Some(blocks),
        }
    }

    /// Encoded length of this header
    pub fn encoded_len(&self) -> usize {
        if self.control.is_segmented {
            SEGMENTED_APDU_HEADER_LENGTH
        } else {
            APDU_HEADER_LENGTH
        }
    }

    fn check_consistency(&self) -> DlmsResult<()> {
        match (self.control.is_segmented, self.blocks.is_some()) {
            (true, false) => Err(DlmsError::validation(
                "header.blocks",
                "segmented header must carry block numbers",
            )),
            (false, true) => Err(DlmsError::validation(
                "header.blocks",
                "non-segmented header must not carry block numbers",
            )),
            _ => Ok(()),
        }
    }
}

/// Application Protocol Data Unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct APdu {
    apdu_type: ApduType,
    header: ApduHeader,
    payload: Bytes,
}

impl APdu {
    pub fn new(apdu_type: ApduType, header: ApduHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            apdu_type,
            header,
            payload: payload.into(),
        }
    }

    /// Create a GET request APDU
    pub fn get_request(invoke_id: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(ApduType::GET_REQUEST, ApduHeader::single(invoke_id), payload)
    }

    /// Create a SET request APDU
    pub fn set_request(invoke_id: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(ApduType::SET_REQUEST, ApduHeader::single(invoke_id), payload)
    }

    /// Create an ACTION request APDU
    pub fn action_request(invoke_id: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(ApduType::ACTION_REQUEST, ApduHeader::single(invoke_id), payload)
    }

    /// Build the error APDU a session layer answers with when handling fails
    ///
    /// - a truncated/undecodable request yields an EXCEPTION_RESPONSE
    /// - any other validation or protocol error yields a CONFIRMED_SERVICE_ERROR
    /// - transport errors have no APDU form and yield `None`
    ///
    /// The payload is the single data-access-result code for the error.
    pub fn error_response(invoke_id: u8, error: &DlmsError) -> Option<Self> {
        let apdu_type = match (error.kind(), error) {
            (ErrorKind::Transport, _) => return None,
            (_, DlmsError::Truncated { .. }) => ApduType::EXCEPTION_RESPONSE,
            _ => ApduType::CONFIRMED_SERVICE_ERROR,
        };
        let code = DataAccessResult::from_error(error) as u8;
        Some(Self::new(
            apdu_type,
            ApduHeader::single(invoke_id),
            Bytes::copy_from_slice(&[code]),
        ))
    }

    /// Encode to bytes
    ///
    /// # Errors
    /// Returns a validation error if the control fields overflow their bit
    /// widths or the block numbers disagree with `is_segmented`.
    pub fn encode(&self) -> DlmsResult<Bytes> {
        self.header.check_consistency()?;
        let control = self.header.control.to_byte()?;

        let mut buf = BytesMut::with_capacity(self.header.encoded_len() + self.payload.len());
        buf.put_u8(self.apdu_type.code());
        buf.put_u8(control);
        buf.put_u8(self.header.invoke_id);
        if let Some(blocks) = self.header.blocks {
            buf.put_u32(blocks.block_number);
            buf.put_u32(blocks.block_number_ack);
        }
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode from bytes
    ///
    /// # Errors
    /// Returns [`DlmsError::Truncated`] if `data` is shorter than the fixed
    /// header (3 bytes, or 11 when the control octet marks it segmented).
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        if data.len() < APDU_HEADER_LENGTH {
            return Err(DlmsError::Truncated {
                needed: APDU_HEADER_LENGTH,
                available: data.len(),
            });
        }

        let mut buf = data;
        let apdu_type = ApduType(buf.get_u8());
        let control = ApduControl::from_byte(buf.get_u8());
        let invoke_id = buf.get_u8();

        let blocks = if control.is_segmented {
            if data.len() < SEGMENTED_APDU_HEADER_LENGTH {
                return Err(DlmsError::Truncated {
                    needed: SEGMENTED_APDU_HEADER_LENGTH,
                    available: data.len(),
                });
            }
            Some(BlockNumbers {
                block_number: buf.get_u32(),
                block_number_ack: buf.get_u32(),
            })
        } else {
            None
        };

        Ok(Self {
            apdu_type,
            header: ApduHeader {
                control,
                invoke_id,
                blocks,
            },
            payload: Bytes::copy_from_slice(buf),
        })
    }

    pub fn apdu_type(&self) -> ApduType {
        self.apdu_type
    }

    pub fn header(&self) -> &ApduHeader {
        &self.header
    }

    pub fn invoke_id(&self) -> u8 {
        self.header.invoke_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}
