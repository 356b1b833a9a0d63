//! canhil-codec - Bit-level CAN signal codec
//!
//! Packs and unpacks physical signal values into/out of frame payloads,
//! honoring the signal's start bit, bit length and byte order. Message-level
//! helpers re-encode a whole payload from the stored raw values.

pub mod decode;
pub mod encode;
pub mod error;

pub use decode::{decode_physical, extract_raw, unpack};
pub use encode::{insert_raw, pack, refresh_data};
pub use error::{CodecError, CodecResult};
