//! canhil-core - Core data model for the canhil HIL CAN stack
//!
//! This crate provides the message/signal catalogue types shared by the
//! codec, the bus abstraction and the service layer: [`Frame`], [`Signal`],
//! [`Message`], the [`MessageCatalogue`] container and the common
//! [`CanError`] type.

pub mod catalogue;
pub mod error;
pub mod frame;
pub mod message;
pub mod signal;

pub use catalogue::{CatalogueProvider, MessageCatalogue};
pub use error::{CanError, CanResult};
pub use frame::{Frame, FrameFlags};
pub use message::{Message, MessageRef, SendType};
pub use signal::{ByteOrder, Signal};
