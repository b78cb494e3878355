//! Core constants, error types, and collaborator traits (always included).

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::{
    CapacityError, CryptoError, InputError, ProtocolError, RoomsError, StateError, TransportError,
    UserFacingError,
};
pub use traits::{CaptureSignal, MemoryStore, SecureStore};
