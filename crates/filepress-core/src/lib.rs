pub mod constants;
pub mod error;
pub mod response;
pub mod types;

pub use constants::*;
pub use error::FilepressError;
pub use response::{Envelope, EnvelopeError};
pub use types::*;
