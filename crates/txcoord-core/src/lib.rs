mod client;
pub mod error;
pub mod types;

pub use client::ParticipantClient;
pub use error::*;
pub use types::*;
