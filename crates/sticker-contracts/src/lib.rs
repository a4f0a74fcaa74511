pub mod config;
pub mod error;
pub mod events;
pub mod grid;
pub mod reference;
pub mod runs;

pub use error::StickerError;
