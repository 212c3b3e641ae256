//! Request handlers.

pub mod health;
pub mod storage;
pub mod tts;
pub mod video;

pub use health::*;
pub use storage::*;
pub use tts::*;
pub use video::*;
