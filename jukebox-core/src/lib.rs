//! Pure venue playback domain: tracks, playback state, queues and commands.

mod command;
mod config;
mod error;
mod track;
mod util;
mod venue;

pub mod queue;

pub use command::*;
pub use config::*;
pub use error::*;
pub use track::*;
pub use util::*;
pub use venue::*;
