//! Types shared by every chainkeep crate: the error taxonomy, runtime settings and
//! checkpoint table. Nothing in here touches a file or a socket.

pub mod checkpoints;
pub mod error;
pub mod settings;

pub use checkpoints::Checkpoints;
pub use error::CoreError;
pub use settings::Settings;
