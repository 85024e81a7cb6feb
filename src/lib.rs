pub mod api;
pub mod config;
pub mod error;
pub mod room;
pub mod store;

pub use config::Config;
pub use error::{Result, RoomError};
pub use room::RoomCoordinator;
