pub mod config;
pub mod error;

pub use config::{DriverKind, LaunchBound, QueueConfig, load_dotenv};
pub use error::*;
