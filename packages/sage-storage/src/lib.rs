pub mod chunks;
pub mod comprehension;
pub mod db;
pub mod knowledge;
pub mod migrations;
pub mod models;
pub mod qa;
pub mod vector;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
