/// REST API types
pub mod dto;
mod error;

pub use error::ApiError;
