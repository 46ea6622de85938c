pub mod config;
pub mod datetime;
pub mod model;

pub use datetime::FlexDateTime;

pub type BoxError = Box<dyn std::error::Error + Sync + Send + 'static>;
pub type BoxResult<T> = Result<T, BoxError>;
