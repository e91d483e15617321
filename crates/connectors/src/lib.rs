pub mod error;
pub mod local;
#[cfg(feature = "s3")]
pub mod s3;
pub mod store;
