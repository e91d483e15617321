pub mod batch;
pub mod chunk;
