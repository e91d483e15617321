pub mod asr;
pub mod audio;
pub mod coordinator;
pub mod error;
pub mod manifest;
pub mod normalize;
pub mod step;
