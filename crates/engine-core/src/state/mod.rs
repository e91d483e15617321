//! Durable pipeline state: the listing cursor and the progress ledger.
//!
//! Both live as pretty-printed JSON in the metadata directory and are
//! rewritten atomically. The ledger is always flushed before the cursor is
//! committed, so a crash between the two writes can only cause a re-fetch of
//! keys the ledger never recorded.

pub mod batch_state;
pub mod file;
pub mod ledger;
pub mod report;

pub const BATCH_STATE_FILE: &str = "batcher_state.json";
pub const PROGRESS_FILE: &str = "progress.json";
