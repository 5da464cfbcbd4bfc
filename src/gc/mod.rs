//! The garbage collector (§4.8-§4.10): conservative root scanning, the
//! mark/sweep mechanics, and the background thread that drives them
//! periodically.

pub mod collector;
pub mod worker;

pub use collector::CollectStats;
