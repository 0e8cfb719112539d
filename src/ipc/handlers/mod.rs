pub mod backup;
pub mod core;
pub mod documents;
pub mod lessons;
pub mod pacing;
pub mod setup;
pub mod vision;
