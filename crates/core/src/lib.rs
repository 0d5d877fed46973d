pub mod hardware;
pub mod report;
pub mod search;
pub mod types;
