pub mod ai;
pub mod availability;
pub mod backup;
pub mod conversation;
pub mod extractor;
pub mod orchestrator;
pub mod resolver;
pub mod store;
