pub mod chat;
pub mod code_host;
pub mod issue_tracker;
pub mod object_store;
