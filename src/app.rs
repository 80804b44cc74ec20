pub mod artifact_store;
pub mod document_store;
pub mod http;
pub mod model;
pub mod preview;
pub mod queue;
pub mod runner;
pub mod service;
