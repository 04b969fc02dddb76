pub mod agent;
pub mod config;
pub mod error;
pub mod execution;
pub mod git;
pub mod log;
pub mod notebook;
pub mod operation;
pub mod registry;
pub mod repo;
pub mod runner;
pub mod search;
pub mod server;
pub mod service;
pub mod status;
pub mod summarizer;
pub mod util;

pub use error::{Error, Result};
pub use operation::{Operation, OperationStatus};
pub use registry::Id;
pub use service::Trybook;
