pub mod cache;
pub mod clean;
pub mod config;
pub mod error;
pub mod fetch;
pub mod index;
pub mod metrics;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod records;
pub mod render;
pub mod report;
pub mod season;
pub mod table;

pub use error::PipelineError;
