pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod jobs;

pub use api::HttpServer;
pub use client::AnalyzerClient;
pub use config::Config;
pub use error::{RefgraphError, Result};
pub use graph::{build_reference_chain, Direction, GraphDataSource, ReferenceChain, ReferenceTreeNode};
pub use jobs::{HomeContext, JobScheduler, JobStatus, JobStore, TraversalRequest};
