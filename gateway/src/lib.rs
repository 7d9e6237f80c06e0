pub mod client_handler;
pub mod config;
pub mod datanode;
pub mod download_aggregator;
pub mod error;
pub mod ingest_session;
pub mod jobs;
pub mod node_registry;
pub mod storage_gateway;
