use std::sync::Arc;

use datanode::{config::Config, gateway::handler::GatewayHandler};
use proto::generated::datanode::datanode_server::DatanodeServer;
use storage::file_storage::FileStorage;
use tonic::transport::Server;
use utilities::{
    logger::{info, init_logger},
    result::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    let _guard = init_logger(
        "Datanode",
        &config.datanode_id,
        &config.log_level,
        &config.log_base,
        config.apm_endpoint.as_deref(),
    )?;
    info!(?config, "Loaded datanode config");

    let store = FileStorage::new(config.storage_config()).await?;
    let handler = GatewayHandler::new(Arc::new(store));

    let addr = config.listen_addrs.parse()?;
    info!(%addr, "Starting the grpc server");
    Server::builder()
        .add_service(DatanodeServer::new(handler))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, stopping datanode");
        })
        .await?;
    Ok(())
}
