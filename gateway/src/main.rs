use std::sync::Arc;

use gateway::{
    client_handler::ClientHandler, config::Config, datanode::service::DatanodeService,
    storage_gateway::StorageGateway,
};
use proto::generated::gateway::storage_server::StorageServer;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use utilities::{
    logger::{error, info, init_logger},
    result::Result,
    worker_pool::WorkerPool,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    let _guard = init_logger(
        "Gateway",
        &config.id,
        &config.log_level,
        &config.log_base,
        config.apm_endpoint.as_deref(),
    )?;
    info!(?config, "Loaded gateway config");

    let cancel = CancellationToken::new();
    let pool = Arc::new(WorkerPool::new(
        config.worker_count,
        config.job_timeout(),
        cancel.clone(),
    ));
    pool.start();

    let gateway = match StorageGateway::initialize(
        &config.nodes,
        Arc::new(DatanodeService::new()),
        pool.clone(),
    )
    .await
    {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            error!(error = %e, "Error while initializing the storage gateway Hence shutting down");
            return Err(e.into());
        }
    };
    let handler = ClientHandler::new(
        gateway,
        config.chunk_size,
        config.download_timeout(),
        cancel.clone(),
    );

    let addr = config.listen_addrs.parse()?;
    info!(%addr, "Starting the grpc server");
    let shutdown = cancel.clone();
    Server::builder()
        .add_service(StorageServer::new(handler))
        .serve_with_shutdown(addr, async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, stopping gateway");
            shutdown.cancel();
        })
        .await?;
    pool.drain().await;
    info!("Gateway stopped");
    Ok(())
}
