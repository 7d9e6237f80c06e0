use command_runner::CommandRunner;
use config::Config;
use gateway_service::GatewayService;
use tokio::io::{AsyncBufReadExt, BufReader};
use utilities::{
    logger::{self, info},
    result::Result,
};
mod chunk_joiner;
mod command_runner;
mod config;
mod file_chunker;
mod gateway_service;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    let _guard = logger::init_logger(
        "Client",
        &config.client_id,
        &config.log_level,
        &config.log_base,
        config.apm_endpoint.as_deref(),
    )?;
    let gateway = GatewayService::new(config.gateway_addrs.clone());
    let mut command_executer = CommandRunner::new(gateway, config.chunk_size);
    info!("starting the Client");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(input)) => match command_executer.handle_input(&input).await {
                Ok(message) => {
                    println!("Success : {}", message);
                }
                Err(message) => {
                    println!("Error : {}", message);
                }
            },
            Ok(None) => break,
            Err(e) => {
                println!("error while reading the command {:?}", e);
            }
        }
    }
    Ok(())
}
