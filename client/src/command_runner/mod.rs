mod download_file_handler;
mod upload_file_handler;

use crate::gateway_service::GatewayService;
use download_file_handler::DownloadFileHandler;
use upload_file_handler::UploadFileHandler;
use utilities::result::Result;

const HELP: &str = "\nupload command : upload source_file_location\ndownload command : download upload_id target_file_path\n";

pub struct CommandRunner {
    upload_file_handler: UploadFileHandler,
    download_file_handler: DownloadFileHandler,
}
impl CommandRunner {
    pub fn new(gateway: GatewayService, chunk_size: u64) -> Self {
        CommandRunner {
            upload_file_handler: UploadFileHandler::new(gateway.clone(), chunk_size),
            download_file_handler: DownloadFileHandler::new(gateway),
        }
    }
    pub async fn handle_input(&mut self, command: &str) -> Result<String> {
        let inputs: Vec<&str> = command.split_whitespace().collect();
        match inputs.as_slice() {
            ["upload", local_file_path] => {
                self.upload_file_handler
                    .upload_file(local_file_path.to_string())
                    .await
            }
            ["upload", ..] => {
                Err("Invalid upload command usage please use <help> to get help".into())
            }
            ["download", upload_id, local_file_path] => {
                self.download_file_handler
                    .download_file(upload_id.to_string(), local_file_path.to_string())
                    .await
            }
            ["download", ..] => {
                Err("Invalid download command usage please use <help> to get help".into())
            }
            ["help"] => Ok(HELP.to_owned()),
            _ => Err(
                "Invalid Command Please use valid command use :help to list available commands"
                    .into(),
            ),
        }
    }
}
