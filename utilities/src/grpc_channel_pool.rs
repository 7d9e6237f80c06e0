use std::{collections::HashMap, str::FromStr, sync::Arc, time::Duration};

use crate::{result::Result, retry_policy::retry_with_backoff};
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{Instrument, Span, trace};

const CONNECT_RETRIES: u8 = 3;

#[derive(Clone, Debug, Default)]
pub struct GrpcChannelPool {
    store: Arc<Mutex<HashMap<String, Channel>>>,
}
impl GrpcChannelPool {
    pub fn new() -> Self {
        Self::default()
    }
    pub async fn get_channel(&self, addrs: &str) -> Result<Channel> {
        if let Some(chnl) = self.store.lock().await.get(addrs) {
            trace!("Channel already present");
            return Ok(chnl.clone());
        }
        trace!(%addrs, "Creating endpoint for channel since channel is not present already");
        let endpoint = Endpoint::from_str(addrs)
            .map_err(|e| format!("Error while creating an endpoint {e} for location {addrs}"))?
            .connect_timeout(Duration::from_secs(5));

        let chnl = retry_with_backoff(
            || {
                async {
                    endpoint.connect().await.map_err(|e| {
                        format!("Error while connecting to address {addrs}: {e:?}").into()
                    })
                }
                .instrument(Span::current())
            },
            CONNECT_RETRIES,
        )
        .await?;
        self.store
            .lock()
            .await
            .insert(addrs.to_owned(), chnl.clone());
        Ok(chnl)
    }
}

pub static GRPC_CHANNEL_POOL: once_cell::sync::Lazy<GrpcChannelPool> =
    once_cell::sync::Lazy::new(GrpcChannelPool::new);
