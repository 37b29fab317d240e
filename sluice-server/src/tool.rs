use anyhow::Result;
use local_ip_address::local_ip;

use sluice_core::sluice::sluice_client::SluiceClient;
use sluice_core::tool::MESSAGE_LIMIT;

pub const SLUICE_SERVER_PORT: i32 = 50061;

pub async fn get_sluice_default_client() -> Result<SluiceClient<tonic::transport::Channel>> {
    let my_local_ip = local_ip()?;

    match SluiceClient::connect(format!("http://{}:{}", my_local_ip, SLUICE_SERVER_PORT)).await {
        Ok(client) => Ok(client
            .max_decoding_message_size(MESSAGE_LIMIT)
            .max_encoding_message_size(MESSAGE_LIMIT)),
        Err(err) => Err(err.into()),
    }
}

pub async fn get_sluice_client(
    server_endpoint: &String,
) -> Result<SluiceClient<tonic::transport::Channel>> {
    match SluiceClient::connect(format!("http://{}", server_endpoint.clone())).await {
        Ok(client) => Ok(client
            .max_decoding_message_size(MESSAGE_LIMIT)
            .max_encoding_message_size(MESSAGE_LIMIT)),
        Err(err) => Err(err.into()),
    }
}
