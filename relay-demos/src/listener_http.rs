//! Opens a listener in Hybrid-HTTP mode and echoes request bodies back.

use async_trait::async_trait;
use clap::Parser;
use relay_listener::{EndpointAddress, HttpRequestContext, HttpResponseWriter, Listener, RequestHandler, TokenProvider};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "Registers an endpoint on the relay and echoes HTTP request bodies")]
struct Args {
    #[arg(long, env = "RELAY_HOST")]
    host: String,
    #[arg(long, env = "RELAY_PATH")]
    path: String,
    #[arg(long, env = "RELAY_KEY_NAME")]
    key_name: String,
    #[arg(long, env = "RELAY_KEY")]
    key: String,
    #[arg(long, default_value_t = 443)]
    port: u16,
}

struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(&self, request: HttpRequestContext, response: HttpResponseWriter) {
        log::info!("{} {} {}", request.tracking, request.method, request.target);

        let mut body = Vec::new();
        while let Some(chunk) = request.read_body_chunk().await {
            body.extend_from_slice(&chunk);
        }

        if let Err(e) = response.start(200, None, Vec::new()).await {
            log::warn!("{}: failed to start response: {}", request.tracking, e);
            return;
        }
        if !body.is_empty() {
            if let Err(e) = response.write_body_chunk(body).await {
                log::warn!("{}: failed to write response body: {}", request.tracking, e);
                return;
            }
        }
        if let Err(e) = response.finish().await {
            log::warn!("{}: failed to finish response: {}", request.tracking, e);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let endpoint = EndpointAddress::with_port(args.host, args.path, args.port);
    let provider = Arc::new(TokenProvider::from_sas_key(args.key_name, args.key)?);
    let listener = Listener::new(endpoint, provider);

    listener.set_request_handler(Arc::new(EchoHandler)).await;
    listener.open(Duration::from_secs(30)).await?;
    log::info!("listener open in HTTP mode");

    // Raw-stream accepts never arrive in HTTP mode, but draining the queue
    // keeps the listener's dispatch loop running until shutdown.
    while listener.accept_next_stream().await?.is_some() {}

    Ok(())
}
