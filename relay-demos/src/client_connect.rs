//! Opens an outbound connection to a registered endpoint and exchanges bytes.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use relay_listener::{Client, EndpointAddress};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;

#[derive(Parser, Debug)]
#[command(about = "Connects to a relay endpoint as a client and sends one message")]
struct Args {
    #[arg(long, env = "RELAY_HOST")]
    host: String,
    #[arg(long, env = "RELAY_PATH")]
    path: String,
    #[arg(long, env = "RELAY_TOKEN")]
    token: Option<String>,
    #[arg(long, default_value_t = 443)]
    port: u16,
    #[arg(long, default_value = "hello from client-connect")]
    message: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let endpoint = EndpointAddress::with_port(args.host, args.path, args.port);
    let client = Client::new(endpoint, args.token);

    let socket = client.create_connection(Duration::from_secs(20)).await?;
    let (mut sink, mut stream) = socket.split();

    sink.send(Message::Binary(args.message.clone().into_bytes().into())).await?;
    if let Some(Ok(Message::Binary(echoed))) = stream.next().await {
        println!("{}", String::from_utf8_lossy(&echoed));
    }

    sink.close().await?;
    Ok(())
}
