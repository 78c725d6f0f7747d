//! Opens a listener and echoes every byte received on each accepted stream.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use relay_listener::{EndpointAddress, Listener, TokenProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;

#[derive(Parser, Debug)]
#[command(about = "Registers an endpoint on the relay and echoes raw streams")]
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let endpoint = EndpointAddress::with_port(args.host, args.path, args.port);
    let provider = Arc::new(TokenProvider::from_sas_key(args.key_name, args.key)?);
    let listener = Listener::new(endpoint, provider);

    listener.open(Duration::from_secs(30)).await?;
    log::info!("listener open, waiting for streams");

    loop {
        let Some(accepted) = listener.accept_next_stream().await? else {
            log::info!("listener closed, exiting");
            break;
        };
        tokio::spawn(async move {
            let (mut sink, mut stream) = accepted.socket.split();
            while let Some(Ok(message)) = stream.next().await {
                match message {
                    Message::Binary(data) => {
                        if sink.send(Message::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            log::debug!("{}: echo stream finished", accepted.tracking);
        });
    }

    Ok(())
}
