//! Two listeners registered on different endpoints must not cross-talk: a
//! rendezvous dispatched on one listener's control channel is delivered only
//! to that listener's accept queue, never the other's.

use futures_util::{SinkExt, StreamExt};
use relay_listener::{EndpointAddress, Listener, TokenProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

async fn fake_rendezvous_peer(listener: TcpListener, tag: u8) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    ws.send(Message::Binary(vec![tag].into())).await.unwrap();
    let echoed = match ws.next().await {
        Some(Ok(Message::Binary(data))) => data.to_vec(),
        other => panic!("expected a binary echo frame, got {other:?}"),
    };
    assert_eq!(echoed, vec![tag]);
    ws.close(None).await.unwrap();
}

async fn fake_control_plane(listener: TcpListener, rendezvous_port: u16, id: &'static str) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    let accept = format!(r#"{{"accept":{{"id":"{id}","address":"ws://127.0.0.1:{rendezvous_port}/"}}}}"#);
    ws.send(Message::Text(accept.into())).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
}

async fn run_one_listener(tag: u8, control_id: &'static str) {
    let rendezvous_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let rendezvous_port = rendezvous_listener.local_addr().unwrap().port();
    let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = control_listener.local_addr().unwrap().port();

    let peer_handle = tokio::spawn(fake_rendezvous_peer(rendezvous_listener, tag));
    tokio::spawn(fake_control_plane(control_listener, rendezvous_port, control_id));

    let endpoint = EndpointAddress::insecure("127.0.0.1", format!("endpoint-{tag}"), control_port);
    let provider = Arc::new(TokenProvider::from_sas_key("name", "a-test-signing-key").unwrap());
    let listener = Listener::new(endpoint, provider);
    listener.open(Duration::from_secs(5)).await.unwrap();

    let accepted = tokio::time::timeout(Duration::from_secs(5), listener.accept_next_stream())
        .await
        .expect("accept_next_stream timed out")
        .unwrap()
        .expect("expected exactly one accepted stream on this listener");
    assert_eq!(accepted.tracking.tracking_id(), control_id);

    let (mut sink, mut stream) = accepted.socket.split();
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Binary(data) => {
                sink.send(Message::Binary(data)).await.unwrap();
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    tokio::time::timeout(Duration::from_secs(5), peer_handle)
        .await
        .expect("fake rendezvous peer timed out")
        .unwrap();

    listener.close(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn two_independent_listeners_route_only_to_their_own_accept_queue() {
    tokio::join!(run_one_listener(1, "r-a"), run_one_listener(2, "r-b"));
}
