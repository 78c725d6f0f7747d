//! A relay that doesn't recognize the namespace rejects the listen upgrade
//! with 404; that must surface as a non-transient error and `open()` must
//! not retry.

use relay_listener::{EndpointAddress, Listener, RelayErrorKind, TokenProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

async fn fake_relay_rejecting_namespace(listener: TcpListener) {
    let (mut tcp, _) = listener.accept().await.unwrap();
    let response = b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n";
    tcp.write_all(response).await.unwrap();
    let _ = tcp.shutdown().await;
}

#[tokio::test]
async fn unknown_namespace_is_a_fatal_non_retrying_error() {
    let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = control_listener.local_addr().unwrap().port();

    tokio::spawn(fake_relay_rejecting_namespace(control_listener));

    let endpoint = EndpointAddress::insecure("127.0.0.1", "no-such-endpoint", control_port);
    let provider = Arc::new(TokenProvider::from_sas_key("name", "a-test-signing-key").unwrap());
    let listener = Listener::new(endpoint, provider);

    let result = tokio::time::timeout(Duration::from_secs(5), listener.open(Duration::from_secs(5)))
        .await
        .expect("open() must fail promptly, not hang retrying");

    let err = result.expect_err("a 404 on listen must fail open()");
    assert_eq!(err.kind, RelayErrorKind::EndpointNotFound);
    assert!(!err.is_transient(), "namespace-not-found must not be classified as transient");
}
