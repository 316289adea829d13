//! Integration tests running against an in-process websocket server.

use futures_util::{SinkExt, StreamExt};
use pulse_channel::{
    ChannelClient, ChannelConfig, ChannelError, ChannelEvent, ChannelMessage, ChannelMessageType,
    ConnectionState, Credential,
};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn test_config(url: String) -> ChannelConfig {
    ChannelConfig {
        url,
        heartbeat_interval_secs: 60,
        connect_timeout_secs: 5,
        reconnect_base_delay_secs: 0,
        reconnect_max_delay_secs: 0,
        max_reconnect_attempts: 3,
    }
}

/// Accept one connection, consume the AUTH message, and reply with the
/// scripted AUTH_RESULT.
async fn accept_and_auth(listener: &TcpListener, success: bool) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                let msg = ChannelMessage::from_json(&text).unwrap();
                if msg.msg_type == ChannelMessageType::Auth {
                    break;
                }
            }
            _ => {}
        }
    }

    let mut reply = ChannelMessage::new(ChannelMessageType::AuthResult);
    reply.success = Some(success);
    if !success {
        reply.error = Some("bad token".to_string());
    }
    ws.send(Message::Text(reply.to_json().unwrap().into()))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut WebSocketStream<TcpStream>, msg: ChannelMessage) {
    ws.send(Message::Text(msg.to_json().unwrap().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn connect_resolves_after_auth() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move { accept_and_auth(&listener, true).await });

    let client = ChannelClient::new(test_config(url));
    client
        .connect(Some(Credential::token("token")))
        .await
        .unwrap();

    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.is_connected());
    let _ws = server.await.unwrap();
}

#[tokio::test]
async fn auth_rejection_is_fatal() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let _ws = accept_and_auth(&listener, false).await;
        // Hold so the listener is not dropped before a would-be retry.
        sleep(Duration::from_secs(2)).await;
    });

    let client = ChannelClient::new(test_config(url));
    let mut events = client.events();

    let result = client.connect(Some(Credential::token("bad"))).await;
    assert!(matches!(result, Err(ChannelError::Authentication(_))));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ChannelEvent::AuthenticationFailed(_)));

    // No reconnection follows an auth rejection.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn messages_dispatch_in_transport_order() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_and_auth(&listener, true).await;
        for seq in 1..=3 {
            send(
                &mut ws,
                ChannelMessage::new(ChannelMessageType::NewMessage)
                    .with_payload(serde_json::json!({ "seq": seq })),
            )
            .await;
        }
        ws
    });

    let client = ChannelClient::new(test_config(url));
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    client.subscribe(ChannelMessageType::NewMessage, move |msg| {
        let seq = msg
            .payload
            .as_ref()
            .and_then(|p| p.get("seq"))
            .and_then(|s| s.as_u64())
            .unwrap_or(0);
        sink.lock().unwrap().push(seq);
    });

    client.connect(None).await.unwrap();

    timeout(Duration::from_secs(2), async {
        loop {
            if received.lock().unwrap().len() == 3 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
    let _ws = server.await.unwrap();
}

#[tokio::test]
async fn reconnects_after_connection_drop() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let ws = accept_and_auth(&listener, true).await;
        drop(ws);
        // Second session after the client reconnects.
        let mut ws = accept_and_auth(&listener, true).await;
        send(
            &mut ws,
            ChannelMessage::new(ChannelMessageType::NewMessage)
                .with_payload(serde_json::json!({ "seq": 1 })),
        )
        .await;
        sleep(Duration::from_secs(2)).await;
    });

    let client = ChannelClient::new(test_config(url));
    let mut events = client.events();
    client.connect(Some(Credential::token("token"))).await.unwrap();

    let mut saw_reconnecting = false;
    let mut reconnected = false;
    let deadline = async {
        // First Connected event may arrive before or after this subscriber
        // sees it, so scan until the post-drop Connected shows up.
        loop {
            match events.recv().await.unwrap() {
                ChannelEvent::Reconnecting { .. } => saw_reconnecting = true,
                ChannelEvent::Connected if saw_reconnecting => {
                    reconnected = true;
                    break;
                }
                _ => {}
            }
        }
    };
    timeout(Duration::from_secs(5), deadline).await.unwrap();

    assert!(reconnected);
    assert_eq!(client.state(), ConnectionState::Connected);
    server.abort();
}

#[tokio::test]
async fn disconnect_cancels_reconnection() {
    let (listener, url) = bind().await;
    let (drop_tx, drop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let ws = accept_and_auth(&listener, true).await;
        let _ = drop_rx.await;
        drop(ws);
        // A reconnect attempt would land here.
        let reconnect = timeout(Duration::from_millis(500), listener.accept()).await;
        reconnect.is_err()
    });

    let client = ChannelClient::new(test_config(url));
    client.connect(Some(Credential::token("token"))).await.unwrap();

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    drop_tx.send(()).unwrap();
    let no_reconnect = server.await.unwrap();
    assert!(no_reconnect);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_during_backoff_keeps_one_socket() {
    let (listener, url) = bind().await;
    let config = ChannelConfig {
        reconnect_base_delay_secs: 1,
        reconnect_max_delay_secs: 1,
        ..test_config(url)
    };
    let server = tokio::spawn(async move {
        let ws = accept_and_auth(&listener, true).await;
        drop(ws);
        // The explicit connect lands here while the backoff timer runs.
        let ws = accept_and_auth(&listener, true).await;
        // The woken reconnect loop must not open another socket on top of
        // the explicit one.
        let extra = timeout(Duration::from_secs(3), listener.accept()).await;
        (ws, extra.is_err())
    });

    let client = ChannelClient::new(config);
    let mut state_rx = client.state_watch();
    client.connect(Some(Credential::token("token"))).await.unwrap();

    timeout(Duration::from_secs(2), async {
        while *state_rx.borrow_and_update() != ConnectionState::Reconnecting {
            state_rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    client.connect(Some(Credential::token("token"))).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let (_ws, no_extra_socket) = server.await.unwrap();
    assert!(no_extra_socket);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn concurrent_connects_share_one_socket() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let ws = accept_and_auth(&listener, true).await;
        let second = timeout(Duration::from_millis(300), listener.accept()).await;
        (ws, second.is_err())
    });

    let client = ChannelClient::new(test_config(url));
    let other = client.clone();
    let (first, second) = tokio::join!(
        client.connect(Some(Credential::token("token"))),
        other.connect(Some(Credential::token("token"))),
    );

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(client.state(), ConnectionState::Connected);

    let (_ws, no_second_socket) = server.await.unwrap();
    assert!(no_second_socket);
}

#[tokio::test]
async fn sends_are_delivered_after_connect() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_and_auth(&listener, true).await;
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => {
                    let msg = ChannelMessage::from_json(&text).unwrap();
                    if msg.msg_type == ChannelMessageType::JoinConversation {
                        return msg;
                    }
                }
                _ => {}
            }
        }
    });

    let client = ChannelClient::new(test_config(url));
    client.connect(None).await.unwrap();
    client.join_conversation("conv-42").await.unwrap();

    let received = timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.conversation_id.as_deref(), Some("conv-42"));
}
