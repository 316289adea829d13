//! End-to-end tests for the composed service, against an in-process
//! websocket server and a recording API client.

use futures_util::{SinkExt, StreamExt};
use pulse_api::{ApiClient, LikeResponse, RecordingApi};
use pulse_cache::{CacheKey, EntityValue, Post};
use pulse_channel::{
    ChannelConfig, ChannelMessage, ChannelMessageType, ConnectionState, Credential,
};
use pulse_client::{MutationOutcome, SyncConfig, SyncService};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn test_config(channel_url: String) -> SyncConfig {
    SyncConfig {
        channel: ChannelConfig {
            url: channel_url,
            heartbeat_interval_secs: 60,
            connect_timeout_secs: 5,
            reconnect_base_delay_secs: 0,
            reconnect_max_delay_secs: 0,
            max_reconnect_attempts: 3,
        },
        viewer_id: "viewer".to_string(),
        ..SyncConfig::default()
    }
}

fn service(channel_url: String) -> (Arc<RecordingApi>, SyncService) {
    let api = Arc::new(RecordingApi::new());
    let service = SyncService::new(
        test_config(channel_url),
        Arc::clone(&api) as Arc<dyn ApiClient>,
    );
    (api, service)
}

/// Accept a connection, answer the AUTH handshake, and return the stream.
async fn accept_and_auth(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    loop {
        if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
            let msg = ChannelMessage::from_json(&text).unwrap();
            if msg.msg_type == ChannelMessageType::Auth {
                break;
            }
        }
    }

    let mut reply = ChannelMessage::new(ChannelMessageType::AuthResult);
    reply.success = Some(true);
    ws.send(Message::Text(reply.to_json().unwrap().into()))
        .await
        .unwrap();
    ws
}

/// Consume frames until the requested message type arrives.
async fn wait_for(
    ws: &mut WebSocketStream<TcpStream>,
    msg_type: ChannelMessageType,
) -> ChannelMessage {
    loop {
        if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
            let msg = ChannelMessage::from_json(&text).unwrap();
            if msg.msg_type == msg_type {
                return msg;
            }
        }
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, msg: ChannelMessage) {
    ws.send(Message::Text(msg.to_json().unwrap().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn presence_bootstraps_on_connect() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_and_auth(&listener).await;
        wait_for(&mut ws, ChannelMessageType::RequestOnlineStatuses).await;
        send(
            &mut ws,
            ChannelMessage::new(ChannelMessageType::CurrentOnlineStatuses).with_payload(
                serde_json::json!({
                    "statuses": [{ "userId": "u1", "isOnline": true }]
                }),
            ),
        )
        .await;
        send(
            &mut ws,
            ChannelMessage::new(ChannelMessageType::GlobalUserStatusChanged)
                .with_payload(serde_json::json!({ "userId": "u2", "isOnline": true })),
        )
        .await;
        sleep(Duration::from_secs(2)).await;
    });

    let (_api, service) = service(url);
    service.start(Some(Credential::token("token"))).await.unwrap();

    timeout(Duration::from_secs(2), async {
        while !(service.presence().get_status("u1") && service.presence().get_status("u2")) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(service.presence().get_status("u1"));
    assert!(service.presence().get_status("u2"));
    assert!(!service.presence().get_status("u3"));

    service.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn like_confirms_through_the_cache() {
    let (api, service) = service("ws://127.0.0.1:1".to_string());
    let key = CacheKey::post("p1");
    let mut post = Post::new("p1", "author");
    post.likes_count = 5;
    service.cache().insert(key.clone(), EntityValue::Post(post));
    api.queue_like_response(LikeResponse {
        likes_count: Some(6),
        liked: Some(true),
    });

    let outcome = service.mutations().like("p1").await.unwrap();

    assert_eq!(outcome, MutationOutcome::Applied);
    let post = service
        .cache()
        .get(&key)
        .and_then(|entry| entry.value.as_post().cloned())
        .unwrap();
    assert_eq!(post.likes_count, 6);
    assert!(post.liked_by_viewer);
}

#[tokio::test]
async fn failed_like_reverts_and_surfaces() {
    let (api, service) = service("ws://127.0.0.1:1".to_string());
    let key = CacheKey::post("p1");
    let mut post = Post::new("p1", "author");
    post.likes_count = 5;
    service.cache().insert(key.clone(), EntityValue::Post(post));
    api.queue_failure("rate limited");

    let result = service.mutations().like("p1").await;

    assert!(result.is_err());
    let post = service
        .cache()
        .get(&key)
        .and_then(|entry| entry.value.as_post().cloned())
        .unwrap();
    assert_eq!(post.likes_count, 5);
    assert!(!post.liked_by_viewer);
}

#[tokio::test]
async fn shutdown_disconnects_and_drains_views() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let _ws = accept_and_auth(&listener).await;
        sleep(Duration::from_secs(5)).await;
    });

    let (api, service) = service(url);
    service.start(Some(Credential::token("token"))).await.unwrap();
    assert_eq!(service.channel().state(), ConnectionState::Connected);

    service.views().enqueue("c1");
    service.views().enqueue("c2");
    service.shutdown().await;

    assert_eq!(service.channel().state(), ConnectionState::Disconnected);
    assert_eq!(
        api.batched_view_ids(),
        vec!["c1".to_string(), "c2".to_string()]
    );
    server.abort();
}
