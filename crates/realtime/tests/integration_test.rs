use catalogo_sync_realtime::{
    ChangeEvent, ChannelEvent, ConnectionState, RealtimeClient, RealtimeClientOptions,
    RealtimeMessage, SubscriptionKind,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

// Accepts one connection, acknowledges joins and pushes `script` to the joined topic.
async fn start_mock_server(
    script: Vec<(ChannelEvent, Value)>,
    close_after_script: bool,
) -> (String, JoinHandle<Vec<RealtimeMessage>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("local_addr failed");

    let handle = tokio::spawn(async move {
        let mut received = Vec::new();
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return received,
        };
        let mut ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => return received,
        };

        while let Some(Ok(msg)) = ws.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let parsed: RealtimeMessage = match serde_json::from_str(&text) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };
            received.push(parsed.clone());

            if parsed.event != ChannelEvent::PhoenixJoin {
                continue;
            }
            let reply = json!({
                "topic": parsed.topic,
                "event": ChannelEvent::PhoenixReply,
                "payload": { "status": "ok", "response": {} },
                "ref": parsed.message_ref,
            });
            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                break;
            }
            for (event, payload) in &script {
                let push = json!({
                    "topic": parsed.topic,
                    "event": event,
                    "payload": payload,
                    "ref": null,
                });
                if ws.send(Message::Text(push.to_string())).await.is_err() {
                    break;
                }
            }
            if close_after_script {
                let _ = ws.close(None).await;
                break;
            }
        }
        received
    });

    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn test_connect_and_disconnect_transitions_state() {
    let (url, server) = start_mock_server(Vec::new(), false).await;
    let client = RealtimeClient::new(&url);
    let mut state_rx = client.on_state_change();

    client.connect().await.expect("connect failed");
    assert_eq!(state_rx.recv().await.unwrap(), ConnectionState::Connecting);
    assert_eq!(state_rx.recv().await.unwrap(), ConnectionState::Connected);

    client.disconnect().await.expect("disconnect failed");
    assert_eq!(
        client.get_connection_state().await,
        ConnectionState::Disconnected
    );
    let _ = tokio::time::timeout(Duration::from_secs(1), server).await;
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RealtimeClient::new(&format!("http://{}", addr));
    let result = client.connect().await;
    assert!(result.is_err());
    assert_eq!(
        client.get_connection_state().await,
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_children_subscription_receives_child_events() {
    let script = vec![
        (
            ChannelEvent::ChildAdded,
            json!({ "key": "0", "value": { "id_price": 1, "nombre": "Pozole" } }),
        ),
        (
            ChannelEvent::ChildRemoved,
            json!({ "key": "0", "value": { "id_price": 1, "nombre": "Pozole" } }),
        ),
    ];
    let (url, server) = start_mock_server(script, false).await;
    let client = RealtimeClient::new(&url);

    let mut subscription = client
        .channel("especiales")
        .kind(SubscriptionKind::Children)
        .subscribe()
        .await
        .expect("subscribe failed");
    assert_eq!(subscription.topic(), "children:especiales");

    let first = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("timed out waiting for child_added")
        .expect("stream ended");
    match first {
        ChangeEvent::ChildAdded(child) => {
            assert_eq!(child.position(), Some(0));
            assert_eq!(child.value["nombre"], "Pozole");
        }
        other => panic!("expected ChildAdded, got {:?}", other),
    }

    let second = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("timed out waiting for child_removed")
        .expect("stream ended");
    assert!(matches!(second, ChangeEvent::ChildRemoved(_)));

    client.disconnect().await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(1), server)
        .await
        .expect("server did not finish")
        .unwrap();
    let join = received
        .iter()
        .find(|m| m.event == ChannelEvent::PhoenixJoin)
        .expect("no join sent");
    assert_eq!(join.payload["path"], "especiales");
    assert_eq!(join.payload["kind"], "children");
}

#[tokio::test]
async fn test_value_subscription_ignores_child_events() {
    let script = vec![
        (ChannelEvent::ChildAdded, json!({ "key": "0", "value": {} })),
        (ChannelEvent::Value, json!({ "value": [{ "id": "a" }] })),
    ];
    let (url, _server) = start_mock_server(script, false).await;
    let client = RealtimeClient::new(&url);

    let mut subscription = client.channel("/products").subscribe().await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("timed out")
        .expect("stream ended");
    assert_eq!(event, ChangeEvent::Value(json!([{ "id": "a" }])));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_stream_ends_when_server_closes() {
    let script = vec![(ChannelEvent::Value, json!({ "value": null }))];
    let (url, _server) = start_mock_server(script, true).await;
    let options = RealtimeClientOptions {
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let client = RealtimeClient::new_with_options(&url, options);

    let mut subscription = client.channel("credits").subscribe().await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("timed out");
    assert_eq!(first, Some(ChangeEvent::Value(Value::Null)));

    let end = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("stream did not end after close");
    assert!(end.is_none());
}
