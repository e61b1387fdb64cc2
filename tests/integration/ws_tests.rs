//! WebSocket protocol integration tests

use std::time::Duration;

use serde_json::json;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::frame::coding::CloseCode, Message},
};

use chathub::config::RateLimitSettings;
use chathub::models::{MessageType, ServerFrame, ANONYMOUS_PREFIX};
use chathub::services::SHUTDOWN_REASON;

use crate::common::{test_config, TestServer, TestSocket};

/// Connect and consume the join notice, presence list and welcome
async fn join(server: &TestServer, name: &str) -> TestSocket {
    let mut socket = TestSocket::connect(&server.ws_url(), name).await;

    let joined = socket.next_chat().await;
    assert_eq!(joined.message_type, MessageType::UserJoined);

    let welcome = socket.next_chat().await;
    assert_eq!(welcome.message_type, MessageType::SystemNotification);

    socket
}

#[tokio::test]
async fn test_join_sequence() {
    let server = TestServer::start().await;
    let mut alice = TestSocket::connect(&server.ws_url(), "alice").await;

    match alice.next_frame().await {
        ServerFrame::Chat(message) => {
            assert_eq!(message.message_type, MessageType::UserJoined);
            assert_eq!(message.content, "alice joined the chat");
            assert!(message.is_from_system());
        }
        other => panic!("expected join notice, got {:?}", other),
    }

    match alice.next_frame().await {
        ServerFrame::OnlineUsers(update) => {
            assert_eq!(update.kind, "OnlineUsersUpdate");
            assert_eq!(update.users.len(), 1);
            assert_eq!(update.users[0].user_name, "alice");
        }
        other => panic!("expected presence list, got {:?}", other),
    }

    match alice.next_frame().await {
        ServerFrame::Chat(message) => {
            assert_eq!(message.message_type, MessageType::SystemNotification);
            assert_eq!(message.content, "Welcome alice to the chat!");
        }
        other => panic!("expected welcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_message_is_broadcast_to_everyone() {
    let server = TestServer::start().await;
    let mut alice = join(&server, "alice").await;
    let mut bob = join(&server, "bob").await;

    // Bob joining is announced to alice
    let notice = alice.next_chat().await;
    assert_eq!(notice.content, "bob joined the chat");
    assert_eq!(alice.next_presence().await.users.len(), 2);

    bob.send_json(json!({"content": "hi alice", "messageType": 0}))
        .await;

    for socket in [&mut alice, &mut bob] {
        let message = socket.next_chat().await;
        assert_eq!(message.content, "hi alice");
        assert_eq!(message.user_name, "bob");
        assert_eq!(message.message_type, MessageType::TextMessage);
    }
}

#[tokio::test]
async fn test_pascal_case_and_impersonation() {
    let server = TestServer::start().await;
    let mut alice = join(&server, "alice").await;

    alice
        .send_json(json!({
            "Content": "totally official",
            "UserName": "System",
            "UserId": "system",
            "MessageType": 3
        }))
        .await;

    let message = alice.next_chat().await;
    assert_eq!(message.content, "totally official");
    assert_eq!(message.user_name, "alice");
    assert_ne!(message.user_id, "system");
    assert_eq!(message.message_type, MessageType::TextMessage);
}

#[tokio::test]
async fn test_leave_is_announced() {
    let server = TestServer::start().await;
    let mut alice = join(&server, "alice").await;
    let bob = join(&server, "bob").await;
    alice.next_chat().await;

    bob.close().await;

    let notice = alice.next_chat().await;
    assert_eq!(notice.message_type, MessageType::UserLeft);
    assert_eq!(notice.content, "bob left the chat");

    let presence = alice.next_presence().await;
    assert_eq!(presence.users.len(), 1);
    assert_eq!(presence.users[0].user_name, "alice");
}

#[tokio::test]
async fn test_invalid_json_gets_error_reply() {
    let server = TestServer::start().await;
    let mut alice = join(&server, "alice").await;

    alice.send_text("{not json").await;

    let reply = alice.next_chat().await;
    assert_eq!(reply.message_type, MessageType::SystemNotification);
    assert!(reply.content.starts_with("Invalid message format:"));

    // The connection is still usable
    alice.send_json(json!({"content": "ok"})).await;
    assert_eq!(alice.next_chat().await.content, "ok");
}

#[tokio::test]
async fn test_missing_username_gets_anonymous_name() {
    let server = TestServer::start().await;
    let mut socket = TestSocket::connect_url(&server.ws_url()).await;

    let joined = socket.next_chat().await;
    assert!(joined.content.starts_with(ANONYMOUS_PREFIX));

    let presence = socket.next_presence().await;
    let name = &presence.users[0].user_name;
    assert!(name.starts_with(ANONYMOUS_PREFIX));
    assert_eq!(name.len(), ANONYMOUS_PREFIX.len() + 8);
}

#[tokio::test]
async fn test_long_username_is_truncated() {
    let mut config = test_config();
    config.chat.max_username_length = 5;
    let server = TestServer::start_with_config(config).await;

    let mut socket = TestSocket::connect(&server.ws_url(), "abcdefghij").await;
    let joined = socket.next_chat().await;
    assert_eq!(joined.content, "abcde joined the chat");
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let server = TestServer::start().await;
    let mut alice = join(&server, "alice").await;

    server.state.begin_shutdown();

    let frame = alice.expect_close().await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Normal);
    assert_eq!(frame.reason.as_str(), "Server shutting down");
    assert_eq!(server.state.chat.online_user_count(), 0);

    // New upgrades are refused
    let result = connect_async(format!("{}?username=late", server.ws_url())).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_handshakes_are_rate_limited() {
    let mut config = test_config();
    config.rate_limit = RateLimitSettings {
        enabled: true,
        connections_per_second: 1,
        burst_size: 1,
    };
    let server = TestServer::start_with_config(config).await;

    let _first = TestSocket::connect(&server.ws_url(), "alice").await;

    match connect_async(format!("{}?username=bob", server.ws_url())).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 429);
        }
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("second handshake should be limited"),
    }
}

#[tokio::test]
async fn test_registry_empties_when_clients_leave() {
    let server = TestServer::start().await;
    let alice = join(&server, "alice").await;
    assert_eq!(server.state.chat.online_user_count(), 1);

    alice.close().await;

    for _ in 0..50 {
        if server.state.chat.online_user_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("connection was not removed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_with_many_connections_sends_only_shutdown_close() {
    const CLIENTS: usize = 20;

    for _round in 0..5 {
        let server = TestServer::start().await;

        let mut sockets = Vec::with_capacity(CLIENTS);
        for i in 0..CLIENTS {
            sockets.push(TestSocket::connect(&server.ws_url(), &format!("user{}", i)).await);
        }
        for _ in 0..100 {
            if server.state.chat.online_user_count() == CLIENTS {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.state.chat.online_user_count(), CLIENTS);

        server.state.begin_shutdown();

        for socket in &mut sockets {
            loop {
                match socket.next_message().await {
                    Message::Text(text) => {
                        if let ServerFrame::Chat(message) =
                            ServerFrame::parse(text.as_str()).unwrap()
                        {
                            assert_ne!(
                                message.message_type,
                                MessageType::UserLeft,
                                "leave notice during shutdown: {}",
                                message.content
                            );
                        }
                    }
                    Message::Close(frame) => {
                        let frame = frame.expect("close frame without a reason");
                        assert_eq!(frame.code, CloseCode::Normal);
                        assert_eq!(frame.reason.as_str(), SHUTDOWN_REASON);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[tokio::test]
async fn test_oversized_frame_ends_connection() {
    let mut config = test_config();
    config.chat.max_message_bytes = 64;
    let server = TestServer::start_with_config(config).await;

    let mut alice = join(&server, "alice").await;
    let content = "x".repeat(1024);
    alice.send_json(json!({ "content": content })).await;

    // Whatever arrives before the end must not be the oversized message
    while let Some(message) = alice.next_or_end().await {
        match message {
            Message::Text(text) => {
                if let ServerFrame::Chat(chat) = ServerFrame::parse(text.as_str()).unwrap() {
                    assert_ne!(chat.content, content);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    for _ in 0..50 {
        if server.state.chat.online_user_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("oversized sender is still registered");
}

#[tokio::test]
async fn test_binary_frame_is_ignored() {
    let server = TestServer::start().await;
    let mut alice = join(&server, "alice").await;

    alice.send_binary(vec![0xde, 0xad, 0xbe, 0xef]).await;
    alice.send_json(json!({"content": "after binary"})).await;

    let message = alice.next_chat().await;
    assert_eq!(message.content, "after binary");
    assert_eq!(message.user_name, "alice");
    assert_eq!(server.state.chat.online_user_count(), 1);
}
