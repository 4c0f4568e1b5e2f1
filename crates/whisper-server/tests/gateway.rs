use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use whisper_db::Database;
use whisper_gateway::identity::JwtVerifier;
use whisper_types::events::{GatewayCommand, GatewayEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: SocketAddr,
    db: Arc<Database>,
    verifier: Arc<JwtVerifier>,
    conversation: Uuid,
    ann: Uuid,
    ben: Uuid,
}

async fn spawn_server() -> Server {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let verifier = Arc::new(JwtVerifier::new("integration-secret", None, None));

    let (ann, ben) = (Uuid::new_v4(), Uuid::new_v4());
    db.create_user(ann, "ann").unwrap();
    db.create_user(ben, "ben").unwrap();
    let conversation = Uuid::new_v4();
    db.create_conversation(conversation, true, Some("lobby"), &[(ann, true), (ben, false)])
        .unwrap();

    let app = whisper_server::router(db.clone(), verifier.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        addr,
        db,
        verifier,
        conversation,
        ann,
        ben,
    }
}

impl Server {
    fn token(&self, user_id: Uuid) -> String {
        self.verifier
            .issue(user_id, "tester", chrono::Duration::minutes(5))
            .unwrap()
    }

    async fn connect(&self, user_id: Uuid) -> Socket {
        let url = format!("ws://{}/gateway?access_token={}", self.addr, self.token(user_id));
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }
}

async fn send(socket: &mut Socket, command: &GatewayCommand) {
    let json = serde_json::to_string(command).unwrap();
    socket.send(Message::Text(json.into())).await.unwrap();
}

/// Next event from the server, skipping control frames.
async fn next_event(socket: &mut Socket) -> GatewayEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn ready_lists_memberships() {
    let server = spawn_server().await;
    let mut socket = server.connect(server.ann).await;

    match next_event(&mut socket).await {
        GatewayEvent::Ready {
            user_id,
            conversation_ids,
        } => {
            assert_eq!(user_id, server.ann);
            assert_eq!(conversation_ids, vec![server.conversation]);
        }
        other => panic!("expected ready, got {:?}", other),
    }
}

#[tokio::test]
async fn message_reaches_every_member_and_counts_unread() {
    let server = spawn_server().await;
    let mut ann = server.connect(server.ann).await;
    let mut ben = server.connect(server.ben).await;
    next_event(&mut ann).await;
    next_event(&mut ben).await;

    send(
        &mut ann,
        &GatewayCommand::SendMessage {
            conversation_id: server.conversation,
            body: "hello over the wire".into(),
        },
    )
    .await;

    for socket in [&mut ann, &mut ben] {
        match next_event(socket).await {
            GatewayEvent::MessageCreated { sender_id, body, .. } => {
                assert_eq!(sender_id, server.ann);
                assert_eq!(body, "hello over the wire");
            }
            other => panic!("expected message-created, got {:?}", other),
        }
    }

    let ben_row = server.db.get_membership(server.conversation, server.ben).unwrap().unwrap();
    let ann_row = server.db.get_membership(server.conversation, server.ann).unwrap().unwrap();
    assert_eq!(ben_row.unread_count, 1);
    assert_eq!(ann_row.unread_count, 0);
}

#[tokio::test]
async fn identify_command_authenticates_a_bare_socket() {
    let server = spawn_server().await;
    let url = format!("ws://{}/gateway", server.addr);
    let (mut socket, _) = connect_async(url).await.unwrap();

    send(
        &mut socket,
        &GatewayCommand::Identify {
            token: server.token(server.ben),
        },
    )
    .await;

    assert!(matches!(
        next_event(&mut socket).await,
        GatewayEvent::Ready { user_id, .. } if user_id == server.ben
    ));
}

#[tokio::test]
async fn bad_token_is_closed_without_ready() {
    let server = spawn_server().await;
    let url = format!("ws://{}/gateway?access_token=not-a-token", server.addr);
    let (mut socket, _) = connect_async(url).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("server never closed the socket");
    match first {
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {}
        Some(Ok(other)) => panic!("expected close, got {:?}", other),
    }
}

#[tokio::test]
async fn rest_history_requires_a_token() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/conversations/{}/messages", server.addr, server.conversation);

    let anonymous = client.get(&url).send().await.unwrap();
    assert_eq!(anonymous.status(), reqwest::StatusCode::UNAUTHORIZED);

    let authed = client
        .get(&url)
        .bearer_auth(server.token(server.ann))
        .send()
        .await
        .unwrap();
    assert_eq!(authed.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&authed.text().await.unwrap()).unwrap();
    assert_eq!(body, serde_json::json!([]));
}
