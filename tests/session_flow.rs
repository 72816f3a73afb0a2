//! End-to-end session flows over the loopback broker with a paused clock.

use std::time::Duration;

use chatsync::broker::{LoopbackBroker, PALETTE};
use chatsync::config::SessionConfig;
use chatsync::connection::ConnectionState;
use chatsync::event::Channel;
use chatsync::session::{ChatSession, SessionHandle, SessionUpdate, spawn_session};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Client {
    handle: SessionHandle,
    task: JoinHandle<ChatSession>,
    updates: mpsc::UnboundedReceiver<SessionUpdate>,
}

impl Client {
    fn start(broker: &LoopbackBroker, name: &str) -> Self {
        let (transport, events) = broker.transport();
        let (tx, updates) = mpsc::unbounded_channel();
        let session = ChatSession::new(SessionConfig::default(), Box::new(transport), tx);
        let (handle, task) = spawn_session(session, events);
        assert!(handle.set_username(name));
        Self { handle, task, updates }
    }

    fn drain(&mut self) -> Vec<SessionUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            out.push(update);
        }
        out
    }

    async fn finish(self) -> ChatSession {
        assert!(self.handle.shutdown());
        self.task.await.expect("session task")
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn appended_texts(updates: &[SessionUpdate]) -> Vec<String> {
    updates
        .iter()
        .filter_map(|u| match u {
            SessionUpdate::MessageAppended(m) => Some(m.text.clone()),
            _ => None,
        })
        .collect()
}

fn typing_summaries(updates: &[SessionUpdate]) -> Vec<String> {
    updates
        .iter()
        .filter_map(|u| match u {
            SessionUpdate::Typing(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn two_users_chat_and_see_each_other_typing() {
    let broker = LoopbackBroker::new();
    let mut ana = Client::start(&broker, "ana");
    let mut bruno = Client::start(&broker, "bruno");

    assert!(ana.handle.connect());
    settle().await;
    assert!(bruno.handle.connect());
    settle().await;

    let ana_updates = ana.drain();
    let ana_color = broker.color_of("ana").expect("ana has a color");
    assert!(PALETTE.contains(&ana_color.as_str()));
    assert!(ana_updates.contains(&SessionUpdate::LocalColor(ana_color.clone())));
    assert!(ana_updates.contains(&SessionUpdate::Connection { state: ConnectionState::Connected, cause: None }));
    assert_eq!(appended_texts(&ana_updates), vec!["ana joined the chat", "bruno joined the chat"]);
    assert_eq!(appended_texts(&bruno.drain()), vec!["bruno joined the chat"]);

    assert!(ana.handle.input(3));
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(typing_summaries(&bruno.drain()), vec!["ana is typing…"]);

    assert!(ana.handle.send_message("hola"));
    settle().await;
    let bruno_updates = bruno.drain();
    assert_eq!(appended_texts(&bruno_updates), vec!["hola"]);
    assert_eq!(typing_summaries(&bruno_updates), vec![String::new()]);
    let hola = bruno_updates
        .iter()
        .find_map(|u| match u {
            SessionUpdate::MessageAppended(m) => Some(m.clone()),
            _ => None,
        })
        .expect("message");
    assert_eq!(hola.username, "ana");
    assert_eq!(hola.color, Some(ana_color));

    assert!(ana.handle.disconnect());
    settle().await;
    assert_eq!(appended_texts(&bruno.drain()), vec!["ana left the chat"]);

    let ana_session = ana.finish().await;
    let bruno_session = bruno.finish().await;

    let ana_texts: Vec<&str> = ana_session.messages().iter().map(|m| m.text.as_str()).collect();
    assert_eq!(ana_texts, vec!["ana joined the chat", "bruno joined the chat", "hola"]);
    assert!(ana_session.is_mine(&ana_session.messages()[2]));
    assert_eq!(ana_session.state(), ConnectionState::Disconnected);

    let bruno_texts: Vec<&str> = bruno_session.messages().iter().map(|m| m.text.as_str()).collect();
    assert_eq!(bruno_texts, vec!["bruno joined the chat", "hola", "ana left the chat"]);
    assert!(!bruno_session.is_mine(&bruno_session.messages()[1]));
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_connect_times_out_and_can_be_retried() {
    let broker = LoopbackBroker::new();
    broker.set_ack_connects(false);
    let mut ana = Client::start(&broker, "ana");

    assert!(ana.handle.connect());
    tokio::time::sleep(Duration::from_millis(10_001)).await;

    let cause = "connection timed out after 10000 ms".to_owned();
    let errors: Vec<SessionUpdate> = ana
        .drain()
        .into_iter()
        .filter(|u| matches!(u, SessionUpdate::Connection { state: ConnectionState::Error, .. }))
        .collect();
    assert_eq!(errors, vec![SessionUpdate::Connection { state: ConnectionState::Error, cause: Some(cause) }]);

    // The timed-out attempt was torn down, so a late ack reaches nobody.
    broker.release_acks();
    settle().await;
    assert!(ana.drain().is_empty());

    broker.set_ack_connects(true);
    assert!(ana.handle.connect());
    settle().await;
    assert!(ana.drain().contains(&SessionUpdate::Connection { state: ConnectionState::Connected, cause: None }));

    let session = ana.finish().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn broker_drop_ends_the_session_and_clears_presence() {
    let broker = LoopbackBroker::new();
    let (transport, events) = broker.transport();
    let client_id = transport.client_id();
    let (tx, mut updates) = mpsc::unbounded_channel();
    let session = ChatSession::new(SessionConfig::default(), Box::new(transport), tx);
    let (handle, task) = spawn_session(session, events);
    handle.set_username("ana");
    handle.connect();
    settle().await;

    broker.inject(
        Channel::TypingBroadcast,
        r#"{"sender":"carla","text":"TYPING_START","type":"TYPING_START"}"#,
    );
    settle().await;
    broker.drop_client(client_id);
    settle().await;

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update);
    }
    assert_eq!(typing_summaries(&seen), vec!["carla is typing…".to_owned(), String::new()]);
    assert_eq!(
        seen.last(),
        Some(&SessionUpdate::Connection { state: ConnectionState::Disconnected, cause: None })
    );

    handle.shutdown();
    let session = task.await.expect("session task");
    assert!(session.presence().is_empty());
}

#[tokio::test(start_paused = true)]
async fn malformed_and_stale_broadcasts() {
    let broker = LoopbackBroker::new();
    let mut ana = Client::start(&broker, "ana");
    ana.handle.connect();
    settle().await;
    ana.drain();

    broker.inject(Channel::MessageBroadcast, "{not json");
    broker.inject(Channel::MessageBroadcast, r#"{"sender":"  ","type":"MESSAGE"}"#);
    broker.inject(Channel::MessageBroadcast, r#"{"sender":"carla","type":"TYPING_START"}"#);
    settle().await;
    assert!(ana.drain().is_empty());

    // A remote typist whose stop never arrives expires after 5000 ms.
    broker.inject(Channel::TypingBroadcast, r#"{"sender":"carla","type":"TYPING_START"}"#);
    settle().await;
    assert_eq!(typing_summaries(&ana.drain()), vec!["carla is typing…"]);
    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(typing_summaries(&ana.drain()), vec![String::new()]);

    let session = ana.finish().await;
    assert!(session.messages().iter().all(|m| m.username == "ana"));
}
