//! Steps about who is connected

use cucumber::{given, then, when};

use chathub::models::{MessageType, ServerFrame};
use chathub::services::SHUTDOWN_REASON;

use crate::features::ChatWorld;

#[given(expr = "{string} is connected")]
async fn is_connected(world: &mut ChatWorld, name: String) {
    world.connect(&name, 64);
    world.settle();
}

#[given(expr = "{string} is connected but not reading, with room for {int} frame(s)")]
async fn is_stalled(world: &mut ChatWorld, name: String, capacity: usize) {
    world.connect_with(&name, capacity, true);
    world.settle();
}

#[when(expr = "{string} connects")]
async fn connects(world: &mut ChatWorld, name: String) {
    world.settle();
    world.connect(&name, 64);
}

#[when(expr = "{string} disconnects")]
async fn disconnects(world: &mut ChatWorld, name: String) {
    world.settle();
    let connection_id = world.participant(&name).connection_id.clone();
    assert_eq!(world.chat.remove_connection(&connection_id), Some(name));
}

#[when("the hub shuts down")]
async fn hub_shuts_down(world: &mut ChatWorld) {
    world.settle();
    world.chat.cleanup_all_connections();
}

#[then(expr = "{string} is told {string} joined")]
async fn told_joined(world: &mut ChatWorld, name: String, joiner: String) {
    let expected = format!("{} joined the chat", joiner);
    let found = world.frames_for(&name).iter().any(|frame| {
        matches!(frame, ServerFrame::Chat(m)
            if m.message_type == MessageType::UserJoined && m.content == expected)
    });
    assert!(found, "{} was not told that {} joined", name, joiner);
}

#[then(expr = "{string} is told {string} left")]
async fn told_left(world: &mut ChatWorld, name: String, leaver: String) {
    let expected = format!("{} left the chat", leaver);
    let found = world.frames_for(&name).iter().any(|frame| {
        matches!(frame, ServerFrame::Chat(m)
            if m.message_type == MessageType::UserLeft && m.content == expected)
    });
    assert!(found, "{} was not told that {} left", name, leaver);
}

#[then(expr = "{string} sees {int} user(s) online")]
async fn sees_users_online(world: &mut ChatWorld, name: String, count: usize) {
    let latest = world
        .frames_for(&name)
        .iter()
        .rev()
        .find_map(|frame| match frame {
            ServerFrame::OnlineUsers(update) => Some(update.users.len()),
            _ => None,
        });
    assert_eq!(latest, Some(count));
}

#[then(expr = "{int} user(s) is/are online")]
async fn users_online(world: &mut ChatWorld, count: usize) {
    assert_eq!(world.chat.online_user_count(), count);
}

#[then(expr = "{string} is disconnected by the hub")]
async fn disconnected_by_hub(world: &mut ChatWorld, name: String) {
    world.frames_for(&name);
    let close = world
        .participant(&name)
        .close
        .clone()
        .expect("no close frame received")
        .expect("close frame without a reason");
    assert_eq!(close.reason.as_str(), SHUTDOWN_REASON);
}
