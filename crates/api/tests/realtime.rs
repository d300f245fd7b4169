mod common;

use common::{app, user, FakeSocket};
use helpdesk_api::{
    tickets::CreateTicket,
    websocket::{
        events::{ClientEvent, MessageDraft, ServerEvent},
        handler::handle_client_event,
    },
    ApiError,
};
use helpdesk_shared::{TicketCategory, UserRole};
use uuid::Uuid;

fn ticket_input(title: &str) -> CreateTicket {
    CreateTicket {
        title: title.into(),
        description: "Card payment rejected at the terminal".into(),
        category: TicketCategory::Cards,
        attachment_ids: Vec::new(),
        context_data: None,
    }
}

#[tokio::test]
async fn test_ticket_room_access_and_presence() {
    let app = app();
    let owner = user(&app, UserRole::Client, "Ann").await;
    let other = user(&app, UserRole::Client, "Bob").await;
    let operator = user(&app, UserRole::Operator, "Olga").await;
    let ticket = app.tickets.create(&owner, ticket_input("Card rejected")).await.unwrap();
    app.tickets.assign(&operator, ticket.id, None).await.unwrap();

    let mut intruder = FakeSocket::connect(&app, &other).await;
    let denied = handle_client_event(
        ClientEvent::JoinTicket { ticket_id: ticket.id },
        &intruder.conn,
        &other,
        &app,
    )
    .await;
    assert!(matches!(denied, Err(ApiError::Forbidden(_))));
    assert!(intruder.drain().is_empty());

    let mut client = FakeSocket::connect(&app, &owner).await;
    handle_client_event(
        ClientEvent::JoinTicket { ticket_id: ticket.id },
        &client.conn,
        &owner,
        &app,
    )
    .await
    .unwrap();
    assert!(client
        .drain()
        .iter()
        .any(|e| matches!(e, ServerEvent::JoinedTicket { ticket_id } if *ticket_id == ticket.id)));

    let mut staff = FakeSocket::connect(&app, &operator).await;
    handle_client_event(
        ClientEvent::JoinTicket { ticket_id: ticket.id },
        &staff.conn,
        &operator,
        &app,
    )
    .await
    .unwrap();

    let seen_by_client = client.drain();
    assert!(seen_by_client.iter().any(
        |e| matches!(e, ServerEvent::UserJoined { user_id, .. } if *user_id == operator.user_id)
    ));
    let seen_by_staff = staff.drain();
    assert!(!seen_by_staff
        .iter()
        .any(|e| matches!(e, ServerEvent::UserJoined { .. })));
    assert!(seen_by_staff
        .iter()
        .any(|e| matches!(e, ServerEvent::JoinedTicket { .. })));
}

#[tokio::test]
async fn test_unknown_ticket_join_is_not_found() {
    let app = app();
    let manager = user(&app, UserRole::Manager, "Max").await;
    let socket = FakeSocket::connect(&app, &manager).await;
    let result = handle_client_event(
        ClientEvent::JoinTicket {
            ticket_id: Uuid::new_v4(),
        },
        &socket.conn,
        &manager,
        &app,
    )
    .await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));
}

#[tokio::test]
async fn test_typing_skips_origin() {
    let app = app();
    let owner = user(&app, UserRole::Client, "Ann").await;
    let manager = user(&app, UserRole::Manager, "Max").await;
    let ticket = app.tickets.create(&owner, ticket_input("Card rejected")).await.unwrap();

    let mut client = FakeSocket::connect(&app, &owner).await;
    let mut staff = FakeSocket::connect(&app, &manager).await;

    // Typing outside the room is refused
    let early = handle_client_event(
        ClientEvent::Typing {
            ticket_id: ticket.id,
            is_typing: true,
        },
        &client.conn,
        &owner,
        &app,
    )
    .await;
    assert!(matches!(early, Err(ApiError::Forbidden(_))));

    for (socket, actor) in [(&client, &owner), (&staff, &manager)] {
        handle_client_event(
            ClientEvent::JoinTicket { ticket_id: ticket.id },
            &socket.conn,
            actor,
            &app,
        )
        .await
        .unwrap();
    }
    client.drain();
    staff.drain();

    handle_client_event(
        ClientEvent::Typing {
            ticket_id: ticket.id,
            is_typing: true,
        },
        &client.conn,
        &owner,
        &app,
    )
    .await
    .unwrap();

    assert!(client.drain().is_empty());
    assert_eq!(staff.names(), vec!["user-typing"]);
}

#[tokio::test]
async fn test_send_message_acks_origin_and_reaches_all_devices() {
    let app = app();
    let owner = user(&app, UserRole::Client, "Ann").await;
    let operator = user(&app, UserRole::Operator, "Olga").await;
    let ticket = app.tickets.create(&owner, ticket_input("Card rejected")).await.unwrap();
    app.tickets.assign(&operator, ticket.id, None).await.unwrap();

    let mut phone = FakeSocket::connect(&app, &owner).await;
    let mut laptop = FakeSocket::connect(&app, &owner).await;
    for socket in [&phone, &laptop] {
        handle_client_event(
            ClientEvent::JoinTicket { ticket_id: ticket.id },
            &socket.conn,
            &owner,
            &app,
        )
        .await
        .unwrap();
    }
    phone.drain();
    laptop.drain();

    handle_client_event(
        ClientEvent::SendMessage {
            ticket_id: ticket.id,
            message: MessageDraft {
                content: "Any news?".into(),
                attachment_ids: Vec::new(),
                is_internal: false,
            },
            temp_id: Some("tmp-1".into()),
        },
        &phone.conn,
        &owner,
        &app,
    )
    .await
    .unwrap();

    let phone_events = phone.drain();
    assert!(phone_events
        .iter()
        .any(|e| matches!(e, ServerEvent::NewMessage { .. })));
    assert!(phone_events.iter().any(
        |e| matches!(e, ServerEvent::MessageSent { temp_id: Some(t), .. } if t == "tmp-1")
    ));
    assert_eq!(laptop.names(), vec!["new-message"]);

    // Creation, assignment and the new message
    assert_eq!(
        app.notifications.unread_count(operator.user_id).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_mark_as_read_sends_single_receipt() {
    let app = app();
    let owner = user(&app, UserRole::Client, "Ann").await;
    let operator = user(&app, UserRole::Operator, "Olga").await;
    let ticket = app.tickets.create(&owner, ticket_input("Card rejected")).await.unwrap();
    app.tickets.assign(&operator, ticket.id, None).await.unwrap();

    let message = app
        .messages
        .send(
            &owner,
            helpdesk_api::messages::SendMessage {
                ticket_id: ticket.id,
                content: "Here is the receipt".into(),
                attachment_ids: Vec::new(),
                is_internal: false,
            },
        )
        .await
        .unwrap();

    let mut author = FakeSocket::connect(&app, &owner).await;
    let reader = FakeSocket::connect(&app, &operator).await;
    author.drain();

    for _ in 0..2 {
        handle_client_event(
            ClientEvent::MarkAsRead {
                message_id: message.id,
            },
            &reader.conn,
            &operator,
            &app,
        )
        .await
        .unwrap();
    }

    let receipts: Vec<_> = author
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::MessageRead {
                message_id,
                read_by,
                ..
            } => Some((message_id, read_by)),
            _ => None,
        })
        .collect();
    assert_eq!(receipts, vec![(message.id, operator.user_id)]);
}

#[tokio::test]
async fn test_disconnect_keeps_sibling_sessions() {
    let app = app();
    let owner = user(&app, UserRole::Client, "Ann").await;
    let first = FakeSocket::connect(&app, &owner).await;
    let second = FakeSocket::connect(&app, &owner).await;

    app.ws_state.disconnect(&first.conn.session_id).await;

    let remaining = app.ws_state.registry.lookup(&owner.user_id).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].session_id, second.conn.session_id);
    assert!(first.conn.is_closed());

    // Teardown is idempotent
    app.ws_state.disconnect(&first.conn.session_id).await;
    assert_eq!(app.ws_state.stats().await.active_connections, 1);
}

#[tokio::test]
async fn test_unread_count_and_ping() {
    let app = app();
    let operator = user(&app, UserRole::Operator, "Olga").await;
    let mut socket = FakeSocket::connect(&app, &operator).await;

    handle_client_event(ClientEvent::GetUnreadCount, &socket.conn, &operator, &app)
        .await
        .unwrap();
    handle_client_event(ClientEvent::Ping, &socket.conn, &operator, &app)
        .await
        .unwrap();
    handle_client_event(ClientEvent::Subscribe, &socket.conn, &operator, &app)
        .await
        .unwrap();

    let events = socket.drain();
    assert!(matches!(events[0], ServerEvent::UnreadCount { count: 0 }));
    assert!(matches!(events[1], ServerEvent::Pong));
    assert!(matches!(events[2], ServerEvent::Subscribed { user_id } if user_id == operator.user_id));
}
