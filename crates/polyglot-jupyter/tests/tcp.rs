use std::time::Duration;

use polyglot_jupyter::transport::tcp::{self, Client};
use polyglot_jupyter::{ChannelKind, ConnectionInfo, JupyterAdapter, Message};
use serde_json::json;

#[path = "helpers.rs"]
mod helpers;
use helpers::{KEY, composite, signer};

fn loopback() -> ConnectionInfo {
    ConnectionInfo {
        transport: "tcp".into(),
        ip: "127.0.0.1".into(),
        shell_port: 0,
        iopub_port: 0,
        stdin_port: 0,
        control_port: 0,
        hb_port: 0,
        signature_scheme: "hmac-sha256".into(),
        key: KEY.into(),
        kernel_name: None,
    }
}

#[tokio::test]
async fn shell_requests_over_tcp_are_routed_back_to_their_sender() {
    let (composite, _, _) = composite();
    let bound = tcp::bind(&loopback()).await.unwrap();
    let info = bound.info.clone();
    tokio::spawn(JupyterAdapter::new(composite.clone(), bound.sockets, signer()).run());

    let mut first = Client::connect(&info, ChannelKind::Shell).await.unwrap();
    let mut second = Client::connect(&info, ChannelKind::Shell).await.unwrap();

    let request = Message::new("kernel_info_request", "tcp-session", json!({})).unwrap();
    second.send(&request.to_frames(&signer()).unwrap()).await.unwrap();
    let reply = Message::from_frames(second.recv().await.unwrap(), &signer()).unwrap();
    assert_eq!(reply.msg_type(), "kernel_info_reply");
    assert_eq!(reply.parent_header.as_ref(), Some(&request.header));
    assert!(reply.identities.is_empty());

    let request = Message::new(
        "execute_request",
        "tcp-session",
        json!({"code": "print over tcp"}),
    )
    .unwrap();
    first.send(&request.to_frames(&signer()).unwrap()).await.unwrap();
    let reply = Message::from_frames(first.recv().await.unwrap(), &signer()).unwrap();
    assert_eq!(reply.msg_type(), "execute_reply");
    assert_eq!(reply.content["status"], json!("ok"));
}

async fn recv_message(client: &mut Client) -> Message {
    let frames = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("a message should arrive")
        .unwrap();
    Message::from_frames(frames, &signer()).unwrap()
}

async fn assert_silent(client: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(300), client.recv()).await;
    assert!(next.is_err(), "unexpected message: {next:?}");
}

#[tokio::test]
async fn each_client_only_sees_its_own_replies_and_prompts() {
    let (composite, _, _) = composite();
    let bound = tcp::bind(&loopback()).await.unwrap();
    let info = bound.info.clone();
    tokio::spawn(JupyterAdapter::new(composite.clone(), bound.sockets, signer()).run());

    let mut alice_shell = Client::connect_as(&info, ChannelKind::Shell, b"alice")
        .await
        .unwrap();
    let mut alice_stdin = Client::connect_as(&info, ChannelKind::Stdin, b"alice")
        .await
        .unwrap();
    let mut bob_shell = Client::connect_as(&info, ChannelKind::Shell, b"bob")
        .await
        .unwrap();
    let mut bob_stdin = Client::connect_as(&info, ChannelKind::Stdin, b"bob")
        .await
        .unwrap();

    let request = Message::new(
        "execute_request",
        "alice-session",
        json!({"code": "input your name?"}),
    )
    .unwrap();
    alice_shell
        .send(&request.to_frames(&signer()).unwrap())
        .await
        .unwrap();

    let prompt = recv_message(&mut alice_stdin).await;
    assert_eq!(prompt.msg_type(), "input_request");
    assert_eq!(prompt.parent_header.as_ref(), Some(&request.header));
    let answer = Message::reply(&prompt, "input_reply", json!({"value": "Ada"})).unwrap();
    alice_stdin
        .send(&answer.to_frames(&signer()).unwrap())
        .await
        .unwrap();

    let reply = recv_message(&mut alice_shell).await;
    assert_eq!(reply.msg_type(), "execute_reply");
    assert_eq!(reply.content["status"], json!("ok"));

    let info_request = Message::new("kernel_info_request", "bob-session", json!({})).unwrap();
    bob_shell
        .send(&info_request.to_frames(&signer()).unwrap())
        .await
        .unwrap();
    let reply = recv_message(&mut bob_shell).await;
    assert_eq!(reply.msg_type(), "kernel_info_reply");
    assert_eq!(reply.parent_header.as_ref(), Some(&info_request.header));

    assert_silent(&mut bob_shell).await;
    assert_silent(&mut bob_stdin).await;
    assert_silent(&mut alice_shell).await;
}

#[tokio::test]
async fn a_second_connection_cannot_take_over_an_identity() {
    let (composite, _, _) = composite();
    let bound = tcp::bind(&loopback()).await.unwrap();
    let info = bound.info.clone();
    tokio::spawn(JupyterAdapter::new(composite.clone(), bound.sockets, signer()).run());

    let mut owner = Client::connect_as(&info, ChannelKind::Shell, b"carol")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut impostor = Client::connect_as(&info, ChannelKind::Shell, b"carol")
        .await
        .unwrap();

    let request = Message::new("kernel_info_request", "s", json!({})).unwrap();
    owner
        .send(&request.to_frames(&signer()).unwrap())
        .await
        .unwrap();
    let reply = recv_message(&mut owner).await;
    assert_eq!(reply.msg_type(), "kernel_info_reply");

    let closed = tokio::time::timeout(Duration::from_secs(5), impostor.recv())
        .await
        .expect("the refused connection should be closed");
    assert!(closed.is_err());
}

#[tokio::test]
async fn serve_fails_when_a_port_is_taken() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let info = ConnectionInfo {
        iopub_port: taken.local_addr().unwrap().port(),
        ..loopback()
    };
    let (composite, _, _) = composite();

    let err = polyglot_jupyter::serve(&info, composite).await.unwrap_err();

    assert!(err.to_string().contains("iopub"), "{err}");
}
