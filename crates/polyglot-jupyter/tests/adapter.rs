use std::time::Duration;

use polyglot_jupyter::content::ExecuteRequest;
use polyglot_jupyter::{JupyterError, Signer};
use polyglot_kernel::{CommandKind, KernelCommand};
use serde_json::json;

#[path = "helpers.rs"]
mod helpers;
use helpers::{composite, content_of, is_child_of, is_status, start, types};

#[tokio::test]
async fn kernel_info_is_answered_between_busy_and_idle() {
    let (composite, _, _) = composite();
    let (mut frontend, _task) = start(&composite);

    let request = frontend.send_shell("kernel_info_request", json!({}));
    let reply = frontend.shell_reply().await;
    let iopub = frontend.iopub_for(&request).await;

    assert_eq!(reply.msg_type(), "kernel_info_reply");
    assert!(is_child_of(&reply, &request));
    assert_eq!(reply.identities, vec![b"frontend".to_vec()]);
    assert_eq!(reply.content["protocol_version"], json!("5.3"));
    assert_eq!(reply.content["language_info"]["name"], json!("python"));
    assert_eq!(reply.content["language_info"]["file_extension"], json!(".py"));
    assert_eq!(types(&iopub), ["status:busy", "status:idle"]);
}

#[tokio::test]
async fn execute_publishes_input_and_result_then_replies_ok() {
    let (composite, script, _) = composite();
    let (mut frontend, _task) = start(&composite);

    let request = frontend.execute("42");
    let reply = frontend.shell_reply().await;
    let iopub = frontend.iopub_for(&request).await;

    assert_eq!(reply.msg_type(), "execute_reply");
    assert_eq!(reply.content["status"], json!("ok"));
    assert_eq!(reply.content["execution_count"], json!(1));
    assert_eq!(
        types(&iopub),
        ["status:busy", "execute_input", "execute_result", "status:idle"]
    );
    assert_eq!(content_of(&iopub, "execute_input")["code"], json!("42"));
    let result = content_of(&iopub, "execute_result");
    assert_eq!(result["execution_count"], json!(1));
    assert_eq!(result["data"]["text/plain"], json!("42"));
    assert_eq!(result["data"]["application/json"], json!(42));
    assert_eq!(script.seen(), vec!["42"]);
}

#[tokio::test]
async fn outputs_map_to_streams_and_display_data() {
    let (composite, _, _) = composite();
    let (mut frontend, _task) = start(&composite);

    let request = frontend.execute("print hello\nwarn careful\ndisplay <b>bold</b>");
    let reply = frontend.shell_reply().await;
    let iopub = frontend.iopub_for(&request).await;

    assert_eq!(reply.content["status"], json!("ok"));
    let streams: Vec<_> = iopub
        .iter()
        .filter(|m| m.msg_type() == "stream")
        .map(|m| (m.content["name"].clone(), m.content["text"].clone()))
        .collect();
    assert_eq!(
        streams,
        vec![
            (json!("stdout"), json!("hello")),
            (json!("stderr"), json!("careful")),
        ]
    );
    let stream_topics: Vec<_> = iopub
        .iter()
        .filter(|m| m.msg_type() == "stream")
        .map(|m| m.identities[0].clone())
        .collect();
    assert_eq!(stream_topics, vec![b"stream.stdout".to_vec(), b"stream.stderr".to_vec()]);

    let display = content_of(&iopub, "display_data");
    assert_eq!(display["data"]["text/html"], json!("<b>bold</b>"));
    assert!(display["transient"]["display_id"].is_string());
}

#[tokio::test]
async fn failures_publish_an_error_and_reply_with_error_status() {
    let (composite, _, _) = composite();
    let (mut frontend, _task) = start(&composite);

    let request = frontend.execute("fail boom");
    let reply = frontend.shell_reply().await;
    let iopub = frontend.iopub_for(&request).await;

    assert_eq!(reply.content["status"], json!("error"));
    assert_eq!(reply.content["ename"], json!("Unhandled exception"));
    assert_eq!(
        types(&iopub),
        ["status:busy", "execute_input", "error", "status:idle"]
    );
    let error = content_of(&iopub, "error");
    assert!(error["evalue"].as_str().unwrap().contains("boom"));
    assert_eq!(error["traceback"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn silent_requests_produce_no_output_and_keep_the_count() {
    let (composite, _, _) = composite();
    let (mut frontend, _task) = start(&composite);

    let silent = frontend.send_shell(
        "execute_request",
        ExecuteRequest {
            silent: true,
            ..ExecuteRequest::new("print hidden")
        },
    );
    let reply = frontend.shell_reply().await;
    let iopub = frontend.iopub_for(&silent).await;
    assert_eq!(reply.content["status"], json!("ok"));
    assert_eq!(reply.content["execution_count"], json!(0));
    assert_eq!(types(&iopub), ["status:busy", "status:idle"]);

    frontend.execute("1");
    let reply = frontend.shell_reply().await;
    assert_eq!(reply.content["execution_count"], json!(1));
}

#[tokio::test]
async fn every_shell_message_gets_one_busy_and_one_idle() {
    let (composite, _, _) = composite();
    let (mut frontend, _task) = start(&composite);

    let requests = vec![
        frontend.execute("#!script\n1"),
        frontend.execute("#!other\n2"),
        frontend.execute("fail nope"),
        frontend.send_shell("is_complete_request", json!({"code": "x {"})),
        frontend.send_shell("comm_info_request", json!({})),
    ];

    let mut replies = Vec::new();
    for _ in 0..4 {
        replies.push(frontend.shell_reply().await);
    }
    let mut statuses = Vec::new();
    while statuses.len() < requests.len() * 2 {
        let message = frontend.iopub().await;
        if message.msg_type() == "status" {
            statuses.push(message);
        }
    }

    for request in &requests {
        let mine: Vec<_> = statuses.iter().filter(|m| is_child_of(m, request)).collect();
        assert_eq!(mine.len(), 2, "{}", request.msg_type());
        assert!(is_status(mine[0], "busy"));
        assert!(is_status(mine[1], "idle"));
    }
    let reply_types: Vec<_> = replies.iter().map(|r| r.msg_type().to_string()).collect();
    assert_eq!(
        reply_types,
        ["execute_reply", "execute_reply", "execute_reply", "is_complete_reply"]
    );
}

#[tokio::test]
async fn control_interrupt_cancels_the_running_cell_and_the_queue_moves_on() {
    let (composite, script, _) = composite();
    let (mut frontend, _task) = start(&composite);

    let long = frontend.execute("sleep 60000");
    let next = frontend.execute("7");
    script.wait_for("sleep 60000").await;

    let interrupt = frontend.send_control("interrupt_request", json!({}));
    let interrupt_reply = frontend.control_reply().await;
    assert_eq!(interrupt_reply.msg_type(), "interrupt_reply");
    assert!(is_child_of(&interrupt_reply, &interrupt));
    assert_eq!(interrupt_reply.content["status"], json!("ok"));

    let first = frontend.shell_reply().await;
    assert!(is_child_of(&first, &long));
    assert_eq!(first.content["status"], json!("aborted"));

    let second = frontend.shell_reply().await;
    assert!(is_child_of(&second, &next));
    assert_eq!(second.content["status"], json!("ok"));
    assert_eq!(script.seen(), vec!["sleep 60000", "7"]);
}

#[tokio::test]
async fn is_complete_runs_nothing() {
    let (composite, script, _) = composite();
    let (mut frontend, _task) = start(&composite);

    frontend.send_shell("is_complete_request", json!({"code": "if x {"}));
    let reply = frontend.shell_reply().await;
    assert_eq!(reply.content["status"], json!("incomplete"));

    frontend.send_shell("is_complete_request", json!({"code": "print hi"}));
    let reply = frontend.shell_reply().await;
    assert_eq!(reply.content["status"], json!("complete"));

    assert!(script.seen().is_empty());
}

#[tokio::test]
async fn completions_carry_the_replacement_range() {
    let (composite, _, _) = composite();
    let (mut frontend, _task) = start(&composite);

    frontend.send_shell("complete_request", json!({"code": "x = alp", "cursor_pos": 7}));
    let reply = frontend.shell_reply().await;

    assert_eq!(reply.msg_type(), "complete_reply");
    assert_eq!(reply.content["matches"], json!(["alpha", "alphabet"]));
    assert_eq!(reply.content["cursor_start"], json!(4));
    assert_eq!(reply.content["cursor_end"], json!(7));
    assert_eq!(reply.content["status"], json!("ok"));
}

#[tokio::test]
async fn input_prompts_go_to_the_frontend_when_stdin_is_allowed() {
    let (composite, _, _) = composite();
    let (mut frontend, _task) = start(&composite);

    let request = frontend.execute("input your name?");
    let prompt = frontend.stdin_request().await;
    assert_eq!(prompt.msg_type(), "input_request");
    assert!(is_child_of(&prompt, &request));
    assert_eq!(prompt.content["prompt"], json!("your name?"));
    frontend.answer_stdin(&prompt, "Ada");

    let reply = frontend.shell_reply().await;
    let iopub = frontend.iopub_for(&request).await;
    assert_eq!(reply.content["status"], json!("ok"));
    assert_eq!(
        content_of(&iopub, "execute_result")["data"]["text/plain"],
        json!("Ada")
    );

    frontend.send_shell(
        "execute_request",
        ExecuteRequest {
            allow_stdin: false,
            ..ExecuteRequest::new("input again?")
        },
    );
    let reply = frontend.shell_reply().await;
    assert_eq!(reply.content["status"], json!("error"));
    assert!(
        reply.content["evalue"]
            .as_str()
            .unwrap()
            .contains("input is not available")
    );
}

#[tokio::test]
async fn a_bad_signature_stops_the_adapter() {
    let (composite, _, _) = composite();
    let (mut frontend, task) = start(&composite);

    let forged = frontend.request("execute_request", ExecuteRequest::new("1"));
    let frames = forged
        .to_frames(&Signer::new("hmac-sha256", "wrong key").unwrap())
        .unwrap();
    frontend.sockets.shell.outbound.send(frames).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Err(JupyterError::InvalidSignature(_))));
    assert!(frontend.sockets.iopub.try_recv().is_err());
}

#[tokio::test]
async fn shutdown_replies_and_stops_the_adapter() {
    let (composite, _, _) = composite();
    let (mut frontend, task) = start(&composite);

    let request = frontend.send_control("shutdown_request", json!({"restart": false}));
    let reply = frontend.control_reply().await;
    assert_eq!(reply.msg_type(), "shutdown_reply");
    assert!(is_child_of(&reply, &request));
    assert_eq!(reply.content["restart"], json!(false));

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_ok());
    assert!(composite.quit_signal().is_cancelled());
}

#[tokio::test]
async fn quit_from_the_kernel_side_also_stops_the_adapter() {
    let (composite, _, _) = composite();
    let (_frontend, task) = start(&composite);

    composite.send(KernelCommand::new(CommandKind::Quit)).await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_ok());
}
