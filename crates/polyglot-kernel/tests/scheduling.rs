use std::time::Duration;

use polyglot_kernel::{
    CommandKind, CommandOutcome, CompositeKernel, EventKind, Kernel, KernelCommand,
};

#[path = "helpers.rs"]
mod helpers;
use helpers::{Arithmetic, composite_with_csharp, submit};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn commands_on_one_kernel_run_in_submission_order() {
    let (composite, language) = composite_with_csharp();

    let mut handles = Vec::new();
    for code in ["sleep 100", "x = 1", "x + 1", "print done"] {
        let composite = composite.clone();
        let command = submit(code);
        handles.push(tokio::spawn(async move { composite.send(command).await }));
        settle().await;
    }
    for handle in handles {
        assert!(handle.await.unwrap().succeeded());
    }
    assert_eq!(
        language.executed(),
        vec!["sleep 100", "x = 1", "x + 1", "print done"]
    );
}

#[tokio::test]
async fn send_queues_before_the_result_is_awaited() {
    let (composite, language) = composite_with_csharp();

    let first = composite.send(submit("sleep 30"));
    let second = composite.send(submit("x = 5"));
    let third = composite.send(submit("x + 1"));

    let third = third.await;
    assert!(third.succeeded());
    let value = third.find(|kind| match kind {
        EventKind::ReturnValueProduced { value, .. } => value.clone(),
        _ => None,
    });
    assert_eq!(value, Some(serde_json::json!(6)));
    assert!(first.await.succeeded());
    assert!(second.await.succeeded());
    assert_eq!(language.executed(), vec!["sleep 30", "x = 5", "x + 1"]);
}

#[tokio::test]
async fn kernel_switching_submissions_queue_before_the_result_is_awaited() {
    let (composite, language) = composite_with_csharp();

    let first = composite.send(submit("#!csharp\nsleep 30\nx = 5"));
    let second = composite.send(submit("x + 1"));

    let (first, second) = futures::join!(first, second);
    assert!(first.succeeded());
    assert!(second.succeeded());
    let value = second.find(|kind| match kind {
        EventKind::ReturnValueProduced { value, .. } => value.clone(),
        _ => None,
    });
    assert_eq!(value, Some(serde_json::json!(6)));
    assert_eq!(language.executed(), vec!["sleep 30\nx = 5", "x + 1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kernel_switching_submissions_hold_every_kernel_they_use() {
    let composite = CompositeKernel::new("polyglot");
    let csharp = Arithmetic::new();
    let fsharp = Arithmetic::new();
    composite
        .add(Kernel::new("csharp", csharp.clone()), &[])
        .unwrap();
    composite
        .add(Kernel::new("fsharp", fsharp.clone()), &[])
        .unwrap();

    let first = composite.send(submit("#!csharp\nsleep 30\n#!fsharp\ny = 2"));
    let second = composite.send(submit("y + 1").target("fsharp"));

    let (first, second) = futures::join!(first, second);
    assert!(first.succeeded());
    let value = second.find(|kind| match kind {
        EventKind::ReturnValueProduced { value, .. } => value.clone(),
        _ => None,
    });
    assert_eq!(value, Some(serde_json::json!(3)));
    assert_eq!(csharp.executed(), vec!["sleep 30"]);
    assert_eq!(fsharp.executed(), vec!["y = 2", "y + 1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_a_queued_kernel_switching_submission() {
    let (composite, language) = composite_with_csharp();

    let running_command = submit("sleep 10000");
    let running_token = running_command.token().to_string();
    let running = composite.send(running_command);
    settle().await;
    let queued_command = submit("#!csharp\nx = 1");
    let queued_token = queued_command.token().to_string();
    let queued = composite.send(queued_command);

    let cancel = composite
        .send(KernelCommand::new(CommandKind::Cancel {
            command_token: Some(queued_token),
        }))
        .await;
    assert!(cancel.succeeded());
    let queued = tokio::time::timeout(Duration::from_secs(2), queued)
        .await
        .expect("cancelled submission should finish without waiting its turn");
    assert_eq!(queued.outcome(), CommandOutcome::Cancelled);

    composite
        .send(KernelCommand::new(CommandKind::Cancel {
            command_token: Some(running_token),
        }))
        .await;
    assert_eq!(running.await.outcome(), CommandOutcome::Cancelled);
    assert_eq!(language.executed(), vec!["sleep 10000"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminal_event_precedes_next_handler() {
    let (composite, _language) = composite_with_csharp();
    let mut stream = composite.subscribe();

    let first = submit("sleep 50");
    let second = submit("1+1");
    let (first_token, second_token) = (first.token().to_string(), second.token().to_string());

    let a = tokio::spawn({
        let composite = composite.clone();
        async move { composite.send(first).await }
    });
    settle().await;
    let b = tokio::spawn({
        let composite = composite.clone();
        async move { composite.send(second).await }
    });
    a.await.unwrap();
    b.await.unwrap();

    let mut order = Vec::new();
    while let Ok(event) = stream.try_recv() {
        order.push((event.token().to_string(), event.kind.name()));
    }
    let first_done = order
        .iter()
        .position(|(t, n)| *t == first_token && *n == "CommandSucceeded")
        .unwrap();
    let second_start = order
        .iter()
        .position(|(t, _)| *t == second_token)
        .unwrap();
    assert!(first_done < second_start, "{order:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_stops_running_command_and_queue_continues() {
    let (composite, language) = composite_with_csharp();

    let long = submit("sleep 10000");
    let long_token = long.token().to_string();
    let running = tokio::spawn({
        let composite = composite.clone();
        async move { composite.send(long).await }
    });
    settle().await;
    let queued = tokio::spawn({
        let composite = composite.clone();
        async move { composite.send(submit("1+1")).await }
    });
    settle().await;

    let cancel = composite
        .send(KernelCommand::new(CommandKind::Cancel {
            command_token: Some(long_token),
        }))
        .await;
    assert!(cancel.succeeded());

    let running = tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("cancelled command should finish promptly")
        .unwrap();
    assert_eq!(running.outcome(), CommandOutcome::Cancelled);
    assert!(!running.event_names().contains(&"CommandFailed"));

    let queued = queued.await.unwrap();
    assert!(queued.succeeded());
    assert_eq!(language.executed(), vec!["sleep 10000", "1+1"]);
}

#[tokio::test]
async fn cancel_with_nothing_running_is_a_no_op() {
    let (composite, _language) = composite_with_csharp();
    let result = composite
        .send(KernelCommand::new(CommandKind::Cancel {
            command_token: None,
        }))
        .await;
    assert!(result.succeeded());
    assert_eq!(result.event_names(), vec!["CommandSucceeded"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_naming_an_unknown_token_leaves_running_work_alone() {
    let (composite, language) = composite_with_csharp();

    let running = tokio::spawn({
        let composite = composite.clone();
        async move { composite.send(submit("sleep 100\nx = 3")).await }
    });
    settle().await;

    let cancel = composite
        .send(KernelCommand::new(CommandKind::Cancel {
            command_token: Some("no-such-command".into()),
        }))
        .await;
    assert!(cancel.succeeded());
    assert_eq!(cancel.event_names(), vec!["CommandSucceeded"]);

    let running = running.await.unwrap();
    assert!(running.succeeded());
    assert_eq!(language.executed(), vec!["sleep 100\nx = 3"]);
    assert_eq!(language.variable("x"), Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_kernels_run_concurrently() {
    let composite = CompositeKernel::new("polyglot");
    composite
        .add(Kernel::new("csharp", Arithmetic::new()), &[])
        .unwrap();
    composite
        .add(Kernel::new("fsharp", Arithmetic::new()), &[])
        .unwrap();

    let slow = tokio::spawn({
        let composite = composite.clone();
        async move { composite.send(submit("sleep 300").target("csharp")).await }
    });
    settle().await;
    let fast = tokio::time::timeout(
        Duration::from_millis(200),
        composite.send(submit("1+2").target("fsharp")),
    )
    .await
    .expect("fsharp should not wait behind csharp");
    assert!(fast.succeeded());
    assert!(slow.await.unwrap().succeeded());
}

#[tokio::test]
async fn quit_signals_the_host() {
    let (composite, _language) = composite_with_csharp();
    let quit = composite.quit_signal();
    assert!(!quit.is_cancelled());
    let result = composite.send(KernelCommand::new(CommandKind::Quit)).await;
    assert!(result.succeeded());
    assert!(quit.is_cancelled());
}

#[tokio::test]
async fn input_requests_fail_without_a_provider() {
    let (composite, _language) = composite_with_csharp();
    let result = composite
        .send(KernelCommand::new(CommandKind::RequestInput {
            prompt: "name?".into(),
            is_password: false,
        }))
        .await;
    assert!(matches!(result.outcome(), CommandOutcome::Failed(m) if m.contains("input")));
    assert!(
        result
            .find(|k| matches!(k, EventKind::InputProduced { .. }).then_some(()))
            .is_none()
    );
}
