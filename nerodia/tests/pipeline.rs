mod common;

use std::time::Duration;

use common::{document, live, services, test_registry, wait_until};
use nerodia::dispatcher::Dispatcher;
use nerodia::registry::Topology;
use nerodia::{App, Error};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_failing_consumers_do_not_block_others() {
    let (registry, fakes) = test_registry();
    let yaml = "
producers:
  active: scripted
consumers:
  enabled: [broken, flaky, recorder]
  broken:
    panic: true
  flaky:
    fail: true
";
    fakes
        .polls
        .lock()
        .push_back(Ok(vec![live("ch1"), live("ch2")]));

    let app = App::build(&document(yaml), &registry, services()).unwrap();
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(app.run(shutdown.clone()));

    wait_until(|| fakes.seen.lock().len() == 6).await;
    shutdown.cancel();
    run.await.unwrap().unwrap();

    let seen = fakes.seen.lock().clone();
    let expected: Vec<(String, String)> = ["ch1", "ch2"]
        .iter()
        .flat_map(|subject| {
            ["broken", "flaky", "recorder"]
                .iter()
                .map(move |consumer| (consumer.to_string(), subject.to_string()))
        })
        .collect();
    assert_eq!(seen, expected);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_poll_failures_stop_the_app() {
    let (registry, fakes) = test_registry();
    let yaml = "
producers:
  active: scripted
consumers:
  enabled: [recorder]
dispatcher:
  escalation_threshold: 3
";
    {
        let mut polls = fakes.polls.lock();
        for _ in 0..3 {
            polls.push_back(Err(Error::TransientPollFailure("503 from helix".to_string())));
        }
    }

    let app = App::build(&document(yaml), &registry, services()).unwrap();
    let result = app.run(CancellationToken::new()).await;

    match result {
        Err(Error::PollEscalationFailure {
            failures,
            last_error,
        }) => {
            assert_eq!(failures, 3);
            assert_eq!(last_error, "503 from helix");
        }
        other => panic!("expected escalation, got {other:?}"),
    }
    assert!(fakes.seen.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_polls_dispatch_nothing() {
    let (registry, fakes) = test_registry();
    let yaml = "
producers:
  active: scripted
consumers:
  enabled: [recorder]
";
    {
        let mut polls = fakes.polls.lock();
        polls.push_back(Ok(vec![live("ch1")]));
        polls.push_back(Ok(Vec::new()));
        polls.push_back(Ok(Vec::new()));
    }

    let topology = Topology::resolve(&document(yaml), &registry, &services()).unwrap();
    let mut dispatcher = Dispatcher::new(topology.producer, topology.consumers, topology.dispatcher);

    for _ in 0..3 {
        dispatcher.run_cycle().await.unwrap();
    }
    assert_eq!(fakes.seen.lock().len(), 1);
}

#[tokio::test]
async fn test_discord_bot_announces_and_answers_commands() {
    let (registry, fakes) = test_registry();
    let yaml = "
producers:
  active: scripted
consumers:
  enabled: [bot]
  bot:
    token: tok
    announce_channel: 100
modules:
  enabled: [bot.admin]
  bot:
    admin:
      owners: [42]
";
    {
        let mut polls = fakes.polls.lock();
        polls.push_back(Ok(vec![live("ch1")]));
        // The same state again is not announced twice.
        polls.push_back(Ok(vec![live("ch1")]));
    }

    let app = App::build(&document(yaml), &registry, services()).unwrap();
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(app.run(shutdown.clone()));

    let transport = fakes.transport.clone();
    wait_until(|| transport.sent_to("100").len() == 1).await;
    let announcement = &transport.sent_to("100")[0];
    assert_eq!(
        announcement.embeds[0].title.as_deref(),
        Some("ch1 is now live!")
    );

    wait_until(|| transport.is_subscribed()).await;
    transport.push_message("42", "!ping");
    wait_until(|| transport.sent_to("chat").len() == 1).await;

    transport.push_message("7", "<@999> ping");
    wait_until(|| transport.sent_to("chat").len() == 2).await;

    transport.push_message("7", "!help");
    wait_until(|| transport.sent_to("chat").len() == 3).await;

    // Unknown commands and plain chatter get no reply.
    transport.push_message("7", "!dance");
    transport.push_message("7", "hello there");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut replies: Vec<String> = transport
        .sent_to("chat")
        .into_iter()
        .filter_map(|message| message.content)
        .collect();
    replies.sort();
    assert_eq!(replies.len(), 3);
    assert!(replies.iter().any(|r| r == "pong"));
    assert!(
        replies
            .iter()
            .any(|r| r == "You are not allowed to use this command.")
    );
    let help = replies
        .iter()
        .find(|r| r.starts_with("Available commands:"))
        .unwrap();
    for command in ["help", "loglevel", "ping", "tracked", "uptime"] {
        assert!(help.contains(&format!("`{command}`")), "{help}");
    }

    // Give the second poll time to run before shutting down.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(transport.sent_to("100").len(), 1);

    shutdown.cancel();
    run.await.unwrap().unwrap();
}
