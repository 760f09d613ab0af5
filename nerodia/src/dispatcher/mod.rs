//! Event dispatcher.
//!
//! A single loop drives the pipeline:
//!
//! ```text
//! Idle --tick--> Polling --events--> Dispatching --done--> Idle
//!   \--stop / escalation------------------------------------> Shutdown
//! ```
//!
//! Polls and fan-out run sequentially, so every event of one cycle reaches
//! every consumer before the next poll starts. Each consumer call is isolated:
//! an error, panic or timeout is recorded and the next consumer still runs.

mod handle;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use handle::DispatcherHandle;

use crate::config::DispatcherConfig;
use crate::consumer::NotificationConsumer;
use crate::panic_hook::panic_message;
use crate::producer::{StatusEvent, StatusProducer};
use crate::{Error, Result};

/// Where the dispatch loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Polling,
    Dispatching,
    Shutdown,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Dispatching => "dispatching",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Outcome of delivering one event to every consumer.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Consumers whose `on_event` returned successfully, in call order.
    pub delivered: Vec<String>,
    /// Consumers that failed, in call order.
    pub failed: Vec<(String, Error)>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of one poll/dispatch cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub events: usize,
    pub delivery_failures: usize,
    /// Set when the poll failed below the escalation threshold.
    pub poll_error: Option<String>,
}

/// Single producer → N consumers fan-out.
pub struct Dispatcher {
    producer: Box<dyn StatusProducer>,
    consumers: Vec<Arc<dyn NotificationConsumer>>,
    config: DispatcherConfig,
    consecutive_failures: u32,
    state_tx: watch::Sender<DispatcherState>,
}

impl Dispatcher {
    /// `consumers` are called in the given order for every event.
    pub fn new(
        producer: Box<dyn StatusProducer>,
        consumers: Vec<Arc<dyn NotificationConsumer>>,
        config: DispatcherConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(DispatcherState::Idle);
        Self {
            producer,
            consumers,
            config,
            consecutive_failures: 0,
            state_tx,
        }
    }

    pub fn state(&self) -> DispatcherState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DispatcherState> {
        self.state_tx.subscribe()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn set_state(&self, state: DispatcherState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Dispatcher state changed");
        }
    }

    /// Ask the producer for changes.
    ///
    /// Failures and timeouts below the escalation threshold come back as
    /// `TransientPollFailure`; reaching the threshold yields
    /// `PollEscalationFailure`. Fatal producer errors are returned as is.
    /// Success resets the failure count.
    pub async fn poll_once(&mut self) -> Result<Vec<StatusEvent>> {
        self.set_state(DispatcherState::Polling);

        let timeout = self.config.poll_timeout();
        let outcome = match tokio::time::timeout(timeout, self.producer.detect_changes()).await {
            Ok(result) => result,
            Err(_) => Err(Error::TransientPollFailure(format!(
                "poll timed out after {}s",
                timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(events) => {
                if self.consecutive_failures > 0 {
                    info!(
                        producer = %self.producer.name(),
                        failures = self.consecutive_failures,
                        "Producer recovered"
                    );
                }
                self.consecutive_failures = 0;
                Ok(events)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.consecutive_failures += 1;
                let last_error = match e {
                    Error::TransientPollFailure(message) => message,
                    other => other.to_string(),
                };

                if self.consecutive_failures >= self.config.escalation_threshold {
                    return Err(Error::PollEscalationFailure {
                        failures: self.consecutive_failures,
                        last_error,
                    });
                }

                warn!(
                    producer = %self.producer.name(),
                    failures = self.consecutive_failures,
                    threshold = self.config.escalation_threshold,
                    error = %last_error,
                    "Poll failed, retrying next tick"
                );
                Err(Error::TransientPollFailure(last_error))
            }
        }
    }

    /// Deliver `event` to every consumer in order.
    pub async fn dispatch(&self, event: &StatusEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        for consumer in &self.consumers {
            let name = consumer.name().to_string();
            match self.deliver(consumer.as_ref(), event).await {
                Ok(()) => report.delivered.push(name),
                Err(e) => {
                    warn!(
                        consumer = %name,
                        subject = %event.subject,
                        state = %event.new_state,
                        error = %e,
                        "Delivery failed"
                    );
                    report.failed.push((name, e));
                }
            }
        }

        report
    }

    async fn deliver(&self, consumer: &dyn NotificationConsumer, event: &StatusEvent) -> Result<()> {
        let timeout = self.config.delivery_timeout();
        let call = AssertUnwindSafe(consumer.on_event(event)).catch_unwind();

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e @ Error::ConsumerDeliveryFailure { .. }))) => Err(e),
            Ok(Ok(Err(e))) => Err(Error::delivery(consumer.name(), e.to_string())),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref()).unwrap_or_else(|| "unknown panic".to_string());
                Err(Error::delivery(consumer.name(), format!("panicked: {message}")))
            }
            Err(_) => Err(Error::delivery(
                consumer.name(),
                format!("timed out after {}s", timeout.as_secs()),
            )),
        }
    }

    /// One `Polling → Dispatching → Idle` pass.
    ///
    /// Only escalations and fatal producer errors are returned.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let events = match self.poll_once().await {
            Ok(events) => events,
            Err(Error::TransientPollFailure(message)) => {
                self.set_state(DispatcherState::Idle);
                return Ok(CycleReport {
                    poll_error: Some(message),
                    ..Default::default()
                });
            }
            Err(e) => return Err(e),
        };

        let mut report = CycleReport {
            events: events.len(),
            ..Default::default()
        };

        if !events.is_empty() {
            self.set_state(DispatcherState::Dispatching);
            for event in &events {
                info!(
                    subject = %event.subject,
                    state = %event.new_state,
                    "{}",
                    event.description()
                );
                let outcome = self.dispatch(event).await;
                report.delivery_failures += outcome.failed.len();
            }
        }

        self.set_state(DispatcherState::Idle);
        Ok(report)
    }

    /// Run cycles on the producer's interval until `shutdown` is cancelled or
    /// the producer escalates.
    ///
    /// Cancellation is only observed while idle, so a dispatch in progress
    /// always finishes first.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let interval = self.producer.interval().max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            producer = %self.producer.name(),
            consumers = self.consumers.len(),
            interval_secs = interval.as_secs(),
            "Dispatcher started"
        );

        loop {
            self.set_state(DispatcherState::Idle);

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Dispatcher stopping");
                    break;
                }

                _ = ticker.tick() => {}
            }

            if let Err(e) = self.run_cycle().await {
                error!(producer = %self.producer.name(), error = %e, "Dispatcher giving up");
                self.set_state(DispatcherState::Shutdown);
                return Err(e);
            }
        }

        self.set_state(DispatcherState::Shutdown);
        Ok(())
    }

    /// Spawn [`run`](Self::run) and return its control handle.
    pub fn start(self) -> DispatcherHandle {
        let shutdown = CancellationToken::new();
        let state = self.subscribe_state();
        let task = tokio::spawn(self.run(shutdown.clone()));
        DispatcherHandle::new(shutdown, state, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{CommandTable, ConsumerContext, DeliveryLog, StartTime};
    use crate::producer::StreamStatus;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        polls: VecDeque<Result<Vec<StatusEvent>>>,
    }

    #[async_trait]
    impl StatusProducer for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn detect_changes(&mut self) -> Result<Vec<StatusEvent>> {
            self.polls.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    enum Behavior {
        Ok,
        Fail,
        Panic,
        Hang,
    }

    struct Recorder {
        name: String,
        behavior: Behavior,
        seen: Arc<Mutex<Vec<(String, StatusEvent)>>>,
    }

    #[async_trait]
    impl NotificationConsumer for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn context(&self) -> ConsumerContext {
            ConsumerContext {
                name: self.name.clone(),
                deliveries: DeliveryLog::new(),
                started_at: StartTime::new(),
            }
        }

        fn install_commands(&self, _table: CommandTable) -> Result<()> {
            Ok(())
        }

        async fn on_event(&self, event: &StatusEvent) -> Result<()> {
            self.seen.lock().push((self.name.clone(), event.clone()));
            match self.behavior {
                Behavior::Ok => Ok(()),
                Behavior::Fail => Err(Error::Other("send failed".to_string())),
                Behavior::Panic => panic!("consumer exploded"),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        }
    }

    fn consumers(
        behaviors: Vec<(&str, Behavior)>,
    ) -> (Vec<Arc<dyn NotificationConsumer>>, Arc<Mutex<Vec<(String, StatusEvent)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let consumers = behaviors
            .into_iter()
            .map(|(name, behavior)| {
                Arc::new(Recorder {
                    name: name.to_string(),
                    behavior,
                    seen: seen.clone(),
                }) as Arc<dyn NotificationConsumer>
            })
            .collect();
        (consumers, seen)
    }

    fn config(threshold: u32) -> DispatcherConfig {
        DispatcherConfig {
            escalation_threshold: threshold,
            delivery_timeout_secs: 1,
            ..Default::default()
        }
    }

    fn live(subject: &str) -> StatusEvent {
        StatusEvent::new(subject, Some(StreamStatus::Offline), StreamStatus::Live)
    }

    #[tokio::test]
    async fn test_failure_is_isolated_between_consumers() {
        let (consumers, seen) = consumers(vec![("a", Behavior::Fail), ("b", Behavior::Ok)]);
        let producer = Box::new(Scripted {
            polls: VecDeque::new(),
        });
        let dispatcher = Dispatcher::new(producer, consumers, config(3));

        let event = live("ch1");
        let report = dispatcher.dispatch(&event).await;

        assert_eq!(report.delivered, vec!["b"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a");
        assert!(matches!(
            report.failed[0].1,
            Error::ConsumerDeliveryFailure { ref consumer, .. } if consumer == "a"
        ));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "a");
        assert_eq!(seen[1].0, "b");
        assert_eq!(seen[0].1, event);
        assert_eq!(seen[1].1, event);
    }

    #[tokio::test]
    async fn test_panics_are_contained() {
        let (consumers, seen) = consumers(vec![("boom", Behavior::Panic), ("b", Behavior::Ok)]);
        let producer = Box::new(Scripted {
            polls: VecDeque::new(),
        });
        let dispatcher = Dispatcher::new(producer, consumers, config(3));

        let report = dispatcher.dispatch(&live("ch1")).await;

        assert_eq!(report.delivered, vec!["b"]);
        match &report.failed[0].1 {
            Error::ConsumerDeliveryFailure { consumer, reason } => {
                assert_eq!(consumer, "boom");
                assert!(reason.contains("consumer exploded"));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_consumer_times_out() {
        let (consumers, _seen) = consumers(vec![("slow", Behavior::Hang), ("b", Behavior::Ok)]);
        let producer = Box::new(Scripted {
            polls: VecDeque::new(),
        });
        let dispatcher = Dispatcher::new(producer, consumers, config(3));

        let report = dispatcher.dispatch(&live("ch1")).await;

        assert_eq!(report.delivered, vec!["b"]);
        match &report.failed[0].1 {
            Error::ConsumerDeliveryFailure { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_escalation_after_threshold() {
        let failing = || Err(Error::TransientPollFailure("connection refused".to_string()));
        let producer = Box::new(Scripted {
            polls: VecDeque::from(vec![failing(), failing(), failing()]),
        });
        let (consumers, seen) = consumers(vec![("a", Behavior::Ok)]);
        let mut dispatcher = Dispatcher::new(producer, consumers, config(3));

        let first = dispatcher.run_cycle().await.unwrap();
        assert_eq!(first.poll_error.as_deref(), Some("connection refused"));
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        dispatcher.run_cycle().await.unwrap();
        assert_eq!(dispatcher.consecutive_failures(), 2);

        match dispatcher.run_cycle().await {
            Err(Error::PollEscalationFailure {
                failures,
                last_error,
            }) => {
                assert_eq!(failures, 3);
                assert_eq!(last_error, "connection refused");
            }
            other => panic!("expected escalation, got {other:?}"),
        }
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_poll_error_stops_at_once() {
        let producer = Box::new(Scripted {
            polls: VecDeque::from(vec![Err(Error::invalid_config(
                "producers.poller",
                "Twitch rejected the credentials",
            ))]),
        });
        let (consumers, seen) = consumers(vec![("a", Behavior::Ok)]);
        let mut dispatcher = Dispatcher::new(producer, consumers, config(3));

        match dispatcher.run_cycle().await {
            Err(Error::InvalidConfig { key, .. }) => assert_eq!(key, "producers.poller"),
            other => panic!("expected a configuration error, got {other:?}"),
        }
        assert_eq!(dispatcher.consecutive_failures(), 0);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let producer = Box::new(Scripted {
            polls: VecDeque::from(vec![
                Err(Error::Other("flaky".to_string())),
                Err(Error::Other("flaky".to_string())),
                Ok(vec![live("ch1")]),
                Err(Error::Other("flaky".to_string())),
                Err(Error::Other("flaky".to_string())),
            ]),
        });
        let (consumers, seen) = consumers(vec![("a", Behavior::Ok)]);
        let mut dispatcher = Dispatcher::new(producer, consumers, config(3));

        for _ in 0..5 {
            dispatcher.run_cycle().await.unwrap();
        }
        assert_eq!(dispatcher.consecutive_failures(), 2);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_delivers_events_in_order() {
        let producer = Box::new(Scripted {
            polls: VecDeque::from(vec![Ok(vec![live("ch1"), live("ch2")])]),
        });
        let (consumers, seen) = consumers(vec![("a", Behavior::Ok), ("b", Behavior::Fail)]);
        let mut dispatcher = Dispatcher::new(producer, consumers, config(3));

        let report = dispatcher.run_cycle().await.unwrap();
        assert_eq!(report.events, 2);
        assert_eq!(report.delivery_failures, 2);

        let order: Vec<(String, String)> = seen
            .lock()
            .iter()
            .map(|(consumer, event)| (consumer.clone(), event.subject.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a".to_string(), "ch1".to_string()),
                ("b".to_string(), "ch1".to_string()),
                ("a".to_string(), "ch2".to_string()),
                ("b".to_string(), "ch2".to_string()),
            ]
        );

        // Unchanged snapshot: nothing new is dispatched.
        let report = dispatcher.run_cycle().await.unwrap();
        assert_eq!(report.events, 0);
        assert_eq!(seen.lock().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_escalates_to_shutdown() {
        let producer = Box::new(Scripted {
            polls: VecDeque::from(vec![
                Err(Error::Other("down".to_string())),
                Err(Error::Other("down".to_string())),
            ]),
        });
        let (consumers, _) = consumers(vec![]);
        let dispatcher = Dispatcher::new(producer, consumers, config(2));
        let handle = dispatcher.start();

        let result = handle.join().await;
        assert!(matches!(
            result,
            Err(Error::PollEscalationFailure { failures: 2, .. })
        ));
    }

    struct Hanging;

    #[async_trait]
    impl StatusProducer for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn detect_changes(&mut self) -> Result<Vec<StatusEvent>> {
            std::future::pending::<()>().await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_poll_times_out_and_escalates() {
        let config = DispatcherConfig {
            poll_timeout_secs: 1,
            escalation_threshold: 2,
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(Box::new(Hanging), Vec::new(), config);

        let first = dispatcher.run_cycle().await.unwrap();
        assert!(first.poll_error.unwrap().contains("timed out"));
        assert_eq!(dispatcher.consecutive_failures(), 1);

        match dispatcher.run_cycle().await {
            Err(Error::PollEscalationFailure {
                failures,
                last_error,
            }) => {
                assert_eq!(failures, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    struct Slow {
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NotificationConsumer for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn context(&self) -> ConsumerContext {
            ConsumerContext {
                name: "slow".to_string(),
                deliveries: DeliveryLog::new(),
                started_at: StartTime::new(),
            }
        }

        fn install_commands(&self, _table: CommandTable) -> Result<()> {
            Ok(())
        }

        async fn on_event(&self, _event: &StatusEvent) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_dispatch_finish() {
        let finished = Arc::new(AtomicUsize::new(0));
        let producer = Box::new(Scripted {
            polls: VecDeque::from(vec![Ok(vec![live("ch1")])]),
        });
        let consumers: Vec<Arc<dyn NotificationConsumer>> = vec![Arc::new(Slow {
            finished: finished.clone(),
        })];
        let config = DispatcherConfig {
            delivery_timeout_secs: 30,
            ..Default::default()
        };
        let handle = Dispatcher::new(producer, consumers, config).start();

        let mut state = handle.watch_state();
        state
            .wait_for(|s| *s == DispatcherState::Dispatching)
            .await
            .unwrap();
        handle.stop();
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        assert!(handle.join().await.is_ok());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow(), DispatcherState::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reaches_shutdown() {
        let producer = Box::new(Scripted {
            polls: VecDeque::new(),
        });
        let (consumers, _) = consumers(vec![("a", Behavior::Ok)]);
        let dispatcher = Dispatcher::new(producer, consumers, config(3));
        let handle = dispatcher.start();

        let mut state = handle.watch_state();
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.stop();
        state
            .wait_for(|s| *s == DispatcherState::Shutdown)
            .await
            .unwrap();

        assert!(handle.join().await.is_ok());
    }
}
