//! End-to-end session tests against the in-memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use myo_core::mock::{MockConnector, MockTransport, TransportCall};
use myo_core::uuid::{COMMAND, EMG_DATA};
use myo_core::{
    ChannelStreams, Error, NoSetup, PipelineOptions, Result, RetryConfig, RunnerConfig,
    SessionRunner, SessionState, StopCondition, run_session,
};
use myo_types::command::SET_MODE;

const ADDRESS: &str = "F3:F8:2E:FB:8C:3C";

fn frame(fill: i8) -> Vec<u8> {
    vec![fill as u8; 16]
}

fn fast_config() -> RunnerConfig {
    RunnerConfig {
        pipeline: PipelineOptions::builder()
            .refresh_interval(Duration::from_millis(2))
            .build(),
        ..Default::default()
    }
}

fn runner() -> (SessionRunner<MockConnector>, MockTransport) {
    let transport = MockTransport::new(ADDRESS);
    let connector = MockConnector::new(transport.clone());
    (SessionRunner::new(connector, fast_config()), transport)
}

#[tokio::test]
async fn test_first_drain_sees_frames_queued_before_streaming() {
    let (runner, transport) = runner();
    for (group, fill) in [(0, 1), (1, 2), (2, 3)] {
        transport.queue_notification(EMG_DATA[group].uuid(), frame(fill));
    }

    let mut first_drain: Option<ChannelStreams> = None;
    let mut action = |streams: &ChannelStreams| {
        first_drain.get_or_insert_with(|| streams.clone());
    };
    let streams = runner
        .run(
            ADDRESS,
            &mut NoSetup,
            &mut action,
            StopCondition::After(Duration::from_millis(20)),
        )
        .await
        .unwrap();

    let first = first_drain.unwrap();
    for channel in 0..8 {
        assert_eq!(first.channel(channel).len(), 6);
        assert_eq!(first.channel(channel), &[1, 1, 2, 2, 3, 3]);
    }
    assert_eq!(streams.samples_per_channel(), 6);
}

#[tokio::test]
async fn test_set_mode_failure_aborts_before_subscribing() {
    let (runner, transport) = runner();
    transport.fail_command(SET_MODE);

    let mut drains = 0;
    let mut action = |_: &ChannelStreams| drains += 1;
    let err = runner
        .run(
            ADDRESS,
            &mut NoSetup,
            &mut action,
            StopCondition::After(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::TransportWrite { characteristic, .. } if characteristic == COMMAND.uuid()
    ));
    assert!(transport.started_notifications().is_empty());
    assert!(!transport.is_connected());
    assert_eq!(runner.state(), SessionState::Disconnected);
    assert_eq!(drains, 0);

    // Unlock and sleep went through before the failure.
    let opcodes: Vec<u8> = transport.writes().iter().map(|(_, data)| data[0]).collect();
    assert_eq!(opcodes, vec![0x02, 0x09]);
}

#[tokio::test]
async fn test_clean_teardown_unsubscribes_everything() {
    let (runner, transport) = runner();

    let mut action = |_: &ChannelStreams| {};
    runner
        .run(
            ADDRESS,
            &mut NoSetup,
            &mut action,
            StopCondition::After(Duration::from_millis(10)),
        )
        .await
        .unwrap();

    let expected: Vec<_> = EMG_DATA.iter().map(|code| code.uuid()).collect();
    assert_eq!(transport.started_notifications(), expected);
    assert_eq!(transport.stopped_notifications(), expected);
    assert_eq!(transport.calls().last(), Some(&TransportCall::Disconnect));
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_partial_subscription_is_rolled_back() {
    let (runner, transport) = runner();
    transport.fail_subscribe(EMG_DATA[3].uuid());

    let mut action = |_: &ChannelStreams| {};
    let err = runner
        .run(
            ADDRESS,
            &mut NoSetup,
            &mut action,
            StopCondition::After(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Subscription { .. }));
    assert_eq!(transport.stopped_notifications().len(), 3);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_unsubscribe_failure_does_not_lose_streams() {
    let (runner, transport) = runner();
    transport.fail_unsubscribe(EMG_DATA[0].uuid());
    transport.queue_notification(EMG_DATA[0].uuid(), frame(9));

    let mut action = |_: &ChannelStreams| {};
    let streams = runner
        .run(
            ADDRESS,
            &mut NoSetup,
            &mut action,
            StopCondition::After(Duration::from_millis(10)),
        )
        .await
        .unwrap();

    assert_eq!(streams.channel(0), &[9, 9]);
    assert_eq!(transport.stopped_notifications().len(), 3);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_signal_stop() {
    let (runner, transport) = runner();
    let token = CancellationToken::new();

    let stopper = token.clone();
    let mut state = runner.watch_state();
    let stop_when_streaming = async move {
        state
            .wait_for(|s| *s == SessionState::Streaming)
            .await
            .unwrap();
        stopper.cancel();
    };

    let mut action = |_: &ChannelStreams| {};
    let mut setup = NoSetup;
    let (result, ()) = tokio::join!(
        runner.run(
            ADDRESS,
            &mut setup,
            &mut action,
            StopCondition::Signal(token.clone()),
        ),
        stop_when_streaming,
    );

    assert!(result.unwrap().is_empty());
    assert!(token.is_cancelled());
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_duration_or_signal_stops_on_duration() {
    let (runner, _transport) = runner();
    let token = CancellationToken::new();

    let mut action = |_: &ChannelStreams| {};
    runner
        .run(
            ADDRESS,
            &mut NoSetup,
            &mut action,
            StopCondition::AfterOrSignal(Duration::from_millis(15), token.clone()),
        )
        .await
        .unwrap();

    // The caller's token is left alone.
    assert!(!token.is_cancelled());
    assert_eq!(runner.state(), SessionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_producer_keeps_order() {
    const FRAMES: usize = 120;

    let (runner, transport) = runner();
    let token = CancellationToken::new();

    let producer_transport = transport.clone();
    let stopper = token.clone();
    let mut state = runner.watch_state();
    let produce = async move {
        state
            .wait_for(|s| *s == SessionState::Streaming)
            .await
            .unwrap();
        tokio::task::spawn_blocking(move || {
            for i in 0..FRAMES {
                let mut data = vec![0u8; 16];
                data[0] = i as u8;
                data[8] = i as u8;
                data[1] = (i % 4) as u8;
                assert!(producer_transport.notify(EMG_DATA[i % 4].uuid(), &data));
                if i % 10 == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        stopper.cancel();
    };

    let mut max_seen = 0;
    let mut action = |streams: &ChannelStreams| {
        assert!(streams.samples_per_channel() >= max_seen);
        max_seen = streams.samples_per_channel();
    };
    let mut setup = NoSetup;
    let (result, ()) = tokio::join!(
        runner.run(ADDRESS, &mut setup, &mut action, StopCondition::Signal(token)),
        produce,
    );

    let streams = result.unwrap();
    assert_eq!(streams.samples_per_channel(), 2 * FRAMES);
    let expected: Vec<i8> = (0..FRAMES).flat_map(|i| [i as i8, i as i8]).collect();
    assert_eq!(streams.channel(0), expected.as_slice());
    for channel in 0..8 {
        assert_eq!(streams.channel(channel).len(), 2 * FRAMES);
    }
}

#[tokio::test]
async fn test_malformed_notification_does_not_abort() {
    let (runner, transport) = runner();
    let sender = EMG_DATA[0].uuid();
    transport.queue_notification(sender, frame(1));
    transport.queue_notification(sender, vec![0u8; 15]);
    transport.queue_notification(sender, frame(2));

    let mut action = |_: &ChannelStreams| {};
    let streams = runner
        .run(
            ADDRESS,
            &mut NoSetup,
            &mut action,
            StopCondition::After(Duration::from_millis(10)),
        )
        .await
        .unwrap();

    assert_eq!(streams.channel(5), &[1, 1, 2, 2]);
    let stats = runner.stats();
    assert_eq!(stats.frames_malformed, 1);
    assert_eq!(stats.frames_drained, 2);
    // Both frames came from group 0.
    assert_eq!(stats.group_gaps, 1);
}

#[tokio::test]
async fn test_setup_hook_runs_while_configuring() {
    let (runner, transport) = runner();
    let state = runner.watch_state();
    let observed = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&observed);
    let watched = transport.clone();
    let mut setup = move || -> Result<()> {
        assert_eq!(*state.borrow(), SessionState::Configuring);
        assert!(watched.writes().is_empty());
        flag.store(true, Ordering::SeqCst);
        Ok(())
    };
    let mut action = |_: &ChannelStreams| {};
    runner
        .run(
            ADDRESS,
            &mut setup,
            &mut action,
            StopCondition::After(Duration::from_millis(5)),
        )
        .await
        .unwrap();

    assert!(observed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_connect_retry() {
    let transport = MockTransport::new(ADDRESS);
    let connector = MockConnector::new(transport.clone());
    connector.fail_connects(2);

    let config = RunnerConfig {
        connect_retry: RetryConfig::new(3)
            .initial_delay(Duration::from_millis(1))
            .jitter(false),
        ..fast_config()
    };
    let runner = SessionRunner::new(connector, config);

    let mut action = |_: &ChannelStreams| {};
    runner
        .run(
            ADDRESS,
            &mut NoSetup,
            &mut action,
            StopCondition::After(Duration::from_millis(5)),
        )
        .await
        .unwrap();
    assert_eq!(runner.connector().attempts(), 3);
}

#[tokio::test]
async fn test_connect_failure_without_retry() {
    let transport = MockTransport::new(ADDRESS);
    let connector = MockConnector::new(transport.clone());
    connector.fail_connects(1);

    let mut action = |_: &ChannelStreams| {};
    let err = run_session(
        connector,
        ADDRESS,
        fast_config(),
        &mut action,
        StopCondition::After(Duration::from_millis(5)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::DeviceNotFound(_)));
    assert!(transport.calls().is_empty());
}
