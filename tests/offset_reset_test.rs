//! Offset reset coordination between requesters and a live sampling loop.

mod common;

use common::{test_settings, wait_until, RunningSampler, SharedSink};
use dynpick_daq::adapters::MockAdapter;
use dynpick_daq::error::DaqError;
use dynpick_daq::measurement::CalibrationVector;
use dynpick_daq::reset::ResetState;
use dynpick_daq::sampling::{SamplingLoop, TickOutcome};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Indices of every `O` in the command log.
fn reset_positions(commands: &[String]) -> Vec<usize> {
    commands
        .iter()
        .enumerate()
        .filter(|(_, c)| c.as_str() == "O")
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn test_resetting_ticks_send_no_sample_requests() {
    let settings = test_settings(1000.0);
    let mock = MockAdapter::new();
    let sink = SharedSink::default();
    let reset = Arc::new(ResetState::new(3, Some(Duration::from_secs(5))));
    let mut sampler = SamplingLoop::new(
        mock.clone(),
        sink.clone(),
        Arc::clone(&reset),
        CalibrationVector::default(),
        &settings,
    );

    assert_eq!(sampler.tick(), TickOutcome::Frame { sequence: 0 });

    let requester = {
        let reset = Arc::clone(&reset);
        thread::spawn(move || reset.request_reset())
    };
    assert!(wait_until(Duration::from_secs(5), || reset.pending() == 3));
    assert!(reset.is_resetting());

    assert_eq!(sampler.tick(), TickOutcome::ResetSent { remaining: 2 });
    assert_eq!(sampler.tick(), TickOutcome::ResetSent { remaining: 1 });
    assert_eq!(sink.len(), 1);
    assert!(!requester.is_finished());
    assert_eq!(sampler.tick(), TickOutcome::ResetSent { remaining: 0 });

    let ack = requester.join().unwrap().unwrap();
    assert!(ack.success);
    assert_eq!(ack.message, "Reset offset command was sent 3 times to the sensor.");
    assert_eq!(reset.pending(), 0);

    assert_eq!(sampler.tick(), TickOutcome::Frame { sequence: 1 });
    assert_eq!(mock.commands(), vec!["R", "O", "O", "O", "R"]);
    assert_eq!(sink.len(), 2);
}

#[test]
fn test_single_request_sends_exactly_the_configured_count() {
    let settings = test_settings(1000.0);
    let mock = MockAdapter::new();
    let sink = SharedSink::default();
    let reset = Arc::new(ResetState::new(3, Some(Duration::from_secs(5))));
    let sampler = RunningSampler::start(
        &mock,
        &sink,
        &reset,
        CalibrationVector::default(),
        &settings,
    );
    assert!(wait_until(Duration::from_secs(5), || sink.len() >= 3));

    let ack = reset.request_reset().unwrap();
    assert!(ack.success);
    assert_eq!(reset.pending(), 0);
    assert_eq!(mock.count("O"), 3);

    let frames_at_ack = sink.len();
    assert!(wait_until(Duration::from_secs(5), || sink.len() >= frames_at_ack + 3));
    sampler.stop();

    let commands = mock.commands();
    let resets = reset_positions(&commands);
    assert_eq!(resets.len(), 3);
    // the sequence is not interleaved with sample requests
    assert_eq!(resets[2] - resets[0], 2);
    assert_eq!(sink.len(), mock.count("R"));
}

#[test]
fn test_concurrent_requests_rearm_the_sequence() {
    let settings = test_settings(200.0);
    let mock = MockAdapter::new();
    let sink = SharedSink::default();
    let reset = Arc::new(ResetState::new(3, Some(Duration::from_secs(10))));
    let sampler = RunningSampler::start(
        &mock,
        &sink,
        &reset,
        CalibrationVector::default(),
        &settings,
    );

    let first = {
        let reset = Arc::clone(&reset);
        thread::spawn(move || reset.request_reset())
    };
    assert!(wait_until(Duration::from_secs(5), || mock.count("O") >= 1));

    let sent_before_second = mock.count("O");
    let second = {
        let reset = Arc::clone(&reset);
        thread::spawn(move || reset.request_reset())
    };

    let first = first.join().unwrap();
    let second = second.join().unwrap();
    sampler.stop();

    assert!(first.unwrap().success);
    assert!(second.unwrap().success);
    assert_eq!(reset.pending(), 0);

    let total = mock.count("O");
    assert!(
        total >= sent_before_second + 3,
        "only {} resets after the second request began ({} before)",
        total - sent_before_second,
        sent_before_second
    );
    assert!(total <= 6);
}

#[test]
fn test_stalled_link_times_out_the_requester_then_recovers() {
    let settings = test_settings(1000.0);
    let mock = MockAdapter::new();
    let sink = SharedSink::default();
    let reset = Arc::new(ResetState::new(3, Some(Duration::from_millis(100))));
    let sampler = RunningSampler::start(
        &mock,
        &sink,
        &reset,
        CalibrationVector::default(),
        &settings,
    );

    mock.set_short_writes(true);
    match reset.request_reset() {
        Err(DaqError::ResetTimeout(timeout)) => assert_eq!(timeout, Duration::from_millis(100)),
        other => panic!("expected ResetTimeout, got {:?}", other),
    }
    assert_eq!(reset.pending(), 3);

    mock.set_short_writes(false);
    assert!(wait_until(Duration::from_secs(5), || !reset.is_resetting()));
    sampler.stop();

    assert_eq!(mock.count("O"), 3);
}

#[test]
fn test_sampling_resumes_after_reset() {
    let settings = test_settings(1000.0);
    let mock = MockAdapter::new();
    let sink = SharedSink::default();
    let reset = Arc::new(ResetState::new(2, None));
    let sampler = RunningSampler::start(
        &mock,
        &sink,
        &reset,
        CalibrationVector::default(),
        &settings,
    );

    reset.request_reset().unwrap();
    let after_reset = sink.len();
    assert!(wait_until(Duration::from_secs(5), || sink.len() >= after_reset + 5));
    sampler.stop();

    let frames = sink.frames();
    assert!(frames
        .iter()
        .enumerate()
        .all(|(index, frame)| frame.sequence == index as u64));
    assert_eq!(mock.count("O"), 2);
}
