use crossbeam::channel::{unbounded, Receiver};
use midiplex::driver::DriverEvent;
use midiplex::sysex::{ReceiveProgress, SendState};
use midiplex::{
    Endpoint, EndpointId, EngineConfig, MidiSession, MockDriver, MockHandle, OutputDestination,
    SendProgress, SessionEvent, SystemExclusive,
};
use std::time::{Duration, Instant};

const PAUSE: Duration = Duration::from_millis(150);

struct Harness {
    session: MidiSession<MockDriver>,
    handle: MockHandle,
    driver_events: Receiver<DriverEvent>,
    session_events: Receiver<SessionEvent>,
    now: Instant,
}

impl Harness {
    fn new() -> Self {
        let (driver, handle, driver_events) = MockDriver::new();
        handle.add_source(Endpoint::new(1, "Keys"));
        handle.add_destination(Endpoint::new(2, "Synth"));
        let (tx, session_events) = unbounded();
        let config = EngineConfig {
            pause_between_messages_ms: PAUSE.as_millis() as u64,
            ..EngineConfig::default()
        };
        let mut session = MidiSession::new(driver, &config, tx).unwrap();
        session.select_destination(OutputDestination::Port(Endpoint::new(2, "Synth")));
        Self {
            session,
            handle,
            driver_events,
            session_events,
            now: Instant::now(),
        }
    }

    fn pump(&mut self) -> Vec<SessionEvent> {
        loop {
            let mut handled = false;
            while let Ok(event) = self.driver_events.try_recv() {
                self.session.handle_driver_event(event, self.now);
                handled = true;
            }
            if self.session.time_until_due(self.now) == Some(Duration::ZERO) {
                self.session.run_due(self.now);
                handled = true;
            }
            if !handled {
                return self.session_events.try_iter().collect();
            }
        }
    }

    fn advance(&mut self, by: Duration) -> Vec<SessionEvent> {
        self.now += by;
        self.pump()
    }

    fn finish_last_request(&mut self, all_bytes_sent: bool) -> Vec<SessionEvent> {
        let request = self.handle.sysex_requests().last().unwrap().id;
        self.handle.finish_sysex_send(request, all_bytes_sent);
        self.pump()
    }
}

fn sysex(body_len: usize) -> SystemExclusive {
    SystemExclusive::new(vec![0x10; body_len])
}

fn finished(events: &[SessionEvent]) -> Vec<(bool, SendProgress)> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::SendFinished { success, progress } => Some((*success, *progress)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_send_is_sequential_and_accounts_for_every_byte() {
    let mut harness = Harness::new();
    let messages = vec![sysex(10), sysex(20), sysex(30)];
    let total: usize = messages.iter().map(SystemExclusive::len).sum();
    harness.session.send_sysex(messages);
    harness.pump();

    for index in 0..3 {
        let requests = harness.handle.sysex_requests();
        assert_eq!(requests.len(), index + 1);
        assert_eq!(requests[index].destination, EndpointId(2));

        let events = harness.finish_last_request(true);
        if index < 2 {
            assert!(finished(&events).is_empty());
            assert_eq!(harness.handle.sysex_requests().len(), index + 1);
            assert!(harness.advance(PAUSE / 2).is_empty());
            assert_eq!(harness.handle.sysex_requests().len(), index + 1);
            harness.advance(PAUSE / 2);
        } else {
            assert_eq!(
                finished(&events),
                vec![(
                    true,
                    SendProgress {
                        message_count: 3,
                        message_index: 2,
                        bytes_to_send: total,
                        bytes_sent: total,
                    }
                )]
            );
        }
    }
    assert_eq!(harness.session.engine().send_state(), SendState::Idle);
    assert_eq!(harness.session.send_progress().bytes_sent, total);
}

#[test]
fn test_cut_short_second_message_stops_the_send() {
    let mut harness = Harness::new();
    harness
        .session
        .send_sysex(vec![sysex(10), sysex(10), sysex(10)]);
    harness.pump();

    harness.finish_last_request(true);
    harness.advance(PAUSE);
    let events = harness.finish_last_request(false);

    let outcome = finished(&events);
    assert_eq!(outcome.len(), 1);
    assert!(!outcome[0].0);
    assert_eq!(outcome[0].1.message_index, 1);

    assert!(finished(&harness.advance(PAUSE * 4)).is_empty());
    assert_eq!(harness.handle.sysex_requests().len(), 2);
}

#[test]
fn test_cancelling_in_each_state_finishes_once() {
    type Setup = fn(&mut Harness);
    let setups: [(SendState, Setup); 3] = [
        (SendState::Sending, |_| {}),
        (SendState::WillDelayBeforeNext, |h| {
            let request = h.handle.sysex_requests()[0].id;
            h.handle.finish_sysex_send(request, true);
            let event = h.driver_events.try_recv().unwrap();
            h.session.handle_driver_event(event, h.now);
        }),
        (SendState::DelayingBeforeNext, |h| {
            h.finish_last_request(true);
        }),
    ];

    for (state, setup) in setups {
        let mut harness = Harness::new();
        harness.session.send_sysex(vec![sysex(4), sysex(4)]);
        harness.pump();
        setup(&mut harness);
        assert_eq!(harness.session.engine().send_state(), state);

        harness.session.cancel_sending();
        let mut events = harness.pump();
        if state == SendState::Sending {
            assert!(finished(&events).is_empty());
            events = harness.finish_last_request(false);
        }
        events.extend(harness.advance(PAUSE * 2));

        let outcome = finished(&events);
        assert_eq!(outcome.len(), 1, "state {:?}", state);
        assert!(!outcome[0].0);
        assert_eq!(harness.handle.sysex_requests().len(), 1);
        assert_eq!(harness.session.engine().send_state(), SendState::Idle);
    }
}

#[test]
fn test_listen_for_multiple_messages_from_packets() {
    let mut harness = Harness::new();
    harness.session.listen_for_multiple_messages();
    assert!(harness
        .handle
        .connected_sources()
        .contains(&EndpointId(1)));

    // 5, 7 and 9 bytes on the wire; the second arrives in two packets.
    harness.handle.receive_from_source(EndpointId(1), 0, &[0xF0, 0x01, 0x02, 0x03, 0xF7]);
    harness.handle.receive_from_source(EndpointId(1), 1, &[0xF0, 0x01, 0x02]);
    harness.handle.receive_from_source(EndpointId(1), 2, &[0x03, 0x04, 0x05, 0xF7]);
    harness
        .handle
        .receive_from_source(EndpointId(1), 3, &[0xF0, 1, 2, 3, 4, 5, 6, 7, 0xF7]);
    harness.pump();

    harness.session.done_with_multiple_message_listen();
    let events = harness.pump();
    let received: Vec<&Vec<SystemExclusive>> = events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::ReadFinished(messages) => Some(messages),
            _ => None,
        })
        .collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].len(), 3);
    assert_eq!(
        harness.session.receive_progress(),
        ReceiveProgress {
            message_count: 3,
            current_bytes_read: 0,
            total_bytes_read: 5 + 7 + 9,
        }
    );
}

#[test]
fn test_messages_bypass_the_monitor_while_listening() {
    let mut harness = Harness::new();
    harness.session.listen_for_one_message();
    harness.handle.receive_from_source(EndpointId(1), 0, &[0x90, 0x40, 0x7F]);
    harness.handle.receive_from_source(EndpointId(1), 1, &[0xF0, 0x7E, 0xF7]);
    harness.handle.receive_from_source(EndpointId(1), 2, &[0x80, 0x40, 0x00]);
    let events = harness.pump();

    assert!(events.contains(&SessionEvent::ReadFinished(vec![SystemExclusive::new(vec![0x7E])])));
    let monitored: Vec<&SessionEvent> = events
        .iter()
        .filter(|event| matches!(event, SessionEvent::Messages(_)))
        .collect();
    assert_eq!(monitored.len(), 1, "only the note off after the session");
}

#[test]
fn test_partial_sysex_times_out_into_the_session() {
    let mut harness = Harness::new();
    harness.session.listen_for_one_message();
    harness.handle.receive_from_source(EndpointId(1), 0, &[0xF0, 0x41, 0x10]);
    let events = harness.pump();
    assert!(events
        .iter()
        .any(|event| matches!(event, SessionEvent::ReadProgress(p) if p.current_bytes_read > 0)));

    harness.now += Duration::from_secs(2);
    harness.session.idle(harness.now);
    let events = harness.pump();
    let incomplete = SystemExclusive {
        data: vec![0x41, 0x10],
        received_with_eox: false,
    };
    assert!(events.contains(&SessionEvent::ReadFinished(vec![incomplete])));
}

#[test]
fn test_synchronous_output_sends_everything_at_once() {
    let (driver, handle, _driver_events) = MockDriver::new();
    handle.add_destination(Endpoint::new(2, "Synth"));
    let (tx, session_events) = unbounded();
    let config = EngineConfig {
        sends_sysex_async: false,
        ..EngineConfig::default()
    };
    let mut session = MidiSession::new(driver, &config, tx).unwrap();
    session.select_destination(OutputDestination::Port(Endpoint::new(2, "Synth")));

    session.send_sysex(vec![sysex(1), sysex(1)]);
    let events: Vec<SessionEvent> = session_events.try_iter().collect();
    assert_eq!(finished(&events).len(), 1);
    assert!(finished(&events)[0].0);
    assert_eq!(handle.sent().len(), 2);
}
