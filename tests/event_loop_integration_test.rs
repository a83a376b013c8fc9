extern crate midiplex;

use crossbeam::channel::{unbounded, Receiver, Sender};
use midiplex::driver::DriverEvent;
use midiplex::event_loop::{EventLoop, SessionCommand};
use midiplex::{
    Endpoint, EndpointId, EngineConfig, MidiMessage, MidiSession, MockDriver, MockHandle,
    OutputDestination, SessionEvent, SystemExclusive,
};
use std::ops::ControlFlow;
use std::thread;
use std::time::{Duration, Instant};

struct Fixture {
    session: MidiSession<MockDriver>,
    handle: MockHandle,
    event_loop: EventLoop,
    commands: Sender<SessionCommand>,
}

fn fixture(config: EngineConfig) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();

    let (driver, handle, driver_events): (MockDriver, MockHandle, Receiver<DriverEvent>) =
        MockDriver::new();
    handle.add_source(Endpoint::new(1, "Keys"));
    handle.add_destination(Endpoint::new(2, "Synth"));
    let (session_tx, session_rx) = unbounded();
    let session = MidiSession::new(driver, &config, session_tx).unwrap();
    let (commands, command_rx) = unbounded();
    let event_loop = EventLoop::new(driver_events, session_rx, command_rx)
        .with_idle_interval(Duration::from_millis(10));
    Fixture {
        session,
        handle,
        event_loop,
        commands,
    }
}

#[test]
fn integration_test_monitor_message_from_another_thread() {
    let mut f = fixture(EngineConfig::default());
    let everything = f.session.all_sources();
    f.session.set_selected_sources(&everything);

    let handle = f.handle.clone();
    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.receive_from_source(EndpointId(1), 5, &[0x90, 0x3C, 0x40])
    });

    let mut received = Vec::new();
    f.event_loop
        .run(&mut f.session, |_, event| match event {
            SessionEvent::Messages(messages) => {
                received.extend(messages);
                ControlFlow::Break(())
            }
            _ => ControlFlow::Continue(()),
        })
        .unwrap();

    assert!(sender.join().expect("sender thread panicked"));
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0].message,
        MidiMessage::NoteOn {
            channel: 0,
            note: 0x3C,
            velocity: 0x40
        }
    );
}

#[test]
fn integration_test_paced_send_completes() {
    let mut f = fixture(EngineConfig {
        pause_between_messages_ms: 5,
        ..EngineConfig::default()
    });
    f.session
        .select_destination(OutputDestination::Port(Endpoint::new(2, "Synth")));

    // Plays the part of the hardware: completes each request as it shows up.
    let handle = f.handle.clone();
    let device = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut finished = 0;
        while finished < 3 && Instant::now() < deadline {
            let requests = handle.sysex_requests();
            if requests.len() > finished {
                handle.finish_sysex_send(requests[finished].id, true);
                finished += 1;
            }
            thread::sleep(Duration::from_millis(1));
        }
        finished
    });

    let messages = vec![
        SystemExclusive::new(vec![0x01; 8]),
        SystemExclusive::new(vec![0x02; 8]),
        SystemExclusive::new(vec![0x03; 8]),
    ];
    f.session.send_sysex(messages);

    let mut outcome = None;
    f.event_loop
        .run(&mut f.session, |_, event| match event {
            SessionEvent::SendFinished { success, progress } => {
                outcome = Some((success, progress));
                ControlFlow::Break(())
            }
            _ => ControlFlow::Continue(()),
        })
        .unwrap();

    assert_eq!(device.join().expect("device thread panicked"), 3);
    let (success, progress) = outcome.unwrap();
    assert!(success);
    assert_eq!(progress.bytes_sent, 30);
    assert_eq!(progress.message_index, 2);
}

#[test]
fn integration_test_quit_command_stops_loop() {
    let mut f = fixture(EngineConfig::default());
    f.commands.send(SessionCommand::Quit).unwrap();
    let mut events = 0;
    f.event_loop
        .run(&mut f.session, |_, _| {
            events += 1;
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(events, 0);
}

#[test]
fn integration_test_finish_listen_command() {
    let mut f = fixture(EngineConfig::default());
    f.session.listen_for_multiple_messages();
    f.handle
        .receive_from_source(EndpointId(1), 0, &[0xF0, 0x7E, 0x00, 0xF7]);

    let commands = f.commands.clone();
    let mut received = None;
    f.event_loop
        .run(&mut f.session, |_, event| match event {
            SessionEvent::ReadProgress(progress) if progress.message_count == 1 => {
                commands.send(SessionCommand::FinishListen).unwrap();
                ControlFlow::Continue(())
            }
            SessionEvent::ReadFinished(messages) => {
                received = Some(messages);
                ControlFlow::Break(())
            }
            _ => ControlFlow::Continue(()),
        })
        .unwrap();

    assert_eq!(
        received,
        Some(vec![SystemExclusive::new(vec![0x7E, 0x00])])
    );
}

fn quit_after(commands: &Sender<SessionCommand>, delay: Duration) -> thread::JoinHandle<()> {
    let commands = commands.clone();
    thread::spawn(move || {
        thread::sleep(delay);
        let _ = commands.send(SessionCommand::Quit);
    })
}

#[test]
fn integration_test_queued_endpoint_churn_is_one_notification() {
    let mut f = fixture(EngineConfig::default());
    let everything = f.session.all_sources();
    f.session.set_selected_sources(&everything);

    f.handle.remove_endpoint(EndpointId(1));
    f.handle.remove_endpoint(EndpointId(2));
    f.handle.emit(DriverEvent::EndpointDisappeared {
        endpoint: EndpointId(1),
    });
    f.handle.emit(DriverEvent::EndpointDisappeared {
        endpoint: EndpointId(2),
    });
    f.handle.emit(DriverEvent::EndpointsChanged);

    let quitter = quit_after(&f.commands, Duration::from_millis(200));
    let mut notifications = 0;
    f.event_loop
        .run(&mut f.session, |_, event| {
            if event == SessionEvent::SourceListChanged {
                notifications += 1;
            }
            ControlFlow::Continue(())
        })
        .unwrap();
    quitter.join().expect("quit thread panicked");

    assert_eq!(notifications, 1);
}

#[test]
fn integration_test_queued_sysex_packets_are_one_progress_report() {
    let mut f = fixture(EngineConfig::default());
    f.session.listen_for_one_message();
    f.handle
        .receive_from_source(EndpointId(1), 0, &[0xF0, 0x41, 0x10]);
    f.handle.receive_from_source(EndpointId(1), 1, &[0x42, 0x12]);
    f.handle.receive_from_source(EndpointId(1), 2, &[0x40, 0x00]);

    let quitter = quit_after(&f.commands, Duration::from_millis(200));
    let mut reports = Vec::new();
    f.event_loop
        .run(&mut f.session, |_, event| {
            if let SessionEvent::ReadProgress(progress) = event {
                reports.push(progress);
            }
            ControlFlow::Continue(())
        })
        .unwrap();
    quitter.join().expect("quit thread panicked");

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].current_bytes_read, 7);
}
