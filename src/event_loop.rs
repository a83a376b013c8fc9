// event_loop.rs

use crate::driver::{DriverEvent, MidiDriver};
use crate::error::{MidiplexError, Result};
use crate::session::{MidiSession, SessionEvent};
use crossbeam::channel::{select, Receiver};
use log::{debug, info, warn};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(250);

/// Requests from other threads, applied on the loop's thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    FinishListen,
    CancelListen,
    CancelSend,
    Quit,
}

pub struct EventLoop {
    driver_events: Receiver<DriverEvent>,
    session_events: Receiver<SessionEvent>,
    commands: Receiver<SessionCommand>,
    idle_interval: Duration,
}

impl EventLoop {
    pub fn new(
        driver_events: Receiver<DriverEvent>,
        session_events: Receiver<SessionEvent>,
        commands: Receiver<SessionCommand>,
    ) -> Self {
        EventLoop {
            driver_events,
            session_events,
            commands,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    /// Runs `session` until `handler` breaks, a `Quit` arrives or the
    /// command channel closes.
    pub fn run<D, F>(&self, session: &mut MidiSession<D>, mut handler: F) -> Result<()>
    where
        D: MidiDriver,
        F: FnMut(&mut MidiSession<D>, SessionEvent) -> ControlFlow<()>,
    {
        let mut next_idle = Instant::now() + self.idle_interval;
        info!("Event loop running");

        loop {
            session.run_due(Instant::now());

            while let Ok(event) = self.session_events.try_recv() {
                if handler(session, event).is_break() {
                    info!("Event loop finished");
                    return Ok(());
                }
            }

            let now = Instant::now();
            let until_idle = next_idle.saturating_duration_since(now);
            let timeout = session
                .time_until_due(now)
                .map_or(until_idle, |due| due.min(until_idle));

            select! {
                recv(self.driver_events) -> event => match event {
                    Ok(event) => {
                        let now = Instant::now();
                        session.handle_driver_event(event, now);
                        // Everything already queued belongs to this pass, so
                        // deferred wakeups see the whole burst.
                        while let Ok(event) = self.driver_events.try_recv() {
                            session.handle_driver_event(event, now);
                        }
                    }
                    Err(_) => {
                        warn!("Driver event channel closed");
                        return Err(MidiplexError::Driver("driver event channel closed".to_string()));
                    }
                },
                recv(self.commands) -> command => match command {
                    Ok(SessionCommand::Quit) | Err(_) => {
                        info!("Event loop stopped");
                        return Ok(());
                    }
                    Ok(command) => apply_command(session, command),
                },
                default(timeout) => {}
            }

            let now = Instant::now();
            if now >= next_idle {
                session.idle(now);
                next_idle = now + self.idle_interval;
            }
        }
    }
}

fn apply_command<D: MidiDriver>(session: &mut MidiSession<D>, command: SessionCommand) {
    debug!("Applying {:?}", command);
    match command {
        SessionCommand::FinishListen => session.done_with_multiple_message_listen(),
        SessionCommand::CancelListen => session.cancel_message_listen(),
        SessionCommand::CancelSend => session.cancel_sending(),
        SessionCommand::Quit => {}
    }
}
