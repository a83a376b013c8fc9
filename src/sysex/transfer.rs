//! The SysEx send/receive state machine.
//!
//! Receiving: `Idle -> listening -> Idle`, either for one message or for
//! as many as arrive until the caller says it is done.
//!
//! Sending, one message at a time:
//!
//! ```text
//! Idle -> Sending -> WillDelayBeforeNext -> DelayingBeforeNext -> Sending -> ... -> Finishing -> Idle
//! ```
//!
//! `Cancelled` is reachable from `Sending`, `WillDelayBeforeNext` and
//! `DelayingBeforeNext`. Every send that starts ends with exactly one
//! [`TransferEvent::SendFinished`].
//!
//! Nothing here blocks. Waiting is a state; it advances when the session
//! hands in a driver event or a [`Wakeup`].

use crate::driver::{MidiDriver, SendRequestId};
use crate::input::{CombinationInputStream, InputEvent};
use crate::message::{MidiMessage, SystemExclusive, TimedMessage};
use crate::output::CombinationOutputStream;
use crate::scheduler::{Scheduler, TimerId, Wakeup};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    Idle,
    OneMessage,
    MultipleMessages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiveProgress {
    pub message_count: usize,
    /// Bytes of the message currently arriving.
    pub current_bytes_read: usize,
    /// Bytes of every completed message in this session.
    pub total_bytes_read: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendProgress {
    pub message_count: usize,
    pub message_index: usize,
    pub bytes_to_send: usize,
    /// Completed messages plus whatever the driver reported for the one in
    /// flight.
    pub bytes_sent: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Sending,
    WillDelayBeforeNext,
    DelayingBeforeNext,
    Cancelled,
    Finishing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    ReadProgress(ReceiveProgress),
    /// The listen session ended with these messages.
    ReadFinished(Vec<SystemExclusive>),
    SendFinished { success: bool, progress: SendProgress },
}

#[derive(Debug)]
struct Incoming {
    mode: ListenMode,
    messages: Vec<SystemExclusive>,
    current_bytes_read: usize,
    total_bytes_read: usize,
    progress_pending: bool,
}

impl Incoming {
    fn new(mode: ListenMode) -> Self {
        Self {
            mode,
            messages: Vec::new(),
            current_bytes_read: 0,
            total_bytes_read: 0,
            progress_pending: false,
        }
    }
}

#[derive(Debug)]
struct Outgoing {
    state: SendState,
    messages: Vec<SystemExclusive>,
    message_count: usize,
    message_index: usize,
    bytes_to_send: usize,
    completed_bytes: usize,
    in_flight: Option<SendRequestId>,
    in_flight_bytes: usize,
    pause_timer: Option<TimerId>,
}

impl Outgoing {
    fn new(messages: Vec<SystemExclusive>) -> Self {
        Self {
            state: SendState::Idle,
            message_count: messages.len(),
            bytes_to_send: messages.iter().map(SystemExclusive::len).sum(),
            messages,
            message_index: 0,
            completed_bytes: 0,
            in_flight: None,
            in_flight_bytes: 0,
            pause_timer: None,
        }
    }
}

pub struct SysExTransferEngine {
    incoming: Incoming,
    outgoing: Outgoing,
    pause_between_messages: Duration,
}

impl SysExTransferEngine {
    pub fn new(pause_between_messages: Duration) -> Self {
        Self {
            incoming: Incoming::new(ListenMode::Idle),
            outgoing: Outgoing::new(Vec::new()),
            pause_between_messages,
        }
    }

    // Receiving

    pub fn listen_mode(&self) -> ListenMode {
        self.incoming.mode
    }

    pub fn is_listening(&self) -> bool {
        self.incoming.mode != ListenMode::Idle
    }

    pub fn listen_for_one_message(
        &mut self,
        driver: &mut dyn MidiDriver,
        input: &mut CombinationInputStream,
    ) {
        self.start_listening(ListenMode::OneMessage, driver, input);
    }

    pub fn listen_for_multiple_messages(
        &mut self,
        driver: &mut dyn MidiDriver,
        input: &mut CombinationInputStream,
    ) {
        self.start_listening(ListenMode::MultipleMessages, driver, input);
    }

    /// Starting over while already listening abandons the earlier session
    /// without reporting it.
    fn start_listening(
        &mut self,
        mode: ListenMode,
        driver: &mut dyn MidiDriver,
        input: &mut CombinationInputStream,
    ) {
        if self.is_listening() {
            debug!("Restarting listen session as {:?}", mode);
        }
        input.cancel_received_sysex();
        let everything = input.all_sources(driver);
        input.set_selected_sources(driver, &everything);
        self.incoming = Incoming::new(mode);
        info!("Listening for SysEx ({:?})", mode);
    }

    /// Discards whatever was received.
    pub fn cancel_message_listen(&mut self, input: &mut CombinationInputStream) {
        if !self.is_listening() {
            return;
        }
        input.cancel_received_sysex();
        self.incoming = Incoming::new(ListenMode::Idle);
        info!("Listen cancelled");
    }

    /// Ends a multiple-message session and returns what it collected.
    pub fn done_with_multiple_message_listen(
        &mut self,
        input: &mut CombinationInputStream,
    ) -> Option<TransferEvent> {
        if self.incoming.mode != ListenMode::MultipleMessages {
            return None;
        }
        input.cancel_received_sysex();
        Some(self.finish_listening())
    }

    fn finish_listening(&mut self) -> TransferEvent {
        self.incoming.mode = ListenMode::Idle;
        self.incoming.progress_pending = false;
        info!(
            "Received {} SysEx messages, {} bytes",
            self.incoming.messages.len(),
            self.incoming.total_bytes_read
        );
        TransferEvent::ReadFinished(self.incoming.messages.clone())
    }

    /// Messages collected by the current or most recent session.
    pub fn received_messages(&self) -> &[SystemExclusive] {
        &self.incoming.messages
    }

    pub fn receive_progress(&self) -> ReceiveProgress {
        ReceiveProgress {
            message_count: self.incoming.messages.len(),
            current_bytes_read: self.incoming.current_bytes_read,
            total_bytes_read: self.incoming.total_bytes_read,
        }
    }

    /// Feeds input while listening. Partial reads are coalesced into one
    /// progress report per pass; a completed message reports at once.
    pub fn take_input_event(
        &mut self,
        event: &InputEvent,
        scheduler: &mut Scheduler,
    ) -> Vec<TransferEvent> {
        if !self.is_listening() {
            return Vec::new();
        }

        match event {
            InputEvent::ReadingSysEx { bytes_read } => {
                self.incoming.current_bytes_read = *bytes_read;
                if !self.incoming.progress_pending {
                    self.incoming.progress_pending = true;
                    scheduler.defer(Wakeup::ReadProgress);
                }
                Vec::new()
            }
            InputEvent::Messages(received) => {
                let mut events = Vec::new();
                for sysex in received.iter().filter_map(|m| m.message.as_sysex()) {
                    self.incoming.total_bytes_read += sysex.len();
                    self.incoming.current_bytes_read = 0;
                    self.incoming.messages.push(sysex.clone());
                    self.incoming.progress_pending = false;
                    events.push(TransferEvent::ReadProgress(self.receive_progress()));

                    if self.incoming.mode == ListenMode::OneMessage {
                        events.push(self.finish_listening());
                        break;
                    }
                }
                events
            }
            InputEvent::SourceListChanged => Vec::new(),
        }
    }

    /// Called for [`Wakeup::ReadProgress`].
    pub fn flush_read_progress(&mut self) -> Option<TransferEvent> {
        if self.incoming.progress_pending && self.is_listening() {
            self.incoming.progress_pending = false;
            Some(TransferEvent::ReadProgress(self.receive_progress()))
        } else {
            None
        }
    }

    // Sending

    pub fn send_state(&self) -> SendState {
        self.outgoing.state
    }

    pub fn is_sending(&self) -> bool {
        self.outgoing.state != SendState::Idle
    }

    pub fn send_progress(&self) -> SendProgress {
        SendProgress {
            message_count: self.outgoing.message_count,
            message_index: self.outgoing.message_index,
            bytes_to_send: self.outgoing.bytes_to_send,
            bytes_sent: self.outgoing.completed_bytes + self.outgoing.in_flight_bytes,
        }
    }

    /// Starts sending `messages` through `output`. Returns the completion
    /// right away when there is nothing to pace: an empty list, or an output
    /// that cannot send asynchronously.
    pub fn send_messages(
        &mut self,
        driver: &mut dyn MidiDriver,
        output: &mut CombinationOutputStream,
        messages: Vec<SystemExclusive>,
    ) -> Option<TransferEvent> {
        if self.is_sending() {
            warn!("Already sending; ignoring {} messages", messages.len());
            return None;
        }

        self.outgoing = Outgoing::new(messages);
        info!(
            "Sending {} SysEx messages, {} bytes",
            self.outgoing.message_count, self.outgoing.bytes_to_send
        );
        if self.outgoing.messages.is_empty() {
            return Some(self.finish_sending(true));
        }

        if !output.can_send_sysex_async() {
            let timed: Vec<TimedMessage> = self
                .outgoing
                .messages
                .iter()
                .cloned()
                .map(|sysex| TimedMessage::new(0, MidiMessage::SystemExclusive(sysex)))
                .collect();
            output.take_messages(driver, &timed);
            self.outgoing.message_index = self.outgoing.message_count - 1;
            self.outgoing.completed_bytes = self.outgoing.bytes_to_send;
            return Some(self.finish_sending(true));
        }

        self.send_current(driver, output)
    }

    fn send_current(
        &mut self,
        driver: &mut dyn MidiDriver,
        output: &mut CombinationOutputStream,
    ) -> Option<TransferEvent> {
        let index = self.outgoing.message_index;
        let result = output.send_sysex_async(driver, &self.outgoing.messages[index]);
        match result {
            Ok(request) => {
                debug!("Sending message {} as {:?}", index, request);
                self.outgoing.state = SendState::Sending;
                self.outgoing.in_flight = Some(request);
                self.outgoing.in_flight_bytes = 0;
                None
            }
            Err(e) => {
                warn!("Could not send message {}: {}", index, e);
                Some(self.finish_sending(false))
            }
        }
    }

    pub fn handle_send_progress(&mut self, request: SendRequestId, bytes_sent: usize) {
        if self.outgoing.in_flight == Some(request) {
            self.outgoing.in_flight_bytes = bytes_sent;
        }
    }

    /// The driver finished (or gave up on) the request in flight.
    pub fn handle_send_finished(
        &mut self,
        request: SendRequestId,
        bytes_sent: usize,
        all_bytes_sent: bool,
        scheduler: &mut Scheduler,
    ) -> Option<TransferEvent> {
        if self.outgoing.in_flight != Some(request) {
            debug!("Ignoring completion of {:?}", request);
            return None;
        }
        self.outgoing.in_flight = None;
        self.outgoing.in_flight_bytes = 0;
        self.outgoing.completed_bytes += bytes_sent;

        match self.outgoing.state {
            SendState::Cancelled => Some(self.finish_sending(false)),
            SendState::Sending if !all_bytes_sent => {
                warn!(
                    "Message {} was cut short after {} bytes",
                    self.outgoing.message_index, bytes_sent
                );
                Some(self.finish_sending(false))
            }
            SendState::Sending if self.outgoing.message_index + 1 < self.outgoing.message_count => {
                self.outgoing.state = SendState::WillDelayBeforeNext;
                scheduler.defer(Wakeup::SchedulePause);
                None
            }
            SendState::Sending => {
                self.outgoing.state = SendState::Finishing;
                scheduler.defer(Wakeup::FinishSend);
                None
            }
            state => {
                debug!("Send request finished while {:?}", state);
                None
            }
        }
    }

    pub fn cancel_sending_messages(
        &mut self,
        driver: &mut dyn MidiDriver,
        output: &mut CombinationOutputStream,
        scheduler: &mut Scheduler,
    ) -> Option<TransferEvent> {
        match self.outgoing.state {
            SendState::Sending => match self.outgoing.in_flight {
                Some(request) => {
                    output.cancel_sysex_send(driver, request);
                    self.outgoing.state = SendState::Cancelled;
                    None
                }
                None => Some(self.finish_sending(false)),
            },
            SendState::WillDelayBeforeNext => {
                self.outgoing.state = SendState::Cancelled;
                None
            }
            SendState::DelayingBeforeNext => {
                if let Some(timer) = self.outgoing.pause_timer.take() {
                    scheduler.cancel(timer);
                }
                Some(self.finish_sending(false))
            }
            SendState::Idle | SendState::Cancelled | SendState::Finishing => None,
        }
    }

    /// Handles the wakeups this engine schedules; others are ignored.
    pub fn handle_wakeup(
        &mut self,
        wakeup: Wakeup,
        driver: &mut dyn MidiDriver,
        output: &mut CombinationOutputStream,
        scheduler: &mut Scheduler,
        now: Instant,
    ) -> Option<TransferEvent> {
        match wakeup {
            Wakeup::ReadProgress => self.flush_read_progress(),
            Wakeup::SchedulePause => match self.outgoing.state {
                SendState::Cancelled if self.outgoing.in_flight.is_none() => {
                    Some(self.finish_sending(false))
                }
                SendState::WillDelayBeforeNext => {
                    let timer = scheduler.schedule_after(
                        now,
                        self.pause_between_messages,
                        Wakeup::SendNextMessage,
                    );
                    self.outgoing.pause_timer = Some(timer);
                    self.outgoing.state = SendState::DelayingBeforeNext;
                    None
                }
                _ => None,
            },
            Wakeup::SendNextMessage if self.outgoing.state == SendState::DelayingBeforeNext => {
                self.outgoing.pause_timer = None;
                self.outgoing.message_index += 1;
                self.send_current(driver, output)
            }
            Wakeup::FinishSend if self.outgoing.state == SendState::Finishing => {
                Some(self.finish_sending(true))
            }
            _ => None,
        }
    }

    fn finish_sending(&mut self, success: bool) -> TransferEvent {
        let progress = self.send_progress();
        self.outgoing.messages.clear();
        self.outgoing.state = SendState::Idle;
        self.outgoing.in_flight = None;
        self.outgoing.in_flight_bytes = 0;
        self.outgoing.pause_timer = None;
        if success {
            info!("Sent {} bytes", progress.bytes_sent);
        } else {
            warn!(
                "Send stopped at message {} after {} of {} bytes",
                progress.message_index, progress.bytes_sent, progress.bytes_to_send
            );
        }
        TransferEvent::SendFinished { success, progress }
    }
}
