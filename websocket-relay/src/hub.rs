//! Registry of live channels and the broadcast fan-out over them.
//!
//! The hub is transport-agnostic. A session calls [`Hub::on_connect`] once its
//! upgrade succeeds, feeds every inbound frame to [`Hub::on_message`], and
//! drains the returned [`Outbox`] onto its socket. Dropping the [`Channel`]
//! handle unregisters it, so an entry can never outlive its connection task.
//!
//! Registry mutations and the broadcast snapshot are serialized by one lock.
//! Sends happen after the lock is released and never block: each recipient
//! has its own bounded queue and a full queue drops the payload for that
//! recipient only.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{error::DeliveryError, message::Payload};

pub type ChannelId = u64;

pub const DEFAULT_SEND_QUEUE: usize = 128;

/// Lifecycle of one channel. Transitions only move forward:
/// `Open -> Closing -> Closed` or `Open -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelState {
    Open,
    Closing,
    Closed,
}

impl ChannelState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ChannelState::Open,
            1 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Returns true if this call moved the state forward.
    fn advance(&self, next: ChannelState) -> bool {
        self.0.fetch_max(next as u8, Ordering::AcqRel) < next as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubOptions {
    /// Whether the sender receives its own messages back.
    pub echo_to_sender: bool,
    /// Capacity of each channel's outbound queue.
    pub send_queue: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
            send_queue: DEFAULT_SEND_QUEUE,
        }
    }
}

/// Outcome of one [`Hub::on_message`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Recipients not in the `Open` state, plus the sender when echo is off.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
struct Member {
    state: Arc<StateCell>,
    outbox: mpsc::Sender<Payload>,
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    members: Mutex<HashMap<ChannelId, Member>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    options: HubOptions,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubOptions::default())
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("channels", &self.len())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Hub {
    pub fn new(options: HubOptions) -> Self {
        Self {
            inner: Arc::new(HubInner {
                members: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                options,
            }),
        }
    }

    /// Registers a new channel in the `Open` state.
    ///
    /// The channel is eligible for broadcasts as soon as this returns. After
    /// [`Hub::close_all`] the channel is handed back already `Closing` with a
    /// closed outbox and is never registered.
    pub fn on_connect(&self) -> (Channel, Outbox) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.options.send_queue.max(1));
        let state = Arc::new(StateCell::new(ChannelState::Open));

        {
            let mut members = self.inner.members.lock();
            if self.inner.closed.load(Ordering::Acquire) {
                state.advance(ChannelState::Closing);
                debug!(channel = id, "hub is closed, refusing registration");
            } else {
                members.insert(
                    id,
                    Member {
                        state: Arc::clone(&state),
                        outbox: tx,
                    },
                );
            }
        }

        let channel = Channel {
            id,
            state: Arc::clone(&state),
            hub: self.clone(),
        };
        (channel, Outbox { rx, state })
    }

    /// Fans `payload` out to every registered channel that is still `Open`.
    ///
    /// A sender that is no longer registered is ignored. Per-recipient
    /// failures are logged and counted, never returned.
    pub fn on_message(&self, from: ChannelId, payload: Payload) -> BroadcastReport {
        let recipients: Vec<(ChannelId, Member)> = {
            let members = self.inner.members.lock();
            if !members.contains_key(&from) {
                debug!(channel = from, "message from unregistered channel ignored");
                return BroadcastReport::default();
            }
            members
                .iter()
                .map(|(id, member)| (*id, member.clone()))
                .collect()
        };

        let mut report = BroadcastReport::default();
        for (id, member) in recipients {
            if id == from && !self.inner.options.echo_to_sender {
                report.skipped += 1;
                continue;
            }

            let state = member.state.load();
            if state != ChannelState::Open {
                debug!(channel = id, ?state, "skipping channel that is not open");
                report.skipped += 1;
                continue;
            }

            let error = match member.outbox.try_send(payload.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    continue;
                }
                Err(mpsc::error::TrySendError::Full(_)) => DeliveryError::QueueFull,
                Err(mpsc::error::TrySendError::Closed(_)) => DeliveryError::Disconnected,
            };
            warn!(channel = id, %error, "dropping message for recipient");
            report.failed += 1;
        }

        report
    }

    /// Removes a channel from the registry and marks it `Closed`.
    ///
    /// Returns whether the channel was registered; calling it again for the
    /// same channel is a no-op.
    pub fn on_disconnect(&self, id: ChannelId) -> bool {
        let removed = self.inner.members.lock().remove(&id);
        match removed {
            Some(member) => {
                let graceful = member.state.load() == ChannelState::Closing;
                member.state.advance(ChannelState::Closed);
                info!(channel = id, graceful, "client disconnected");
                true
            }
            None => false,
        }
    }

    /// Shutdown path: marks every channel `Closing`, empties the registry and
    /// refuses later registrations. Dropping the queue senders ends each
    /// channel's [`Outbox`] once it has drained.
    pub fn close_all(&self) -> usize {
        let drained = {
            let mut members = self.inner.members.lock();
            self.inner.closed.store(true, Ordering::Release);
            std::mem::take(&mut *members)
        };

        for (id, member) in &drained {
            member.state.advance(ChannelState::Closing);
            info!(channel = *id, graceful = true, "client disconnected");
        }

        info!(channels = drained.len(), "closing all channels");
        drained.len()
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.inner.members.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owning handle for one registered channel. Dropping it unregisters the
/// channel and marks it `Closed`.
pub struct Channel {
    id: ChannelId,
    state: Arc<StateCell>,
    hub: Hub,
}

impl Channel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state.load()
    }

    /// `Open -> Closing`. The channel stops receiving broadcasts but stays
    /// registered until it is dropped.
    pub fn begin_close(&self) -> bool {
        self.state.advance(ChannelState::Closing)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.hub.on_disconnect(self.id);
        self.state.advance(ChannelState::Closed);
    }
}

/// Receiving end of a channel's queue. Yields nothing once the channel is
/// `Closed`, even if payloads were queued before the disconnect.
pub struct Outbox {
    rx: mpsc::Receiver<Payload>,
    state: Arc<StateCell>,
}

impl Outbox {
    pub async fn recv(&mut self) -> Option<Payload> {
        if self.state.load() == ChannelState::Closed {
            return None;
        }
        let payload = self.rx.recv().await?;
        (self.state.load() != ChannelState::Closed).then_some(payload)
    }

    pub fn try_recv(&mut self) -> Option<Payload> {
        if self.state.load() == ChannelState::Closed {
            return None;
        }
        self.rx.try_recv().ok()
    }
}
