//! Playback session management.
//!
//! The [`Manager`] owns the audio-producing resource of the active queue item
//! and replaces it whenever the UI activates another item. Resources come
//! from a [`Backend`], which in production is the `rodio` output in
//! [`crate::output`].
//!
//! Every session is stamped with a [`Generation`] when it is created, and so
//! is every [`Signal`] its resource sends. Signals are relayed to the UI only
//! when their generation is the active one, so a stream that is winding down
//! cannot move the progress bar of its successor.
//!
//! Sessions that stop being active are paused at once and released after a
//! grace period. The caller drives releases: it sleeps until
//! [`Manager::next_release`] and then calls [`Manager::release_due`].

use std::{fmt, time::Duration};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};

use crate::{
    error::Result,
    events::{self, Event},
    protocol::QueueItem,
};

/// Marker that tells sessions apart, increasing with every session created.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SignalKind {
    /// Playback reached `position`.
    Progress(Duration),
    /// Playback started (`true`) or stopped (`false`).
    Playing(bool),
    /// Playback reached the end of the stream.
    Ended,
    /// The stream broke off.
    Failed,
}

/// State change reported by a resource.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Signal {
    pub generation: Generation,
    pub kind: SignalKind,
}

/// Handed to a resource when it is opened, to report on its playback.
///
/// Stamps everything it sends with the generation of the session it belongs
/// to.
#[derive(Clone, Debug)]
pub struct Listener {
    generation: Generation,
    tx: mpsc::UnboundedSender<Signal>,
}

impl Listener {
    #[must_use]
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Sends a signal. Returns `false` when nobody is listening anymore.
    pub fn send(&self, kind: SignalKind) -> bool {
        self.tx
            .send(Signal {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }

    pub fn progress(&self, position: Duration) -> bool {
        self.send(SignalKind::Progress(position))
    }

    pub fn playing(&self, playing: bool) -> bool {
        self.send(SignalKind::Playing(playing))
    }

    pub fn ended(&self) -> bool {
        self.send(SignalKind::Ended)
    }

    pub fn failed(&self) -> bool {
        self.send(SignalKind::Failed)
    }
}

/// An audio-producing resource bound to one queue item.
pub trait Resource {
    fn play(&mut self);

    fn pause(&mut self);

    /// Moves playback to `position`.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying stream cannot seek there.
    fn seek(&mut self, position: Duration) -> Result<()>;

    /// Total playing time, if known.
    fn duration(&self) -> Option<Duration>;

    /// Stops playback for good and frees the output.
    fn release(self);
}

/// Opens resources for locators.
#[async_trait(?Send)]
pub trait Backend {
    type Resource: Resource;

    /// Opens a paused resource for `locator` that reports to `listener`.
    async fn open(&mut self, locator: &str, listener: Listener) -> Result<Self::Resource>;
}

struct Session<R> {
    resource: R,
    generation: Generation,
    item_id: String,
    created_at: Instant,
    release_at: Option<Instant>,
}

pub struct Manager<B: Backend> {
    backend: B,
    grace: Duration,
    events: events::Sender,
    signals: mpsc::UnboundedSender<Signal>,

    generation: Generation,
    active: Option<Session<B::Resource>>,
    retired: Vec<Session<B::Resource>>,

    /// Whether the UI was told that nothing is playing since the last
    /// session became active.
    stopped_announced: bool,
}

impl<B: Backend> Manager<B> {
    /// Creates a manager without any session.
    ///
    /// Resources will report on `signals`; the caller feeds whatever arrives
    /// on the other end back into [`relay`](Self::relay).
    #[must_use]
    pub fn new(
        backend: B,
        grace: Duration,
        events: events::Sender,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        Self {
            backend,
            grace,
            events,
            signals,
            generation: Generation::default(),
            active: None,
            retired: Vec::new(),
            stopped_announced: false,
        }
    }

    /// Makes `item` the active item, or deactivates playback on `None`.
    ///
    /// Activating the item that is already active does nothing.
    pub async fn set_active_item(&mut self, item: Option<QueueItem>, now: Instant) {
        let Some(item) = item else {
            self.retire_all(now);
            if !self.stopped_announced {
                events::emit(&self.events, Event::SetIsPlaying(false));
                events::emit(&self.events, Event::SetProgress(0.0));
                self.stopped_announced = true;
            }
            return;
        };

        if self
            .active
            .as_ref()
            .is_some_and(|session| session.item_id == item.id)
        {
            trace!("item {} is already active", item.id);
            return;
        }

        self.generation = self.generation.next();
        let generation = self.generation;
        let listener = Listener::new(generation, self.signals.clone());

        debug!("opening session {generation} for {item}");
        let opened = self.backend.open(&item.url, listener).await;

        // Silence the predecessors before the new session makes a sound.
        self.retire_all(now);
        self.stopped_announced = false;

        match opened {
            Ok(mut resource) => {
                resource.play();
                self.active = Some(Session {
                    resource,
                    generation,
                    item_id: item.id,
                    created_at: now,
                    release_at: None,
                });
            }
            Err(e) => {
                error!("failed to open {item}: {e}");
                events::emit(&self.events, Event::SetIsPlaying(false));
            }
        }
    }

    pub fn request_play(&mut self) {
        if let Some(session) = self.active.as_mut() {
            session.resource.play();
        }
    }

    pub fn request_pause(&mut self) {
        if let Some(session) = self.active.as_mut() {
            session.resource.pause();
        }
    }

    /// Seeks the active session to `fraction` of its duration.
    ///
    /// Ignored when nothing is active, the duration is unknown or zero, or
    /// `fraction` is not a number. Out of range fractions are clamped.
    pub fn request_seek(&mut self, fraction: f64) {
        if fraction.is_nan() {
            debug!("ignoring seek to NaN");
            return;
        }

        let Some(session) = self.active.as_mut() else {
            debug!("ignoring seek without an active session");
            return;
        };

        let Some(duration) = session
            .resource
            .duration()
            .filter(|duration| !duration.is_zero())
        else {
            debug!("ignoring seek: duration of {} is unknown", session.generation);
            return;
        };

        let position = duration.mul_f64(fraction.clamp(0.0, 1.0));
        if let Err(e) = session.resource.seek(position) {
            warn!("failed to seek {} to {position:?}: {e}", session.generation);
        }
    }

    /// Passes `signal` on to the UI if it comes from the active session.
    pub fn relay(&mut self, signal: Signal) {
        let Some(session) = self
            .active
            .as_ref()
            .filter(|session| session.generation == signal.generation)
        else {
            trace!("dropping stale signal {signal:?}");
            return;
        };

        let event = match signal.kind {
            SignalKind::Progress(position) => {
                let Some(duration) = session
                    .resource
                    .duration()
                    .filter(|duration| !duration.is_zero())
                else {
                    return;
                };
                let progress = position.as_secs_f64() / duration.as_secs_f64();
                Event::SetProgress(progress.clamp(0.0, 1.0))
            }
            SignalKind::Playing(playing) => Event::SetIsPlaying(playing),
            SignalKind::Ended => {
                debug!(
                    "session {} ended after {:?}",
                    session.generation,
                    session.created_at.elapsed()
                );
                Event::ActiveQueueItemEnded
            }
            SignalKind::Failed => Event::SetIsPlaying(false),
        };

        events::emit(&self.events, event);
    }

    /// The nearest instant at which a retired session is due for release.
    #[must_use]
    pub fn next_release(&self) -> Option<Instant> {
        self.retired
            .iter()
            .filter_map(|session| session.release_at)
            .min()
    }

    /// Releases every retired session whose grace period is over at `now`.
    ///
    /// Returns the number of sessions released.
    pub fn release_due(&mut self, now: Instant) -> usize {
        let (due, pending) = std::mem::take(&mut self.retired)
            .into_iter()
            .partition::<Vec<_>, _>(|session| session.release_at.is_some_and(|at| at <= now));
        self.retired = pending;

        let count = due.len();
        for session in due {
            Self::release(session);
        }

        count
    }

    /// Releases all sessions right away.
    pub fn shutdown(&mut self) {
        let sessions = self.active.take().into_iter().chain(self.retired.drain(..));
        for session in sessions {
            Self::release(session);
        }
    }

    #[must_use]
    pub fn active_generation(&self) -> Option<Generation> {
        self.active.as_ref().map(|session| session.generation)
    }

    /// Number of sessions waiting for release.
    #[must_use]
    pub fn retired(&self) -> usize {
        self.retired.len()
    }

    /// Pauses the active session and schedules it for release.
    fn retire_all(&mut self, now: Instant) {
        if let Some(mut session) = self.active.take() {
            debug!("retiring session {}", session.generation);
            session.resource.pause();
            session.release_at = Some(now + self.grace);
            self.retired.push(session);
        }
    }

    fn release(session: Session<B::Resource>) {
        debug!(
            "releasing session {} of item {}",
            session.generation, session.item_id
        );
        session.resource.release();
    }
}

impl<B: Backend> Drop for Manager<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
