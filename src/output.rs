//! Audio output on the default device with `rodio`.
//!
//! [`Output`] is the production [`Backend`] of the session manager. Every
//! resource it opens is a [`Playback`]: a `rodio` sink fed by a Symphonia
//! [`Decoder`], plus a watcher task that polls the sink and reports its
//! state through the session's [`Listener`].
//!
//! The output device is opened on first use and kept for the lifetime of
//! the process. A machine without a device can still serve tags; playback
//! requests then fail one by one.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tokio_util::sync::CancellationToken;

use crate::{
    audio_file::{AudioFile, Locator},
    decoder::Decoder,
    error::Result,
    http::Client as HttpClient,
    player::{Backend, Listener, Resource},
};

/// Interval at which the watcher looks at a sink.
const WATCH_INTERVAL: Duration = Duration::from_millis(250);

pub struct Output {
    http_client: HttpClient,

    /// Dropping the stream closes the device, so it is kept with its handle.
    device: Option<(OutputStream, OutputStreamHandle)>,
}

impl Output {
    #[must_use]
    pub fn new(http_client: HttpClient) -> Self {
        Self {
            http_client,
            device: None,
        }
    }

    fn handle(&mut self) -> Result<&OutputStreamHandle> {
        let device = match self.device.take() {
            Some(device) => device,
            None => {
                let device = OutputStream::try_default()?;
                info!("opened default audio output");
                device
            }
        };

        let (_, handle) = self.device.insert(device);
        Ok(handle)
    }
}

#[async_trait(?Send)]
impl Backend for Output {
    type Resource = Playback;

    async fn open(&mut self, locator: &str, listener: Listener) -> Result<Playback> {
        let locator = Locator::parse(locator)?;
        let extension = locator.extension();

        let file = AudioFile::open(&locator, &self.http_client.unlimited).await?;
        let decoder =
            tokio::task::spawn_blocking(move || Decoder::new(file, extension.as_deref())).await??;

        let duration = rodio::Source::total_duration(&decoder);
        let failed = decoder.failure_flag();

        let sink = Sink::try_new(self.handle()?)?;
        sink.pause();
        sink.append(decoder);
        let sink = Arc::new(sink);

        let cancel = CancellationToken::new();
        tokio::spawn(watch(
            Arc::clone(&sink),
            failed,
            listener.clone(),
            cancel.clone(),
        ));

        debug!(
            "session {} ready, duration {duration:?}",
            listener.generation()
        );

        Ok(Playback {
            sink,
            duration,
            cancel,
        })
    }
}

/// One queue item playing on the output device.
pub struct Playback {
    sink: Arc<Sink>,
    duration: Option<Duration>,
    cancel: CancellationToken,
}

impl Resource for Playback {
    fn play(&mut self) {
        self.sink.play();
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.sink.try_seek(position)?;
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn release(self) {
        drop(self);
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.sink.stop();
    }
}

/// Reports the state of `sink` until it runs dry or `cancel` fires.
async fn watch(
    sink: Arc<Sink>,
    failed: Arc<AtomicBool>,
    listener: Listener,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(WATCH_INTERVAL);
    let mut was_playing = false;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if sink.empty() {
            let delivered = if failed.load(Ordering::Acquire) {
                listener.failed()
            } else {
                listener.progress(sink.get_pos()) && listener.ended()
            };
            if !delivered {
                trace!("listener of session {} is gone", listener.generation());
            }
            break;
        }

        let playing = !sink.is_paused();
        let mut delivered = true;
        if playing != was_playing {
            delivered &= listener.playing(playing);
            was_playing = playing;
        }
        if playing {
            delivered &= listener.progress(sink.get_pos());
        }

        if !delivered {
            break;
        }
    }
}
