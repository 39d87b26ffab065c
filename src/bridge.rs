//! The bridge between the UI and everything behind it.
//!
//! [`Bridge::start`] performs the bootstrap: it reads the signed-in user's
//! data from the remote store, combines it with the local settings and sends
//! the result to the UI as [`Event::Init`]. The returned bridge then takes
//! [`Command`]s one at a time through [`Bridge::handle`].
//!
//! Playback commands are handled inline by the session [`Manager`]. Tag
//! lookups and remote store writes run on background tasks, so that a slow
//! host never holds up the play button.
//!
//! # Example
//!
//! ```rust
//! let mut bridge = Bridge::start(player, pipeline, settings, session, events_tx).await?;
//!
//! loop {
//!     tokio::select! {
//!         Some(command) = commands.recv() => bridge.handle(command, Instant::now()).await,
//!         Some(signal) = signals.recv() => bridge.relay(signal),
//!     }
//! }
//! ```

use std::{future::Future, sync::Arc};

use serde_json::{Map, Value};
use tokio::{
    task::{JoinError, JoinSet},
    time::Instant,
};

use crate::{
    error::Result,
    events::{self, Event},
    fetch::Fetch,
    pipeline::Pipeline,
    player::{Backend, Manager, Signal},
    protocol::{Command, Flags, SettingsFlags, TagsContext},
    settings::Settings,
    store::RemoteStore,
    user::User,
};

/// A signed-in user and the store that holds their data.
#[derive(Clone)]
pub struct Session {
    pub user: User,
    pub store: Option<Arc<dyn RemoteStore>>,
}

pub struct Bridge<B: Backend, F> {
    player: Manager<B>,
    pipeline: Arc<Pipeline<F>>,
    settings: Settings,
    session: Option<Session>,
    events: events::Sender,

    /// `requestTags` invocations in flight.
    lookups: JoinSet<()>,

    /// Remote store writes in flight.
    writes: JoinSet<()>,
}

impl<B, F> Bridge<B, F>
where
    B: Backend,
    F: Fetch + 'static,
{
    /// Bootstraps the UI and returns the bridge that serves it.
    ///
    /// Emits [`Event::Init`] on success. Nothing is emitted on failure.
    ///
    /// # Errors
    ///
    /// Returns error if the user is signed in and their sources or tracks
    /// cannot be read from the remote store.
    pub async fn start(
        player: Manager<B>,
        pipeline: Pipeline<F>,
        settings: Settings,
        session: Option<Session>,
        events: events::Sender,
    ) -> Result<Self> {
        let (sources, tracks) = match &session {
            Some(Session {
                user,
                store: Some(store),
            }) => {
                debug!("loading data of user {}", user.uid);
                tokio::try_join!(
                    store.read(&user.uid, "sources"),
                    store.read(&user.uid, "tracks")
                )?
            }
            Some(Session { user, store: None }) => {
                warn!("no database configured: data of user {} is not synced", user.uid);
                (None, None)
            }
            None => (None, None),
        };

        let flags = Flags {
            settings: SettingsFlags {
                queue: settings.queue(),
            },
            sources,
            tracks,
            user: session.as_ref().map(|session| session.user.clone()),
        };

        match flags.user {
            Some(ref user) => info!("signed in as {}", user.uid),
            None => info!("not signed in"),
        }
        events::emit(&events, Event::Init(flags));

        Ok(Self {
            player,
            pipeline: Arc::new(pipeline),
            settings,
            session,
            events,
            lookups: JoinSet::new(),
            writes: JoinSet::new(),
        })
    }

    /// Handles one command from the UI at `now`.
    pub async fn handle(&mut self, command: Command, now: Instant) {
        trace!("handling {}", command.port());
        self.reap();

        match command {
            Command::Authenticate => self.authenticate(),
            Command::ActiveQueueItemChanged(item) => {
                self.player.set_active_item(item, now).await;
            }
            Command::RequestPlay => self.player.request_play(),
            Command::RequestPause => self.player.request_pause(),
            Command::RequestSeek(fraction) => self.player.request_seek(fraction),
            Command::RequestTags(context) => self.request_tags(context),
            Command::StoreSources(value) => self.store_remote("sources", value),
            Command::StoreTracks(value) => self.store_remote("tracks", value),
            Command::StoreQueueSettings(value) => {
                if let Err(e) = self.settings.save("queue", &value) {
                    error!(
                        "failed to save queue settings to {}: {e}",
                        self.settings.path().display()
                    );
                }
            }
        }
    }

    /// Handles `command` unless `interrupt` completes first.
    ///
    /// Returns `false` when interrupted. Opening a remote item waits on the
    /// network, and a shutdown request must not wait for that.
    pub async fn handle_or<I>(&mut self, command: Command, now: Instant, interrupt: I) -> bool
    where
        I: Future<Output = ()>,
    {
        tokio::select! {
            biased;

            () = interrupt => false,
            () = self.handle(command, now) => true,
        }
    }

    /// Passes a resource signal on to the session manager.
    pub fn relay(&mut self, signal: Signal) {
        self.player.relay(signal);
    }

    #[must_use]
    pub fn next_release(&self) -> Option<Instant> {
        self.player.next_release()
    }

    pub fn release_due(&mut self, now: Instant) -> usize {
        self.player.release_due(now)
    }

    /// Waits for all background work to finish.
    pub async fn settle(&mut self) {
        while let Some(result) = self.lookups.join_next().await {
            log_failure("tag lookup", result);
        }
        while let Some(result) = self.writes.join_next().await {
            log_failure("store write", result);
        }
    }

    /// Releases all playback and waits for pending writes.
    ///
    /// Tag lookups in flight are abandoned: there is nobody left to receive
    /// their results.
    pub async fn shutdown(mut self) {
        self.player.shutdown();
        self.lookups.abort_all();
        while let Some(result) = self.writes.join_next().await {
            log_failure("store write", result);
        }
    }

    fn authenticate(&self) {
        match self.session {
            Some(ref session) => info!("already signed in as {}", session.user.uid),
            None => info!(
                "to sign in, put a [user] table with your uid and tokens in the secrets \
                 file and restart"
            ),
        }
    }

    fn request_tags(&mut self, context: TagsContext) {
        let pipeline = Arc::clone(&self.pipeline);
        let events = self.events.clone();

        debug!("looking up tags of {} items", context.urls_for_tags.len());
        self.lookups.spawn(async move {
            let results = pipeline.fetch_all(&context.urls_for_tags).await;
            events::emit(&events, Event::ReceiveTags(context.with_results(results)));
        });
    }

    fn store_remote(&mut self, key: &'static str, value: Value) {
        let Some(Session {
            user,
            store: Some(store),
        }) = self.session.as_ref()
        else {
            warn!("not storing {key}: not signed in to a database");
            return;
        };

        let store = Arc::clone(store);
        let uid = user.uid.clone();
        let mut entries = Map::new();
        entries.insert(key.to_owned(), value);

        self.writes.spawn(async move {
            if let Err(e) = store.merge(&uid, entries).await {
                error!("failed to store {key}: {e}");
            }
        });
    }

    /// Collects finished background tasks.
    fn reap(&mut self) {
        while let Some(result) = self.lookups.try_join_next() {
            log_failure("tag lookup", result);
        }
        while let Some(result) = self.writes.try_join_next() {
            log_failure("store write", result);
        }
    }
}

/// Logs a background task that panicked. A panicked lookup never sends its
/// results.
fn log_failure(task: &str, result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        error!("{task} task failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        error::Error,
        player::{Listener, Resource},
        protocol::{TagRequest, TagResult, Tags},
    };

    struct Silent;

    impl Resource for Silent {
        fn play(&mut self) {}
        fn pause(&mut self) {}
        fn seek(&mut self, _position: Duration) -> Result<()> {
            Ok(())
        }
        fn duration(&self) -> Option<Duration> {
            None
        }
        fn release(self) {}
    }

    struct SilentBackend;

    #[async_trait(?Send)]
    impl Backend for SilentBackend {
        type Resource = Silent;

        async fn open(&mut self, _locator: &str, _listener: Listener) -> Result<Silent> {
            Ok(Silent)
        }
    }

    /// Serves `{"title": <url>}` for every URL except `bad`.
    struct EchoFetcher;

    #[async_trait]
    impl Fetch for EchoFetcher {
        async fn fetch(&self, request: &TagRequest) -> Result<Vec<u8>> {
            if request.get_url == "bad" {
                return Err(Error::unavailable("connection refused"));
            }
            Ok(serde_json::to_vec(&json!({ "title": request.get_url }))?)
        }
    }

    fn json_parser(data: &[u8], _extension: Option<&str>) -> Result<Tags> {
        Ok(serde_json::from_slice(data)?)
    }

    #[derive(Default)]
    struct FakeStore {
        data: Mutex<HashMap<String, Value>>,
        merges: Mutex<Vec<(String, Map<String, Value>)>>,
        broken: bool,
        panicking: bool,
    }

    #[async_trait]
    impl RemoteStore for FakeStore {
        async fn read(&self, uid: &str, key: &str) -> Result<Option<Value>> {
            if self.broken {
                return Err(Error::unavailable("database is down"));
            }
            Ok(self.data.lock().unwrap().get(&format!("{uid}/{key}")).cloned())
        }

        async fn merge(&self, uid: &str, entries: Map<String, Value>) -> Result<()> {
            assert!(!self.panicking, "merge of {uid} blew up");
            self.merges.lock().unwrap().push((uid.to_owned(), entries));
            Ok(())
        }
    }

    fn user() -> User {
        User {
            uid: "u1".to_owned(),
            display_name: Some("Listener".to_owned()),
            email: None,
            photo_url: None,
            refresh_token: None,
        }
    }

    struct Harness {
        bridge: Bridge<SilentBackend, EchoFetcher>,
        events: events::Receiver,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn events(&mut self) -> Vec<Event> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    async fn start(session: Option<Session>) -> Result<Harness> {
        let dir = tempfile::tempdir()?;
        let settings = Settings::open(dir.path().join("settings.json"))?;
        let (events_tx, events) = mpsc::unbounded_channel();
        let (signals_tx, _) = mpsc::unbounded_channel();

        let player = Manager::new(
            SilentBackend,
            Duration::from_millis(500),
            events_tx.clone(),
            signals_tx,
        );
        let pipeline = Pipeline::new(EchoFetcher).with_parser(json_parser);

        let bridge = Bridge::start(player, pipeline, settings, session, events_tx).await?;
        Ok(Harness {
            bridge,
            events,
            _dir: dir,
        })
    }

    fn signed_in(store: &Arc<FakeStore>) -> Option<Session> {
        Some(Session {
            user: user(),
            store: Some(Arc::clone(store) as Arc<dyn RemoteStore>),
        })
    }

    #[tokio::test]
    async fn signed_out_init_has_defaults() {
        let mut h = start(None).await.unwrap();

        let events = h.events();
        let [Event::Init(flags)] = events.as_slice() else {
            panic!("expected init, got {events:?}");
        };
        assert_eq!(flags.settings.queue, json!({ "repeat": false, "shuffle": false }));
        assert_eq!(flags.user, None);
        assert_eq!(flags.sources, None);
        assert_eq!(flags.tracks, None);
    }

    #[tokio::test]
    async fn signed_in_init_carries_remote_data() {
        let store = Arc::new(FakeStore::default());
        store
            .data
            .lock()
            .unwrap()
            .insert("u1/sources".to_owned(), json!({ "s1": { "kind": "ipfs" } }));

        let mut h = start(signed_in(&store)).await.unwrap();

        let events = h.events();
        let [Event::Init(flags)] = events.as_slice() else {
            panic!("expected init, got {events:?}");
        };
        assert_eq!(flags.user.as_ref().map(|user| user.uid.as_str()), Some("u1"));
        assert_eq!(flags.sources, Some(json!({ "s1": { "kind": "ipfs" } })));
        assert_eq!(flags.tracks, None);
    }

    #[tokio::test]
    async fn bootstrap_fails_when_store_is_unreadable() {
        let store = Arc::new(FakeStore {
            broken: true,
            ..FakeStore::default()
        });

        assert!(start(signed_in(&store)).await.is_err());
    }

    #[tokio::test]
    async fn panicked_writes_do_not_stall_the_bridge() {
        let store = Arc::new(FakeStore {
            panicking: true,
            ..FakeStore::default()
        });
        let mut h = start(signed_in(&store)).await.unwrap();

        h.bridge
            .handle(Command::StoreSources(json!({})), Instant::now())
            .await;
        h.bridge.settle().await;

        h.bridge
            .handle(Command::StoreTracks(json!([])), Instant::now())
            .await;
        h.bridge.shutdown().await;
        assert!(store.merges.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_commands_merge_under_their_key() {
        let store = Arc::new(FakeStore::default());
        let mut h = start(signed_in(&store)).await.unwrap();

        let now = Instant::now();
        h.bridge
            .handle(Command::StoreSources(json!({ "s1": {} })), now)
            .await;
        h.bridge
            .handle(Command::StoreTracks(json!([{ "id": "t1" }])), now)
            .await;
        h.bridge.settle().await;

        let merges = store.merges.lock().unwrap();
        assert_eq!(merges.len(), 2);
        assert!(merges.iter().all(|(uid, _)| uid == "u1"));
        assert_eq!(merges[0].1.get("sources"), Some(&json!({ "s1": {} })));
        assert_eq!(merges[1].1.get("tracks"), Some(&json!([{ "id": "t1" }])));
    }

    #[tokio::test]
    async fn store_commands_are_skipped_when_signed_out() {
        let mut h = start(None).await.unwrap();
        h.bridge
            .handle(Command::StoreSources(json!({})), Instant::now())
            .await;
        h.bridge.settle().await;
        assert_eq!(h.events().len(), 1);
    }

    #[tokio::test]
    async fn queue_settings_are_persisted() {
        let mut h = start(None).await.unwrap();
        let path = h.bridge.settings.path().to_owned();

        h.bridge
            .handle(
                Command::StoreQueueSettings(json!({ "repeat": true, "shuffle": true })),
                Instant::now(),
            )
            .await;

        let reopened = Settings::open(path).unwrap();
        assert_eq!(reopened.queue(), json!({ "repeat": true, "shuffle": true }));
    }

    #[tokio::test]
    async fn tags_are_returned_with_context() {
        let mut h = start(None).await.unwrap();
        h.events();

        let context: TagsContext = serde_json::from_value(json!({
            "urlsForTags": [{ "getUrl": "ok1" }, { "getUrl": "bad" }, { "getUrl": "ok2" }],
            "sourceId": "s1",
        }))
        .unwrap();
        h.bridge
            .handle(Command::RequestTags(context), Instant::now())
            .await;
        h.bridge.settle().await;

        let events = h.events();
        let [Event::ReceiveTags(context)] = events.as_slice() else {
            panic!("expected tags, got {events:?}");
        };
        assert_eq!(context.rest["sourceId"], "s1");

        let results = context.received_tags.as_ref().unwrap();
        assert_eq!(results.len(), 3);
        assert!(matches!(&results[0], TagResult::Found(tags) if tags.title.as_deref() == Some("ok1")));
        assert_eq!(results[1], TagResult::Unavailable);
        assert!(matches!(&results[2], TagResult::Found(tags) if tags.title.as_deref() == Some("ok2")));
    }

    #[tokio::test]
    async fn deactivation_reaches_the_ui() {
        let mut h = start(None).await.unwrap();
        h.events();

        h.bridge
            .handle(Command::ActiveQueueItemChanged(None), Instant::now())
            .await;

        assert_eq!(
            h.events(),
            [Event::SetIsPlaying(false), Event::SetProgress(0.0)]
        );
    }

    #[tokio::test]
    async fn shutdown_releases_sessions() {
        let mut h = start(None).await.unwrap();
        let item = serde_json::from_value(json!({ "id": "1", "url": "a.mp3" })).unwrap();
        let t0 = Instant::now();

        h.bridge
            .handle(Command::ActiveQueueItemChanged(Some(item)), t0)
            .await;
        h.bridge
            .handle(Command::ActiveQueueItemChanged(None), t0)
            .await;
        assert_eq!(h.bridge.next_release(), Some(t0 + Duration::from_millis(500)));

        h.bridge.shutdown().await;
    }

    struct StalledBackend;

    #[async_trait(?Send)]
    impl Backend for StalledBackend {
        type Resource = Silent;

        async fn open(&mut self, _locator: &str, _listener: Listener) -> Result<Silent> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_cuts_a_stalled_open_short() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::open(dir.path().join("settings.json")).unwrap();
        let (events_tx, _events) = mpsc::unbounded_channel();
        let (signals_tx, _) = mpsc::unbounded_channel();
        let player = Manager::new(
            StalledBackend,
            Duration::from_millis(500),
            events_tx.clone(),
            signals_tx,
        );
        let pipeline = Pipeline::new(EchoFetcher).with_parser(json_parser);
        let mut bridge = Bridge::start(player, pipeline, settings, None, events_tx)
            .await
            .unwrap();

        let item = serde_json::from_value(json!({ "id": "1", "url": "a.mp3" })).unwrap();
        let interrupt = tokio::time::sleep(Duration::from_secs(1));
        let handled = bridge
            .handle_or(
                Command::ActiveQueueItemChanged(Some(item)),
                Instant::now(),
                interrupt,
            )
            .await;
        assert!(!handled);

        let handled = bridge
            .handle_or(
                Command::RequestPause,
                Instant::now(),
                std::future::pending(),
            )
            .await;
        assert!(handled);

        bridge.shutdown().await;
    }
}
