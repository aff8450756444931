// Playback loader - the object a host application talks to
//
// The loader owns:
// - the reactive store (playhead, look-ahead, metadata, stream settings)
// - the timeslice buffer
// - the transport session (socket schedules only)
// - one schedule deciding which data to request
//
// Hosts drive it with `connect()`, `seek()` and `pump()`/`run()`, listen for
// lifecycle events with `on()`, subscribe to store changes with `subscribe()`,
// and read derived values such as `current_frame()` through memoized selectors.

use crate::buffer::{BufferStats, TimesliceBuffer, TimesliceStore};
use crate::config::{FileOptions, LiveOptions, LoaderConfig, RequestParams, StreamOptions};
use crate::decoder::{JsonDecoder, MessageDecoder};
use crate::events::{EventBus, ListenerId, LoaderEvent, LoaderEventKind};
use crate::range::{self, ComplexRange, SimpleRange};
use crate::scheduler::{
    ChunkSource, ChunkedFileScheduler, HttpChunkSource, LiveTailScheduler, Schedule,
    WindowScheduler,
};
use crate::store::{
    Identity, ReactiveStore, Selector, StateKey, StateValue, SubscriptionId, TickScheduler,
    TokioTick,
};
use crate::transport::{should_retry, SocketConnector, SocketEvent, TransportSession, WebSocketConnector};
use crate::types::{
    Envelope, Frame, LoaderError, LoaderResult, LoaderStats, LogMetadata, RawMessage,
    SessionState, StreamMap, StreamSettings, Timeslice,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-stream metadata entry carried inside timeslice stream values
const STREAM_METADATA_KEY: &str = "__metadata";

pub struct LoaderCore {
    id: Uuid,
    store: ReactiveStore,
    events: EventBus,
    decoder: Box<dyn MessageDecoder>,
    buffer: Box<dyn TimesliceStore>,
    schedule: Schedule,
    transport: Option<TransportSession>,
    pending_chunk: Option<f64>,
    // Socket failure held until the closure that follows decides on a reconnect
    socket_error: Option<String>,
    data_updates: u64,
    stats: LoaderStats,

    // Memoized selectors
    log_start_time: Selector<Option<f64>>,
    log_end_time: Selector<Option<f64>>,
    streams_metadata: Selector<Arc<StreamMap>>,
    buffered_time_ranges: Selector<Vec<SimpleRange>>,
    raw_frame: Selector<Option<Arc<Frame>>>,
    current_frame: Selector<Option<Arc<Frame>>>,
}

impl LoaderCore {
    fn with_schedule(schedule: Schedule, transport: Option<TransportSession>) -> Self {
        let mut buffer: Box<dyn TimesliceStore> = Box::new(TimesliceBuffer::default());
        schedule.configure_buffer(&mut *buffer);

        let loader = Self {
            id: Uuid::new_v4(),
            store: ReactiveStore::new(Arc::new(TokioTick::default())),
            events: EventBus::new(),
            decoder: Box::new(JsonDecoder::new()),
            buffer,
            schedule,
            transport,
            pending_chunk: None,
            socket_error: None,
            data_updates: 0,
            stats: LoaderStats::default(),
            log_start_time: Selector::new(),
            log_end_time: Selector::new(),
            streams_metadata: Selector::new(),
            buffered_time_ranges: Selector::new(),
            raw_frame: Selector::new(),
            current_frame: Selector::new(),
        };

        info!("[{}] Created {} loader", loader.id, loader.schedule.kind());
        loader
    }

    /// Seekable log served over a socket
    pub fn stream(options: &StreamOptions, connector: Arc<dyn SocketConnector>) -> LoaderResult<Self> {
        let params = RequestParams::for_stream(options)?;
        let transport = TransportSession::new(params.url.clone(), params.retry.clone(), connector);
        Ok(Self::with_schedule(
            Schedule::Stream(WindowScheduler::new(params)),
            Some(transport),
        ))
    }

    /// Live log served over a socket
    pub fn live(options: &LiveOptions, connector: Arc<dyn SocketConnector>) -> LoaderResult<Self> {
        let params = RequestParams::for_live(options)?;
        let transport = TransportSession::new(params.url.clone(), params.retry.clone(), connector);
        Ok(Self::with_schedule(
            Schedule::Live(LiveTailScheduler::new(params.buffer_length)),
            Some(transport),
        ))
    }

    /// Log served as fixed-duration chunks
    pub fn file(options: &FileOptions, source: Arc<dyn ChunkSource>) -> LoaderResult<Self> {
        let chunked = ChunkedFileScheduler::new(options, source)?;
        Ok(Self::with_schedule(Schedule::File(chunked), None))
    }

    /// Replace the notification scheduler. Call before connecting.
    pub fn with_ticker(mut self, ticker: Arc<dyn TickScheduler>) -> Self {
        self.store = ReactiveStore::new(ticker);
        self
    }

    pub fn with_decoder(mut self, decoder: Box<dyn MessageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replace the timeslice store. Call before connecting.
    pub fn with_buffer(mut self, mut buffer: Box<dyn TimesliceStore>) -> Self {
        self.schedule.configure_buffer(&mut *buffer);
        self.buffer = buffer;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn store(&self) -> &ReactiveStore {
        &self.store
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats.clone()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.get_stats()
    }

    pub fn session_state(&self) -> SessionState {
        match (&self.schedule, &self.transport) {
            (Schedule::File(chunked), _) if chunked.is_open() => SessionState::Open,
            (_, Some(transport)) => transport.state(),
            _ => SessionState::Closed,
        }
    }

    // Connection

    /// Open the log. Socket schedules retry per the configured budget and
    /// return the terminal error (also emitted as an `error` event).
    pub async fn connect(&mut self) -> LoaderResult<()> {
        if let Schedule::File(chunked) = &mut self.schedule {
            let anchor = chunked.open()?;
            info!("[{}] Opened chunked log at {}", self.id, anchor);
            self.pending_chunk = Some(anchor);
            self.drain_chunks().await;
            return Ok(());
        }

        if let Err(e) = self.open_transport().await {
            if e != LoaderError::AlreadyConnected {
                self.report_error(e.clone());
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        match &self.schedule {
            Schedule::File(chunked) => chunked.is_open(),
            _ => self.transport.as_ref().is_some_and(|t| t.is_open()),
        }
    }

    pub fn close(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
        if let Schedule::File(chunked) = &mut self.schedule {
            chunked.close();
        }
        self.pending_chunk = None;
        info!("[{}] Loader closed", self.id);
    }

    /// Wait for one socket event and handle it. Returns false once the
    /// session has ended and nothing more will arrive.
    pub async fn pump(&mut self) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        // A reconnect dropped mid-way (pump raced in select!) leaves the session connecting
        if transport.state() == SessionState::Connecting {
            if let Err(e) = self.open_transport().await {
                self.report_error(e);
                return false;
            }
            return true;
        }
        let Some(event) = transport.next_event().await else {
            return false;
        };

        match event {
            SocketEvent::Message(raw) => self.handle_message(&raw),
            SocketEvent::Error(message) => {
                warn!("[{}] Socket error: {}", self.id, message);
                self.socket_error = Some(message);
            }
            SocketEvent::Closed(close) => {
                let socket_error = self.socket_error.take();
                if !should_retry(Some(&close), true) {
                    info!("[{}] Log stream ended (code {})", self.id, close.code);
                    if let Some(message) = socket_error {
                        self.report_error(LoaderError::Connection(message));
                    }
                    return false;
                }

                warn!(
                    "[{}] Socket closed abnormally (code {}), reconnecting",
                    self.id, close.code
                );
                self.stats.reconnects += 1;
                if let Err(e) = self.open_transport().await {
                    self.report_error(e);
                    return false;
                }
            }
        }
        true
    }

    /// Pump until the session ends
    pub async fn run(&mut self) {
        while self.pump().await {}
    }

    async fn open_transport(&mut self) -> LoaderResult<()> {
        let transport = self.transport.as_mut().ok_or_else(|| {
            LoaderError::Configuration("loader has no socket transport".to_string())
        })?;
        transport.connect().await?;

        let protocol = transport.protocol()?;
        if let Schedule::Stream(window) = &mut self.schedule {
            window.on_open(protocol)?;
            self.stats.requests_issued += 1;
        }
        Ok(())
    }

    async fn drain_chunks(&mut self) {
        while let Some(anchor) = self.pending_chunk.take() {
            let (source, duration) = match &self.schedule {
                Schedule::File(chunked) if chunked.is_open() => (chunked.source(), chunked.duration()),
                _ => return,
            };

            debug!("[{}] Loading chunk [{}, {})", self.id, anchor, anchor + duration);
            let messages = match source.fetch_chunk(anchor, duration).await {
                Ok(messages) => messages,
                Err(e) => {
                    self.report_error(e);
                    continue;
                }
            };

            self.stats.chunks_fetched += 1;
            if let Schedule::File(chunked) = &mut self.schedule {
                chunked.commit(anchor);
            }
            for message in &messages {
                self.handle_message(message);
            }
        }
    }

    // Playback control

    /// Move the playhead. Live loaders ignore host seeks once data is flowing.
    pub async fn seek(&mut self, timestamp: f64) {
        if let Schedule::Live(live) = &self.schedule {
            if live.follows_tip() {
                debug!(
                    "[{}] Ignoring seek to {} while following live data",
                    self.id, timestamp
                );
                return;
            }
        }

        self.seek_now(timestamp);
        self.drain_chunks().await;
    }

    /// Clamp, publish and hand the playhead to the schedule
    fn seek_now(&mut self, timestamp: f64) -> f64 {
        let metadata = self.metadata();
        let timestamp = match metadata.as_deref() {
            Some(LogMetadata {
                start_time: Some(start),
                end_time: Some(end),
                ..
            }) if start.is_finite() && end.is_finite() => timestamp.max(*start).min(*end),
            _ => timestamp,
        };

        self.store.set(StateKey::Timestamp, StateValue::Number(timestamp));
        let mut data_changed = self.buffer.set_current_time(timestamp);
        let mut failure = None;

        match &mut self.schedule {
            Schedule::Stream(window) => {
                let protocol = self.transport.as_ref().and_then(|t| t.protocol().ok());
                match window.reposition(timestamp, metadata.as_deref(), &mut *self.buffer, protocol)
                {
                    Ok(outcome) => {
                        data_changed |= outcome.pruned;
                        if outcome.request_id.is_some() {
                            self.stats.requests_issued += 1;
                        }
                    }
                    Err(e) => {
                        data_changed = true;
                        failure = Some(e);
                    }
                }
            }
            Schedule::Live(_) => {}
            Schedule::File(chunked) => {
                if let Some(anchor) = chunked.chunk_to_fetch(timestamp) {
                    self.pending_chunk = Some(anchor);
                }
            }
        }

        if data_changed {
            self.bump_data_version();
        }
        if let Some(e) = failure {
            self.report_error(e);
        }
        timestamp
    }

    pub fn set_look_ahead(&self, look_ahead: f64) {
        self.store.set(StateKey::LookAhead, StateValue::Number(look_ahead));
    }

    /// Merge `settings` into the current stream settings
    pub fn update_stream_settings(&self, settings: StreamSettings) {
        let mut merged = self
            .stream_settings()
            .map(|current| (*current).clone())
            .unwrap_or_default();
        merged.extend(settings);
        self.store
            .set(StateKey::StreamSettings, StateValue::StreamSettings(Arc::new(merged)));
    }

    // Inbound dispatch

    /// Decode one raw message and dispatch it
    pub fn handle_message(&mut self, message: &RawMessage) {
        match self.decoder.decode(message) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => {
                self.stats.protocol_errors += 1;
                self.report_error(e);
            }
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Metadata(metadata) => {
                if self.apply_metadata(Arc::clone(&metadata)) {
                    self.events.emit(LoaderEvent::Ready(metadata));
                }
            }
            Envelope::Timeslice(timeslice) => {
                if self.apply_timeslice(Arc::clone(&timeslice)) {
                    self.events.emit(LoaderEvent::Update(timeslice));
                }
            }
            Envelope::Done => {
                info!("[{}] Server finished sending data", self.id);
                self.events.emit(LoaderEvent::Finish);
            }
            Envelope::Unknown { tag } => {
                self.stats.protocol_errors += 1;
                self.report_error(LoaderError::Protocol(format!(
                    "Unexpected message type: {}",
                    tag
                )));
            }
        }
    }

    fn apply_metadata(&mut self, metadata: Arc<LogMetadata>) -> bool {
        if self.metadata().is_some() {
            debug!("[{}] Ignoring duplicate metadata", self.id);
            return false;
        }

        info!(
            "[{}] Log metadata: start {:?}, end {:?}, {} streams",
            self.id,
            metadata.start_time,
            metadata.end_time,
            metadata.streams.len()
        );
        self.store
            .set(StateKey::Metadata, StateValue::Metadata(Arc::clone(&metadata)));

        if !metadata.streams.is_empty() {
            let mut settings: StreamSettings = metadata
                .streams
                .keys()
                .map(|name| (name.clone(), true))
                .collect();
            // Choices the host made before metadata arrived win
            if let Some(existing) = self.stream_settings() {
                settings.extend(existing.iter().map(|(name, on)| (name.clone(), *on)));
            }
            self.store
                .set(StateKey::StreamSettings, StateValue::StreamSettings(Arc::new(settings)));
        }

        let requested = match &self.schedule {
            Schedule::Stream(window) => window.params().timestamp,
            _ => None,
        };
        let target = self
            .current_time()
            .filter(|t| t.is_finite())
            .or(requested)
            .or(metadata.start_time)
            .filter(|t| t.is_finite());
        if let Some(timestamp) = target {
            self.seek_now(timestamp);
        }
        true
    }

    /// Store a timeslice. Returns false when it was dropped as stale.
    fn apply_timeslice(&mut self, timeslice: Arc<Timeslice>) -> bool {
        self.stats.timeslices_received += 1;

        if let Schedule::Stream(window) = &self.schedule {
            if !window.accepts(&timeslice) {
                self.stats.stale_timeslices += 1;
                debug!(
                    "[{}] Dropping stale timeslice at {} (request {:?})",
                    self.id, timeslice.timestamp, timeslice.request_id
                );
                return false;
            }
        }

        if self.buffer.insert(Arc::clone(&timeslice)) {
            self.bump_data_version();
            if let Schedule::Stream(window) = &mut self.schedule {
                window.record(timeslice.timestamp);
            }
        }

        self.discover_streams(&timeslice);

        if let Schedule::Live(live) = &mut self.schedule {
            live.follow(timeslice.timestamp);
            self.seek_now(timeslice.timestamp);
        }
        true
    }

    /// Enable streams seen for the first time and publish their metadata
    fn discover_streams(&mut self, timeslice: &Timeslice) {
        let settings = self.stream_settings();
        let new_streams: Vec<&String> = timeslice
            .streams
            .keys()
            .filter(|name| !settings.as_ref().is_some_and(|s| s.contains_key(*name)))
            .collect();
        if new_streams.is_empty() {
            return;
        }

        debug!("[{}] Discovered streams {:?}", self.id, new_streams);

        let mut next_settings = settings.map(|s| (*s).clone()).unwrap_or_default();
        let mut streams_metadata = self.dynamic_streams_metadata();
        let mut metadata_changed = false;
        for name in new_streams {
            next_settings.insert(name.clone(), true);
            if let Some(meta) = timeslice
                .streams
                .get(name)
                .and_then(|value| value.get(STREAM_METADATA_KEY))
            {
                streams_metadata.insert(name.clone(), meta.clone());
                metadata_changed = true;
            }
        }

        self.store.set(
            StateKey::StreamSettings,
            StateValue::StreamSettings(Arc::new(next_settings)),
        );
        if metadata_changed {
            self.store.set(
                StateKey::StreamsMetadata,
                StateValue::StreamsMetadata(Arc::new(streams_metadata)),
            );
        }
    }

    fn dynamic_streams_metadata(&self) -> StreamMap {
        match self.store.get(StateKey::StreamsMetadata) {
            Some(StateValue::StreamsMetadata(map)) => (*map).clone(),
            _ => StreamMap::new(),
        }
    }

    fn bump_data_version(&mut self) {
        self.data_updates += 1;
        self.store.set(
            StateKey::DataVersion,
            StateValue::Number(self.data_updates as f64),
        );
    }

    fn report_error(&self, e: LoaderError) {
        error!("[{}] {}", self.id, e);
        self.events.emit(LoaderEvent::Error(e));
    }

    // Events and subscriptions

    pub fn on<F>(&self, kind: LoaderEventKind, handler: F) -> ListenerId
    where
        F: Fn(&LoaderEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    pub fn off(&self, kind: LoaderEventKind, id: ListenerId) -> bool {
        self.events.off(kind, id)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    // State queries

    pub fn current_time(&self) -> Option<f64> {
        self.store.get_number(StateKey::Timestamp)
    }

    pub fn look_ahead(&self) -> f64 {
        self.store.get_number(StateKey::LookAhead).unwrap_or(0.0)
    }

    pub fn metadata(&self) -> Option<Arc<LogMetadata>> {
        match self.store.get(StateKey::Metadata) {
            Some(StateValue::Metadata(metadata)) => Some(metadata),
            _ => None,
        }
    }

    pub fn stream_settings(&self) -> Option<Arc<StreamSettings>> {
        match self.store.get(StateKey::StreamSettings) {
            Some(StateValue::StreamSettings(settings)) => Some(settings),
            _ => None,
        }
    }

    /// Time ranges the schedule considers loaded
    pub fn buffer_range(&self) -> ComplexRange {
        self.schedule.buffer_range(&*self.buffer)
    }

    pub fn buffer_start(&self) -> Option<f64> {
        self.schedule
            .buffer_bounds(&*self.buffer, self.metadata().as_deref())
            .map(|bounds| bounds.start)
    }

    pub fn buffer_end(&self) -> Option<f64> {
        self.schedule
            .buffer_bounds(&*self.buffer, self.metadata().as_deref())
            .map(|bounds| bounds.end)
    }

    pub fn log_start_time(&self) -> Option<f64> {
        self.log_start_time.select(
            self.store.version(),
            || vec![self.store.identity(StateKey::Metadata)],
            || self.metadata().and_then(|m| m.start_time),
        )
    }

    pub fn log_end_time(&self) -> Option<f64> {
        self.log_end_time.select(
            self.store.version(),
            || vec![self.store.identity(StateKey::Metadata)],
            || self.metadata().and_then(|m| m.end_time),
        )
    }

    /// Stream descriptions: discovered per-stream metadata overlaid with the
    /// declarations from the log metadata
    pub fn streams_metadata(&self) -> Arc<StreamMap> {
        self.streams_metadata.select(
            self.store.version(),
            || {
                vec![
                    self.store.identity(StateKey::Metadata),
                    self.store.identity(StateKey::StreamsMetadata),
                ]
            },
            || {
                let mut merged = self.dynamic_streams_metadata();
                if let Some(metadata) = self.metadata() {
                    merged.extend(
                        metadata
                            .streams
                            .iter()
                            .map(|(name, value)| (name.clone(), value.clone())),
                    );
                }
                Arc::new(merged)
            },
        )
    }

    /// Span of data actually held in the buffer
    pub fn buffered_time_ranges(&self) -> Vec<SimpleRange> {
        self.buffered_time_ranges.select(
            self.store.version(),
            || vec![self.store.identity(StateKey::DataVersion)],
            || match self.buffer.loaded_time_range() {
                // A lone timeslice spans nothing
                Some(loaded) => range::add(loaded, &range::empty()).ranges().to_vec(),
                None => Vec::new(),
            },
        )
    }

    fn raw_frame(&self) -> Option<Arc<Frame>> {
        self.raw_frame.select(
            self.store.version(),
            || {
                vec![
                    self.store.identity(StateKey::Timestamp),
                    self.store.identity(StateKey::LookAhead),
                    self.store.identity(StateKey::DataVersion),
                ]
            },
            || {
                let timestamp = self.current_time().filter(|t| t.is_finite())?;
                self.buffer
                    .current_frame(timestamp, self.look_ahead())
                    .map(Arc::new)
            },
        )
    }

    /// Stream values at the playhead, limited to enabled streams
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        let raw = self.raw_frame();
        self.current_frame.select(
            self.store.version(),
            || {
                vec![
                    self.store.identity(StateKey::StreamSettings),
                    Identity::of_option(&raw),
                ]
            },
            || {
                let frame = raw.as_ref()?;
                let Some(settings) = self.stream_settings() else {
                    return Some(Arc::clone(frame));
                };

                let streams: StreamMap = frame
                    .streams
                    .iter()
                    .filter(|(name, _)| settings.get(*name).copied().unwrap_or(false))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                if streams.len() == frame.streams.len() {
                    return Some(Arc::clone(frame));
                }
                Some(Arc::new(Frame {
                    timestamp: frame.timestamp,
                    look_ahead: frame.look_ahead,
                    streams,
                }))
            },
        )
    }

    /// How many times the filtered frame was recomputed
    pub fn frame_evaluations(&self) -> u64 {
        self.current_frame.evaluations()
    }
}

impl Drop for LoaderCore {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
    }
}

/// Build a loader for a tagged configuration, wired to the WebSocket
/// connector or the HTTP chunk source
pub fn create_loader(config: &LoaderConfig) -> LoaderResult<LoaderCore> {
    match config {
        LoaderConfig::Stream(options) => {
            LoaderCore::stream(options, Arc::new(WebSocketConnector::new()))
        }
        LoaderConfig::Live(options) => LoaderCore::live(options, Arc::new(WebSocketConnector::new())),
        LoaderConfig::File(options) => {
            let source = HttpChunkSource::new(options.url.clone())?;
            LoaderCore::file(options, Arc::new(source))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::store::ManualTick;
    use async_trait::async_trait;
    use serde_json::json;

    struct EmptySource;

    #[async_trait]
    impl ChunkSource for EmptySource {
        async fn fetch_chunk(&self, _start: f64, _duration: f64) -> LoaderResult<Vec<RawMessage>> {
            Ok(Vec::new())
        }
    }

    fn file_loader() -> (LoaderCore, Arc<ManualTick>) {
        let tick = Arc::new(ManualTick::new());
        let options = FileOptions {
            url: "http://localhost/chunks".to_string(),
            duration: Some(10.0),
            timestamp: None,
        };
        let loader = LoaderCore::file(&options, Arc::new(EmptySource))
            .unwrap()
            .with_ticker(tick.clone());
        (loader, tick)
    }

    fn text(value: serde_json::Value) -> RawMessage {
        RawMessage::Text(value.to_string())
    }

    #[test]
    fn test_stream_requires_guid_and_duration() {
        let connector: Arc<dyn SocketConnector> = Arc::new(WebSocketConnector::new());
        let mut options = StreamOptions::new(ServerConfig::new("ws://localhost"), "");
        options.duration = Some(30.0);
        assert!(matches!(
            LoaderCore::stream(&options, connector.clone()),
            Err(LoaderError::Configuration(_))
        ));

        options.log_guid = Some("guid".to_string());
        options.duration = None;
        assert!(matches!(
            LoaderCore::stream(&options, connector),
            Err(LoaderError::Configuration(_))
        ));
    }

    #[test]
    fn test_create_loader_from_tagged_config() {
        let config: LoaderConfig = serde_json::from_value(json!({
            "type": "live",
            "server": {"server_url": "ws://localhost:8081"},
            "buffer_length": 15.0
        }))
        .unwrap();
        let loader = create_loader(&config).unwrap();
        assert_eq!(loader.schedule().kind(), "live");
        assert!(!loader.is_open());
    }

    #[test]
    fn test_metadata_clamps_seek_and_enables_streams() {
        let (mut loader, _tick) = file_loader();
        loader.handle_message(&text(json!({
            "type": "metadata",
            "data": {"start_time": 10.0, "end_time": 20.0, "streams": {"/pose": {}}}
        })));

        assert_eq!(loader.current_time(), Some(10.0));
        assert_eq!(loader.log_start_time(), Some(10.0));
        assert_eq!(loader.log_end_time(), Some(20.0));
        assert_eq!(loader.stream_settings().unwrap().get("/pose"), Some(&true));

        assert_eq!(loader.seek_now(50.0), 20.0);
        assert_eq!(loader.seek_now(-5.0), 10.0);
    }

    #[test]
    fn test_current_frame_filters_disabled_streams() {
        let (mut loader, _tick) = file_loader();
        loader.handle_message(&text(json!({
            "type": "timeslice",
            "data": {"timestamp": 1.0, "streams": {"/a": 1, "/b": 2}}
        })));
        loader.seek_now(1.0);

        let frame = loader.current_frame().unwrap();
        assert_eq!(frame.streams.len(), 2);

        loader.update_stream_settings([("/b".to_string(), false)].into_iter().collect());
        let frame = loader.current_frame().unwrap();
        assert_eq!(frame.streams.len(), 1);
        assert_eq!(frame.streams["/a"], json!(1));
    }

    #[test]
    fn test_current_frame_is_memoized() {
        let (mut loader, _tick) = file_loader();
        loader.handle_message(&text(json!({
            "type": "timeslice",
            "data": {"timestamp": 1.0, "streams": {"/a": 1}}
        })));
        loader.seek_now(1.0);

        let first = loader.current_frame().unwrap();
        let second = loader.current_frame().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.frame_evaluations(), 1);

        // Unrelated change: version moves, inputs do not
        loader.store().set(
            StateKey::StreamsMetadata,
            StateValue::StreamsMetadata(Arc::new(StreamMap::new())),
        );
        loader.current_frame();
        assert_eq!(loader.frame_evaluations(), 1);
    }

    #[test]
    fn test_new_streams_are_discovered() {
        let (mut loader, _tick) = file_loader();
        loader.update_stream_settings([("/a".to_string(), false)].into_iter().collect());
        loader.handle_message(&text(json!({
            "type": "timeslice",
            "data": {
                "timestamp": 1.0,
                "streams": {"/a": 1, "/b": {"__metadata": {"category": "pose"}}}
            }
        })));

        let settings = loader.stream_settings().unwrap();
        assert_eq!(settings.get("/a"), Some(&false));
        assert_eq!(settings.get("/b"), Some(&true));
        assert_eq!(loader.streams_metadata()["/b"], json!({"category": "pose"}));
    }

    #[test]
    fn test_store_notifies_once_per_tick() {
        let (loader, tick) = file_loader();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        loader.subscribe(move |version| sink.lock().push(version));

        loader.set_look_ahead(1.0);
        loader.set_look_ahead(2.0);
        assert_eq!(tick.run_pending(), 1);

        assert_eq!(*seen.lock(), vec![loader.store().version()]);
    }
}
