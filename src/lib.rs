//! Windowed log playback for DDALAB streaming sessions
//!
//! Streams large timestamped logs to a playback client incrementally, keeps a
//! bounded, time-windowed buffer of what arrived, and answers "what is visible
//! at the playhead" through memoized selectors.
//!
//! Three schedules share one [`LoaderCore`]:
//! - stream: seekable log over a WebSocket, requesting windows around the playhead
//! - live: unbounded log over a WebSocket, following the newest data
//! - file: fixed-duration chunks fetched over HTTP

pub mod buffer;
pub mod config;
pub mod decoder;
pub mod events;
pub mod loader;
pub mod range;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod types;

pub use buffer::{BufferStats, BufferWindow, TimesliceBuffer, TimesliceStore};
pub use config::{FileOptions, LiveOptions, LoaderConfig, RetrySettings, ServerConfig, StreamOptions};
pub use decoder::{JsonDecoder, MessageDecoder};
pub use events::{EventBus, ListenerId, LoaderEvent, LoaderEventKind};
pub use loader::{create_loader, LoaderCore};
pub use range::{ComplexRange, SimpleRange};
pub use scheduler::{ChunkSource, HttpChunkSource, Schedule};
pub use store::{ManualTick, ReactiveStore, TickScheduler, TokioTick};
pub use transport::{SocketConnector, TransportSession, WebSocketConnector};
pub use types::{
    Frame, LoaderError, LoaderResult, LoaderStats, LogMetadata, RawMessage, SessionState,
    Timeslice,
};
