//! Output channel of a single request.
//!
//! Generators write exactly one response into a [`Sink`]: content or an error.
//! Long-running tasks poll [`Sink::check_aborted`] between steps and stop as
//! soon as the client has gone away.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{MapproxyError, Result};

/// Caching class of a served file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileClass {
    Config,
    Support,
    Registry,
    Data,
    #[default]
    Unknown,
}

impl FileClass {
    /// Max-age in seconds used for `Cache-Control`.
    pub fn max_age(self) -> u32 {
        match self {
            FileClass::Config => 60,
            FileClass::Support | FileClass::Registry => 3600,
            FileClass::Data => 604_800,
            FileClass::Unknown => 0,
        }
    }
}

/// Metadata accompanying content written to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFileInfo {
    pub content_type: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub file_class: FileClass,
}

impl SinkFileInfo {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            last_modified: None,
            file_class: FileClass::Unknown,
        }
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    pub fn with_class(mut self, file_class: FileClass) -> Self {
        self.file_class = file_class;
        self
    }

    pub fn cache_control(&self) -> String {
        match self.file_class.max_age() {
            0 => "no-cache".to_string(),
            age => format!("max-age={}", age),
        }
    }
}

/// Destination of one generated response.
pub trait Sink: Send {
    /// Writes the response body.
    fn content(&mut self, data: Bytes, info: SinkFileInfo);

    /// Writes an error response.
    fn error(&mut self, error: MapproxyError);

    /// Fails with `Aborted` once the receiving side has gone away.
    fn check_aborted(&self) -> Result<()>;
}

/// What a [`ChannelSink`] delivered.
#[derive(Debug)]
pub enum SinkOutput {
    Content { data: Bytes, info: SinkFileInfo },
    Error(MapproxyError),
}

/// Sink delivering into a oneshot channel.
///
/// The first write wins; later writes and writes after cancellation are
/// dropped.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<oneshot::Sender<SinkOutput>>,
    cancel: CancellationToken,
}

impl ChannelSink {
    pub fn new(cancel: CancellationToken) -> (Self, oneshot::Receiver<SinkOutput>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Some(tx),
                cancel,
            },
            rx,
        )
    }

    fn deliver(&mut self, output: SinkOutput) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(tx) = self.tx.take() {
            if tx.send(output).is_err() {
                tracing::debug!("Response receiver dropped before delivery");
            }
        }
    }
}

impl Sink for ChannelSink {
    fn content(&mut self, data: Bytes, info: SinkFileInfo) {
        self.deliver(SinkOutput::Content { data, info });
    }

    fn error(&mut self, error: MapproxyError) {
        if matches!(error, MapproxyError::Aborted) {
            return;
        }
        self.deliver(SinkOutput::Error(error));
    }

    fn check_aborted(&self) -> Result<()> {
        let closed = self.tx.as_ref().map_or(true, |tx| tx.is_closed());
        if self.cancel.is_cancelled() || closed {
            Err(MapproxyError::Aborted)
        } else {
            Ok(())
        }
    }
}

/// Sink that keeps the response in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct BufferSink {
    pub output: Option<std::result::Result<(Bytes, SinkFileInfo), MapproxyError>>,
    pub aborted: bool,
}

#[cfg(test)]
impl Sink for BufferSink {
    fn content(&mut self, data: Bytes, info: SinkFileInfo) {
        self.output = Some(Ok((data, info)));
    }

    fn error(&mut self, error: MapproxyError) {
        self.output = Some(Err(error));
    }

    fn check_aborted(&self) -> Result<()> {
        if self.aborted {
            Err(MapproxyError::Aborted)
        } else {
            Ok(())
        }
    }
}
