//! Byte-producing input handed to the processor.

use std::fmt;
use std::io::Cursor;

use bytes::Bytes;
use tokio::io::AsyncRead;

/// An async reader plus optional hints about its content.
///
/// The processor reads the reader to exhaustion (bounded by the configured
/// ceiling) and then drops it; it never closes anything else the caller owns.
pub struct Source {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    /// MIME type hint. When present it overrides sniffing.
    pub content_type: Option<String>,
    /// Display name, usually a file name. Used only for logging.
    pub name: Option<String>,
    /// Expected size in bytes, if known up front.
    pub size: Option<u64>,
}

impl Source {
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            content_type: None,
            name: None,
            size: None,
        }
    }

    /// In-memory source. The size hint is set from the buffer length.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        let mut source = Self::from_reader(Cursor::new(bytes));
        source.size = Some(size);
        source
    }

    /// Builder: set the content-type hint.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Builder: set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: set the size hint.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Name for log lines, `"<anonymous>"` when unset.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Split into the reader and the hints.
    pub fn into_parts(self) -> (Box<dyn AsyncRead + Send + Unpin>, SourceHints) {
        (
            self.reader,
            SourceHints {
                content_type: self.content_type,
                name: self.name,
                size: self.size,
            },
        )
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("content_type", &self.content_type)
            .field("name", &self.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Hints detached from a [`Source`]'s reader.
#[derive(Debug, Clone, Default)]
pub struct SourceHints {
    pub content_type: Option<String>,
    pub name: Option<String>,
    pub size: Option<u64>,
}
