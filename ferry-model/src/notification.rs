use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, Result};

/// Separator between the three notification fields on the wire.
pub const FIELD_SEPARATOR: char = ',';

/// Announcement that `origin_host` holds `filename` at `origin_path`.
///
/// On the wire this is the UTF-8 line `origin_host,origin_path,filename`.
/// There is no escaping, so none of the fields may contain a comma; a path
/// with a comma in it yields a line that fails to parse on the consumer side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Notification {
    pub origin_host: String,
    pub origin_path: String,
    pub filename: String,
}

impl Notification {
    pub fn new(
        origin_host: impl Into<String>,
        origin_path: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            origin_host: origin_host.into(),
            origin_path: origin_path.into(),
            filename: filename.into(),
        }
    }

    /// An empty filename marks a no-op message: consumers ack it and move on.
    pub fn is_sentinel(&self) -> bool {
        self.filename.is_empty()
    }

    /// Wire encoding of the notification.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode a broker message body.
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        let text =
            std::str::from_utf8(body).map_err(|_| ModelError::InvalidEncoding)?;
        text.parse()
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.origin_host,
            self.origin_path,
            self.filename,
            sep = FIELD_SEPARATOR
        )
    }
}

impl FromStr for Notification {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(FIELD_SEPARATOR).collect();
        match fields.as_slice() {
            [host, path, filename] => Ok(Self::new(*host, *path, *filename)),
            _ => Err(ModelError::MalformedNotification {
                fields: fields.len(),
                body: s.to_string(),
            }),
        }
    }
}
