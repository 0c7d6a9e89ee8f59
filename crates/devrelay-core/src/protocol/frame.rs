//! Transport-neutral message frame.
//!
//! The relay forwards application payload frame-for-frame without looking
//! inside it.  The only thing it must keep is whether a frame was sent as text
//! or as binary, so the receiving side sees the same message type.

/// One complete message read from, or written to, a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text message.
    Text(String),
    /// An opaque binary message.
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the message type, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }

    /// Lossy text rendering used by debug logging.
    pub fn preview(&self) -> String {
        if self.is_empty() {
            return "(empty)".to_string();
        }
        match self {
            Self::Text(text) => text.clone(),
            Self::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl From<String> for Frame {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_counts_bytes_for_both_kinds() {
        assert_eq!(Frame::Text("héllo".into()).len(), 6);
        assert_eq!(Frame::Binary(vec![0, 1, 2]).len(), 3);
    }

    #[test]
    fn test_empty_frame() {
        assert!(Frame::Binary(Vec::new()).is_empty());
        assert!(!Frame::Text("x".into()).is_empty());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Frame::Text(String::new()).kind(), "text");
        assert_eq!(Frame::Binary(Vec::new()).kind(), "binary");
    }

    #[test]
    fn test_preview_of_empty_frame_is_marked() {
        assert_eq!(Frame::Text(String::new()).preview(), "(empty)");
    }

    #[test]
    fn test_from_keeps_message_type() {
        assert_eq!(Frame::from("hi".to_string()), Frame::Text("hi".into()));
        assert_eq!(Frame::from(vec![1u8]), Frame::Binary(vec![1]));
    }

    #[test]
    fn test_preview_of_binary_is_lossy() {
        let frame = Frame::Binary(vec![b'o', b'k', 0xFF]);
        assert!(frame.preview().starts_with("ok"));
    }
}
