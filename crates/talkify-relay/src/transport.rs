//! Transport-neutral frame type.
//!
//! Pumps read a `Stream<Item = Result<Frame, E>>` and write a `Sink<Frame>`,
//! so the relay does not depend on a particular WebSocket implementation.
//! The server adapts axum's WebSocket messages to and from [`Frame`].

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Payload bytes for data frames.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Frame::Text(text) => Some(text.as_bytes()),
            Frame::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_only_for_data_frames() {
        assert_eq!(Frame::Text("hi".into()).payload(), Some(&b"hi"[..]));
        assert_eq!(Frame::Binary(vec![1, 2]).payload(), Some(&[1u8, 2][..]));
        assert_eq!(Frame::Ping(vec![1]).payload(), None);
        assert_eq!(Frame::Close.payload(), None);
    }
}
