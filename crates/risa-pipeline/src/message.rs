/// Element flowing between stages.
///
/// The end-of-stream sentinel is a tagged variant rather than an
/// invalid-flagged frame, so a frame inside `Frame` is always valid and
/// owns its buffer.
#[derive(Debug)]
pub enum Message<T> {
    Frame(T),
    EndOfStream,
}

impl<T> Message<T> {
    pub fn is_end(&self) -> bool {
        matches!(self, Message::EndOfStream)
    }

    pub fn into_frame(self) -> Option<T> {
        match self {
            Message::Frame(frame) => Some(frame),
            Message::EndOfStream => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Message<U> {
        match self {
            Message::Frame(frame) => Message::Frame(f(frame)),
            Message::EndOfStream => Message::EndOfStream,
        }
    }
}
