use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty datagram")]
    Empty,

    #[error("Unknown message tag: {0}")]
    UnknownTag(u8),

    #[error("Bad length for tag {tag}: expected {expected} bytes, got {actual}")]
    Length {
        tag: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Member count {declared} does not match {actual_bytes} payload bytes")]
    MemberCount { declared: u32, actual_bytes: usize },

    #[error("Name is not valid UTF-8")]
    InvalidName,

    #[error("Name is {0} bytes, longer than the wire format allows")]
    NameTooLong(usize),
}
