mod backoff;
mod error;
mod transport;

pub use self::backoff::BackoffTimer;
pub use self::error::NetworkError;
pub use self::transport::{ignore_strays, Datagram, Transport, DEFAULT_MAX_STRAY_DATAGRAMS};
