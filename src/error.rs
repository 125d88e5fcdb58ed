// SPDX-License-Identifier: Apache-2.0

use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A caller passed an invalid configuration value.
    InvalidArgument,
    /// A programming invariant was violated (illegal state transition,
    /// missing lease where one is mandatory). Never recoverable.
    Bug,
    /// I/O failure talking to the raw socket.
    Io,
    /// `wait_for_state` did not observe the target state in time.
    Timeout,
    /// A DHCP message type or option the client does not implement.
    NotSupported,
}

#[derive(Debug, Clone)]
pub struct DhcpError {
    kind: ErrorKind,
    msg: String,
}

impl DhcpError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// True for `ENETDOWN`-style failures: the affected loop should stop
    /// cleanly instead of retrying.
    pub fn is_network_down(&self) -> bool {
        self.kind == ErrorKind::Io
            && self.msg.contains("ENETDOWN")
    }
}

impl fmt::Display for DhcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for DhcpError {}

impl From<std::io::Error> for DhcpError {
    fn from(e: std::io::Error) -> Self {
        let kind = ErrorKind::Io;
        let msg = if e.raw_os_error() == Some(libc::ENETDOWN) {
            format!("ENETDOWN: {e}")
        } else {
            e.to_string()
        };
        Self { kind, msg }
    }
}

impl From<tokio::time::error::Elapsed> for DhcpError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::new(ErrorKind::Timeout, "operation timed out")
    }
}

/// Short-hand for constructing and immediately logging a bug-level error,
/// matching the teacher crate's `DhcpError::new(...); log::error!("{e}"); e`
/// idiom without repeating it at every call site.
pub(crate) fn bug(msg: impl Into<String>) -> DhcpError {
    let e = DhcpError::new(ErrorKind::Bug, msg);
    log::error!("{e}");
    e
}

pub type DhcpResult<T> = Result<T, DhcpError>;
