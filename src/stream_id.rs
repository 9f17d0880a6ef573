//! Stream identifiers and their allocation (RFC 7540 Section 5.1.1).

use crate::config::Role;
use crate::error::H2Error;

/// A 31-bit HTTP/2 stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId(u32);

impl StreamId {
    /// The connection control stream.
    pub const ROOT: StreamId = StreamId(0);
    /// Largest representable stream id.
    pub const MAX: StreamId = StreamId(0x7fff_ffff);

    /// Build a stream id, clearing the reserved high bit.
    pub const fn new(id: u32) -> Self {
        StreamId(id & 0x7fff_ffff)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn is_root(self) -> bool {
        self.0 == 0
    }

    /// Odd ids are opened by clients.
    pub const fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }

    /// Even, non-zero ids are opened by servers (push).
    pub const fn is_server_initiated(self) -> bool {
        self.0 != 0 && self.0 % 2 == 0
    }

    /// Whether an endpoint acting as `role` would have initiated this id.
    pub fn is_initiated_by(self, role: Role) -> bool {
        match role {
            Role::Client => self.is_client_initiated(),
            Role::Server => self.is_server_initiated(),
        }
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        StreamId::new(id)
    }
}

impl From<StreamId> for u32 {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out locally initiated stream ids: odd for clients, even for
/// servers, strictly increasing.
#[derive(Debug, Clone)]
pub struct StreamIdAllocator {
    next: u64,
}

impl StreamIdAllocator {
    pub fn new(role: Role) -> Self {
        let next = match role {
            Role::Client => 1,
            Role::Server => 2,
        };
        Self { next }
    }

    /// The id the next call to [`allocate`](Self::allocate) would return.
    pub fn peek(&self) -> Option<StreamId> {
        (self.next <= u64::from(StreamId::MAX.0)).then(|| StreamId(self.next as u32))
    }

    pub fn allocate(&mut self) -> Result<StreamId, H2Error> {
        let id = self.peek().ok_or(H2Error::StreamIdsExhausted)?;
        self.next += 2;
        Ok(id)
    }

    pub fn is_exhausted(&self) -> bool {
        self.peek().is_none()
    }
}
