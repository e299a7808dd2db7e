use crate::error::{MuxError, Result};
use std::sync::atomic::{AtomicU32, Ordering};

/// Which side of the transport this session occupies.
///
/// The role partitions the channel id space so both sides can allocate
/// without coordination: clients issue odd ids starting at 1, servers even
/// ids starting at 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn first_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    /// True if `id` belongs to the half of the namespace this role allocates
    /// from.
    pub fn owns(self, id: u32) -> bool {
        match self {
            Role::Client => id % 2 == 1,
            Role::Server => id != 0 && id % 2 == 0,
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

/// Monotonic channel id allocator for one session.
///
/// Ids step by 2 within the role's parity class and are never reused.
/// Exhausting the 32-bit space is a session-fatal condition.
#[derive(Debug)]
pub struct ChannelIdAllocator {
    next_id: AtomicU32,
    role: Role,
}

impl ChannelIdAllocator {
    pub fn new(role: Role) -> Self {
        Self {
            next_id: AtomicU32::new(role.first_id()),
            role,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn next(&self) -> Result<u32> {
        let current = self.next_id.fetch_add(2, Ordering::Relaxed);
        // The id space is spent; the session must be torn down.
        if current > u32::MAX - 2 {
            return Err(MuxError::SessionClosed);
        }
        Ok(current)
    }

    /// Validate an id received on the wire that claims to be peer-initiated.
    pub fn validate_peer_id(&self, id: u32) -> Result<()> {
        if id == 0 || !self.role.peer().owns(id) {
            return Err(MuxError::InvalidChannel(id));
        }
        Ok(())
    }
}
