//! Participant ↔ relay channel mapping.
//!
//! The registry is the single source of truth for "does this participant have an open
//! ticket". It keeps both directions of the mapping and enforces that, over open tickets,
//! the mapping is a bijection. A participant whose relay channel is still being provisioned
//! holds a `Pending` slot so a concurrent first contact cannot create a second channel.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::domain::{ChannelId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketState {
    /// Slot reserved; the relay channel is being created.
    Pending,
    Open { channel_id: ChannelId },
}

impl TicketState {
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            TicketState::Pending => None,
            TicketState::Open { channel_id, .. } => Some(*channel_id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("participant {0} already has a ticket")]
    ParticipantBusy(UserId),

    #[error("channel {channel} is already mapped to participant {participant}")]
    ChannelTaken {
        channel: ChannelId,
        participant: UserId,
    },
}

#[derive(Debug, Default)]
struct Inner {
    by_participant: HashMap<UserId, TicketState>,
    by_channel: HashMap<ChannelId, UserId>,
}

impl Inner {
    fn insert_open(
        &mut self,
        participant: UserId,
        channel: ChannelId,
    ) -> Result<(), RegistryError> {
        if let Some(&owner) = self.by_channel.get(&channel) {
            return Err(RegistryError::ChannelTaken {
                channel,
                participant: owner,
            });
        }
        self.by_participant
            .insert(participant, TicketState::Open { channel_id: channel });
        self.by_channel.insert(channel, participant);
        Ok(())
    }

    fn remove(&mut self, participant: UserId) -> Option<ChannelId> {
        let channel = self.by_participant.remove(&participant)?.channel_id()?;
        self.by_channel.remove(&channel);
        Some(channel)
    }
}

/// In-memory ticket registry. Cheap to clone; clones share state.
///
/// All methods are synchronous and never hold the lock across an `.await`, so lookups for
/// unrelated participants never wait on network I/O.
#[derive(Clone, Debug, Default)]
pub struct TicketRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the maps half-updated (every mutation
        // is a pair of inserts/removes with no fallible step between them).
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Channel of the participant's open ticket. Pending tickets have no channel yet.
    pub fn lookup_channel(&self, participant: UserId) -> Option<ChannelId> {
        self.lock()
            .by_participant
            .get(&participant)
            .and_then(TicketState::channel_id)
    }

    pub fn lookup_participant(&self, channel: ChannelId) -> Option<UserId> {
        self.lock().by_channel.get(&channel).copied()
    }

    pub fn state(&self, participant: UserId) -> Option<TicketState> {
        self.lock().by_participant.get(&participant).copied()
    }

    /// Register an open ticket. Never overwrites: the caller checks first.
    pub fn create(&self, participant: UserId, channel: ChannelId) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        if inner.by_participant.contains_key(&participant) {
            return Err(RegistryError::ParticipantBusy(participant));
        }
        inner.insert_open(participant, channel)
    }

    /// Claim the participant's slot before provisioning a channel.
    ///
    /// The returned guard must be [`Reservation::commit`]ted; dropping it releases the slot.
    pub fn reserve(&self, participant: UserId) -> Result<Reservation, RegistryError> {
        let mut inner = self.lock();
        if inner.by_participant.contains_key(&participant) {
            return Err(RegistryError::ParticipantBusy(participant));
        }
        inner
            .by_participant
            .insert(participant, TicketState::Pending);
        Ok(Reservation {
            registry: self.clone(),
            participant,
            committed: false,
        })
    }

    /// Close the participant's ticket. Removing a missing ticket is a no-op.
    pub fn remove(&self, participant: UserId) -> Option<ChannelId> {
        self.lock().remove(participant)
    }

    /// Drop whichever ticket is mapped to `channel` (channel deleted out of band).
    pub fn remove_channel(&self, channel: ChannelId) -> Option<UserId> {
        let mut inner = self.lock();
        let participant = inner.by_channel.remove(&channel)?;
        inner.by_participant.remove(&participant);
        Some(participant)
    }

    /// Number of open tickets.
    pub fn len(&self) -> usize {
        self.lock().by_channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pending registry slot. See [`TicketRegistry::reserve`].
#[derive(Debug)]
#[must_use = "dropping a reservation releases the slot"]
pub struct Reservation {
    registry: TicketRegistry,
    participant: UserId,
    committed: bool,
}

impl Reservation {
    /// Turn the pending slot into an open ticket mapped to `channel`.
    pub fn commit(mut self, channel: ChannelId) -> Result<(), RegistryError> {
        let mut inner = self.registry.lock();
        inner.insert_open(self.participant, channel)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut inner = self.registry.lock();
        if let Some(TicketState::Pending) = inner.by_participant.get(&self.participant) {
            inner.by_participant.remove(&self.participant);
        }
    }
}
