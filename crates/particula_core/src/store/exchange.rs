//! Migration, ghost and checkpoint records.
//!
//! A record is the packed arrays of one particle followed by the data of
//! every dependent on the matching callback list, in registration order.

use tracing::debug;

use super::ParticleStore;
use crate::arrays::Scope;
use crate::error::{StorageError, StorageResult};
use crate::exchange::ExchangeBuffer;
use crate::id::IDENTIFIER_MAX;
use crate::registry::Payload;

#[derive(Clone, Copy)]
enum Record {
    Migrate,
    Checkpoint,
}

impl ParticleStore {
    fn owned_slot(&self, slot: usize) -> StorageResult<()> {
        if slot < self.nlocal {
            Ok(())
        } else {
            Err(StorageError::InvalidSlot {
                slot,
                limit: self.nlocal,
            })
        }
    }

    /// Appends a migration record for the owned particle at `slot`.
    ///
    /// Everything but forces travels.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidSlot`] if `slot` is not owned.
    pub fn pack_exchange(&self, slot: usize, buffer: &mut ExchangeBuffer) -> StorageResult<()> {
        self.owned_slot(slot)?;
        self.pack_record(slot, Record::Migrate, buffer)
    }

    /// Appends a checkpoint record for the owned particle at `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidSlot`] if `slot` is not owned.
    pub fn pack_checkpoint(&self, slot: usize, buffer: &mut ExchangeBuffer) -> StorageResult<()> {
        self.owned_slot(slot)?;
        self.pack_record(slot, Record::Checkpoint, buffer)
    }

    fn pack_record(&self, slot: usize, record: Record, buffer: &mut ExchangeBuffer) -> StorageResult<()> {
        buffer.push_record(|out| {
            self.arrays.pack(slot, Scope::Exchange, out);
            let payload = Payload::Pack(out);
            let written = match record {
                Record::Migrate => self.registry.notify_migrate(slot, payload),
                Record::Checkpoint => self.registry.notify_checkpoint(slot, payload),
            };
            written.map(|_| ())
        })
    }

    /// Appends a particle arriving from another rank as a new owned
    /// particle. Returns its slot.
    ///
    /// # Errors
    ///
    /// - [`StorageError::MalformedRecord`] if the record does not decode;
    ///   the store is left unchanged
    /// - [`StorageError::IdentifierRange`] if the identifier exceeds
    ///   [`IDENTIFIER_MAX`]
    /// - [`StorageError::DuplicateIdentifier`] if the particle is already
    ///   owned here
    /// - [`StorageError::PeerFault`] if another rank faulted
    pub fn unpack_exchange(&mut self, buffer: &ExchangeBuffer, record: usize) -> StorageResult<usize> {
        self.fault_checkpoint()?;
        self.append_record(buffer, record, Record::Migrate)
    }

    /// Restores a particle from a checkpoint record as a new owned
    /// particle. Returns its slot.
    ///
    /// # Errors
    ///
    /// Same as [`Self::unpack_exchange`].
    pub fn unpack_checkpoint(&mut self, buffer: &ExchangeBuffer, record: usize) -> StorageResult<usize> {
        self.fault_checkpoint()?;
        self.append_record(buffer, record, Record::Checkpoint)
    }

    fn append_record(&mut self, buffer: &ExchangeBuffer, record: usize, kind: Record) -> StorageResult<usize> {
        let bytes = buffer
            .record(record)
            .ok_or_else(|| StorageError::MalformedRecord(format!("no record {record}")))?;
        self.drop_ghosts()?;
        self.reserve(self.nlocal + 1)?;

        // Decode past the owned range; the slot only becomes owned once
        // the whole record has been read.
        let slot = self.nlocal;
        let mut used = self.arrays.unpack(slot, Scope::Exchange, bytes)?;
        let rest = &bytes[used..];
        used += match kind {
            Record::Migrate => self.registry.notify_migrate(slot, Payload::Unpack(rest)),
            Record::Checkpoint => self.registry.notify_checkpoint(slot, Payload::Unpack(rest)),
        }?;
        if used != bytes.len() {
            return Err(StorageError::MalformedRecord(format!(
                "{} trailing bytes in record {record}",
                bytes.len() - used
            )));
        }

        let id = self.arrays.tags()[slot];
        if id.get() > IDENTIFIER_MAX {
            return Err(StorageError::IdentifierRange {
                id: id.get(),
                limit: IDENTIFIER_MAX,
            });
        }
        if let Some(existing) = self.index.lookup(id) {
            return Err(self.escalate(StorageError::DuplicateIdentifier {
                id: id.get(),
                first: existing,
                second: slot,
            }));
        }
        self.nlocal += 1;
        self.index_owned(id, slot)?;
        Ok(slot)
    }

    /// Packs the owned particles at `slots` into migration records, in the
    /// given order, then removes them.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidSlot`] if a slot is not owned or repeated;
    ///   nothing is removed
    /// - [`StorageError::PeerFault`] if another rank faulted
    pub fn take_exchange(&mut self, slots: &[usize]) -> StorageResult<ExchangeBuffer> {
        self.fault_checkpoint()?;
        let mut descending = slots.to_vec();
        descending.sort_unstable_by(|a, b| b.cmp(a));
        if let Some(pair) = descending.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(StorageError::InvalidSlot {
                slot: pair[0],
                limit: self.nlocal,
            });
        }

        let mut buffer = ExchangeBuffer::new();
        for &slot in slots {
            self.pack_exchange(slot, &mut buffer)?;
        }
        // Highest first, so every swap-with-last pulls from an untouched slot.
        for slot in descending {
            self.remove_owned(slot)?;
        }
        debug!(sent = buffer.len(), nlocal = self.nlocal, "particles packed for migration");
        Ok(buffer)
    }

    /// Appends a ghost record for the slot, owned or ghost.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidSlot`] beyond the ghost range.
    pub fn pack_border(&self, slot: usize, buffer: &mut ExchangeBuffer) -> StorageResult<()> {
        if slot >= self.nall() {
            return Err(StorageError::InvalidSlot {
                slot,
                limit: self.nall(),
            });
        }
        buffer.push_record(|out| {
            self.arrays.pack(slot, Scope::Border, out);
            self.registry.notify_border(slot, Payload::Pack(out)).map(|_| ())
        })
    }

    /// Replaces the whole ghost layer with the records in `buffer` and
    /// rebuilds the index.
    ///
    /// # Errors
    ///
    /// - [`StorageError::MalformedRecord`] if a record does not decode; the
    ///   store is left with no ghosts
    /// - [`StorageError::PeerFault`] if another rank faulted
    pub fn replace_ghosts(&mut self, buffer: &ExchangeBuffer) -> StorageResult<()> {
        self.fault_checkpoint()?;
        self.nghost = 0;
        self.reserve(self.nlocal + buffer.len())?;

        let unpacked = self.unpack_ghosts(buffer);
        self.nghost = *unpacked.as_ref().unwrap_or(&0);
        self.rebuild_index()?;
        debug!(nlocal = self.nlocal, nghost = self.nghost, "ghost layer replaced");
        unpacked.map(|_| ())
    }

    fn unpack_ghosts(&mut self, buffer: &ExchangeBuffer) -> StorageResult<usize> {
        for (i, bytes) in buffer.records().enumerate() {
            let slot = self.nlocal + i;
            self.arrays.reset_slot(slot);
            let mut used = self.arrays.unpack(slot, Scope::Border, bytes)?;
            used += self
                .registry
                .notify_border(slot, Payload::Unpack(&bytes[used..]))?;
            if used != bytes.len() {
                return Err(StorageError::MalformedRecord(format!(
                    "{} trailing bytes in ghost record {i}",
                    bytes.len() - used
                )));
            }
        }
        Ok(buffer.len())
    }
}
