//! Sequence records and the manager that owns them

use crate::error::{RmCoreError, RmCoreResult};
use crate::ranges::{AckRange, AckRanges};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Opaque, process-unique sequence identifier.
///
/// Cheap to clone; sessions hold these instead of references to the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(Arc<str>);

impl SequenceId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SequenceId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// Lifecycle of a sequence. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SequenceState {
    Open,
    Closed,
    Terminated,
}

/// Acknowledgement state of one numbered message stream.
#[derive(Debug, Clone)]
pub struct Sequence {
    id: SequenceId,
    last_message_number: u64,
    acknowledged: AckRanges,
    state: SequenceState,
}

impl Sequence {
    pub fn new(id: SequenceId) -> Self {
        Self {
            id,
            last_message_number: 0,
            acknowledged: AckRanges::new(),
            state: SequenceState::Open,
        }
    }

    pub fn id(&self) -> &SequenceId {
        &self.id
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state >= SequenceState::Closed
    }

    /// Highest message number assigned (outbound) or seen (inbound); 0 if none.
    pub fn last_message_number(&self) -> u64 {
        self.last_message_number
    }

    /// Assign the next message number. The first number is 1.
    pub fn next_message_number(&mut self) -> RmCoreResult<u64> {
        if self.state != SequenceState::Open {
            return Err(RmCoreError::sequence_closed(&self.id));
        }
        self.last_message_number = self
            .last_message_number
            .checked_add(1)
            .ok_or_else(|| RmCoreError::protocol("message number space exhausted"))?;
        Ok(self.last_message_number)
    }

    /// Record that the peer acknowledged `number`.
    ///
    /// Numbers outside `1..=last_message_number` and repeats are ignored.
    pub fn acknowledge(&mut self, number: u64) -> bool {
        if number == 0 || number > self.last_message_number {
            return false;
        }
        self.acknowledged.insert_one(number)
    }

    /// Record an acknowledged range, clamped to the assigned numbers.
    pub fn acknowledge_range(&mut self, range: RangeInclusive<u64>) -> bool {
        let lower = (*range.start()).max(1);
        let upper = (*range.end()).min(self.last_message_number);
        if lower > upper {
            return false;
        }
        self.acknowledged.insert(lower..=upper)
    }

    /// Record receipt of a message on an inbound sequence.
    ///
    /// Received numbers are what this side acknowledges back to the peer.
    pub fn receive(&mut self, number: u64) -> RmCoreResult<bool> {
        if number == 0 {
            return Err(RmCoreError::protocol("message number 0 is not valid"));
        }
        if self.state != SequenceState::Open && number > self.last_message_number {
            return Err(RmCoreError::sequence_closed(&self.id));
        }
        self.last_message_number = self.last_message_number.max(number);
        Ok(self.acknowledged.insert_one(number))
    }

    pub fn is_acknowledged(&self, number: u64) -> bool {
        self.acknowledged.contains(number)
    }

    /// `true` iff some assigned number is not covered by the acknowledged ranges.
    pub fn has_pending_acknowledgements(&self) -> bool {
        self.last_message_number > 0 && !self.acknowledged.covers(1..=self.last_message_number)
    }

    pub fn acknowledged(&self) -> &AckRanges {
        &self.acknowledged
    }

    pub fn acknowledged_ranges(&self) -> Vec<AckRange> {
        self.acknowledged.iter().collect()
    }

    fn close(&mut self) {
        if self.state == SequenceState::Open {
            self.state = SequenceState::Closed;
        }
    }
}

/// Creates, looks up, and destroys [`Sequence`] records.
///
/// The manager is the only owner of the records; everyone else refers to a
/// sequence by its [`SequenceId`] and must tolerate
/// [`RmCoreError::UnknownSequence`] once it has been terminated.
#[derive(Debug, Default)]
pub struct SequenceManager {
    sequences: DashMap<SequenceId, Sequence>,
}

impl SequenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a globally unique identifier for a new sequence.
    pub fn generate_id(&self) -> SequenceId {
        SequenceId::from(format!("urn:uuid:{}", Uuid::new_v4()))
    }

    pub fn create(&self, id: SequenceId) -> RmCoreResult<()> {
        match self.sequences.entry(id.clone()) {
            Entry::Occupied(_) => Err(RmCoreError::duplicate_sequence(&id)),
            Entry::Vacant(slot) => {
                slot.insert(Sequence::new(id.clone()));
                debug!(sequence = %id, "Sequence created");
                Ok(())
            }
        }
    }

    /// `true` while the record exists (i.e. it has not been terminated).
    pub fn is_valid(&self, id: &SequenceId) -> bool {
        self.sequences.contains_key(id)
    }

    /// Snapshot of the current record.
    pub fn get(&self, id: &SequenceId) -> RmCoreResult<Sequence> {
        self.sequences
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| RmCoreError::unknown_sequence(id))
    }

    /// Run `f` against the record while holding its shard lock.
    ///
    /// `f` must not call back into the manager.
    pub fn with_sequence<R>(
        &self,
        id: &SequenceId,
        f: impl FnOnce(&mut Sequence) -> R,
    ) -> RmCoreResult<R> {
        let mut entry = self
            .sequences
            .get_mut(id)
            .ok_or_else(|| RmCoreError::unknown_sequence(id))?;
        Ok(f(entry.value_mut()))
    }

    pub fn next_message_number(&self, id: &SequenceId) -> RmCoreResult<u64> {
        let number = self.with_sequence(id, Sequence::next_message_number)??;
        trace!(sequence = %id, number, "Message number assigned");
        Ok(number)
    }

    pub fn acknowledge(&self, id: &SequenceId, number: u64) -> RmCoreResult<()> {
        self.with_sequence(id, |s| s.acknowledge(number)).map(|_| ())
    }

    pub fn acknowledge_range(
        &self,
        id: &SequenceId,
        range: RangeInclusive<u64>,
    ) -> RmCoreResult<()> {
        self.with_sequence(id, |s| s.acknowledge_range(range)).map(|_| ())
    }

    pub fn receive(&self, id: &SequenceId, number: u64) -> RmCoreResult<bool> {
        self.with_sequence(id, |s| s.receive(number))?
    }

    pub fn is_acknowledged(&self, id: &SequenceId, number: u64) -> RmCoreResult<bool> {
        self.with_sequence(id, |s| s.is_acknowledged(number))
    }

    pub fn has_pending_acknowledgements(&self, id: &SequenceId) -> RmCoreResult<bool> {
        self.with_sequence(id, |s| s.has_pending_acknowledgements())
    }

    pub fn acknowledged_ranges(&self, id: &SequenceId) -> RmCoreResult<Vec<AckRange>> {
        self.with_sequence(id, |s| s.acknowledged_ranges())
    }

    pub fn last_message_number(&self, id: &SequenceId) -> RmCoreResult<u64> {
        self.with_sequence(id, |s| s.last_message_number())
    }

    /// Mark the sequence closed. Closing twice is harmless.
    pub fn close(&self, id: &SequenceId) -> RmCoreResult<()> {
        self.with_sequence(id, Sequence::close)?;
        debug!(sequence = %id, "Sequence closed");
        Ok(())
    }

    /// Terminate the sequence, closing it first if needed, and drop the record.
    pub fn terminate(&self, id: &SequenceId) -> RmCoreResult<()> {
        let (_, mut sequence) = self
            .sequences
            .remove(id)
            .ok_or_else(|| RmCoreError::unknown_sequence(id))?;
        sequence.close();
        sequence.state = SequenceState::Terminated;
        debug!(sequence = %id, "Sequence terminated");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}
