//! Fixed pool of memory-mapped frame buffers shared with the driver.
//!
//! Each slot carries an ownership tag. The only way to change a tag is
//! through [`BufferRing::queue`], [`BufferRing::dequeue`] and
//! [`BufferRing::release_all`], so a desynchronization between driver and
//! application surfaces as [`CameraError::BufferStateCorrupt`] instead of a
//! read from memory the driver is writing into.

use std::io;

use tracing::{error, trace};

use crate::error::CameraError;
use crate::traits::{CameraDevice, DequeuedBuffer};

/// Who may currently touch a buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Neither party; contents are stale.
    Idle,
    /// Queued to the driver for filling.
    Driver,
    /// Filled and handed to the application.
    Application,
}

/// One mapped buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSlot {
    /// Stable slot index.
    pub index: usize,
    /// Mapped size in bytes.
    pub capacity: usize,
    /// Valid bytes from the last fill.
    pub bytes_used: usize,
    /// Current owner.
    pub owner: Ownership,
}

/// Ordered buffer slots with a cardinality fixed at mapping time.
#[derive(Debug, Default)]
pub struct BufferRing {
    slots: Vec<BufferSlot>,
}

/// Failure of a ring transition.
#[derive(Debug)]
pub(crate) enum RingError {
    /// The driver rejected the request.
    Driver(io::Error),
    /// Ownership tags and driver disagree.
    Corrupt(CameraError),
}

pub(crate) type RingResult<T> = std::result::Result<T, RingError>;

impl BufferRing {
    /// Allocate and map `count` buffers on the device.
    ///
    /// The driver may grant a different number of buffers; the ring takes
    /// whatever was granted.
    pub fn map<D: CameraDevice>(device: &mut D, count: u32) -> io::Result<Self> {
        let capacities = device.map_buffers(count)?;
        let slots = capacities
            .into_iter()
            .enumerate()
            .map(|(index, capacity)| BufferSlot {
                index,
                capacity,
                bytes_used: 0,
                owner: Ownership::Idle,
            })
            .collect();
        Ok(Self { slots })
    }

    /// Unmap all buffers. The ring is empty afterwards even if the driver
    /// reports an error.
    pub fn unmap<D: CameraDevice>(&mut self, device: &mut D) -> io::Result<()> {
        if self.slots.is_empty() {
            return Ok(());
        }
        self.slots.clear();
        device.unmap_buffers()
    }

    /// Hand slot `index` to the driver.
    pub(crate) fn queue<D: CameraDevice>(
        &mut self,
        device: &mut D,
        index: usize,
    ) -> RingResult<()> {
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            RingError::Corrupt(corrupt(index, None, "queue"))
        })?;
        if slot.owner == Ownership::Driver {
            return Err(RingError::Corrupt(corrupt(index, Some(slot.owner), "queue")));
        }
        device.queue(index).map_err(RingError::Driver)?;
        slot.owner = Ownership::Driver;
        slot.bytes_used = 0;
        trace!(index, "buffer queued");
        Ok(())
    }

    /// Take the next filled slot from the driver.
    pub(crate) fn dequeue<D: CameraDevice>(
        &mut self,
        device: &mut D,
    ) -> RingResult<DequeuedBuffer> {
        let buffer = device.dequeue().map_err(RingError::Driver)?;
        let Some(slot) = self.slots.get_mut(buffer.index) else {
            return Err(RingError::Corrupt(corrupt(buffer.index, None, "dequeue")));
        };
        if slot.owner != Ownership::Driver {
            return Err(RingError::Corrupt(corrupt(
                buffer.index,
                Some(slot.owner),
                "dequeue",
            )));
        }
        slot.owner = Ownership::Application;
        slot.bytes_used = usize::try_from(buffer.bytes_used)
            .unwrap_or(usize::MAX)
            .min(slot.capacity);
        trace!(index = buffer.index, bytes_used = slot.bytes_used, "buffer dequeued");
        Ok(buffer)
    }

    /// Return every application-owned slot to the driver.
    pub(crate) fn requeue_held<D: CameraDevice>(
        &mut self,
        device: &mut D,
    ) -> RingResult<()> {
        let held: Vec<usize> = self
            .slots
            .iter()
            .filter(|slot| slot.owner == Ownership::Application)
            .map(|slot| slot.index)
            .collect();
        for index in held {
            self.queue(device, index)?;
        }
        Ok(())
    }

    /// Mark every slot idle, after stream-off returned them from the driver.
    pub fn release_all(&mut self) {
        for slot in &mut self.slots {
            slot.owner = Ownership::Idle;
            slot.bytes_used = 0;
        }
    }

    /// Slot by index.
    pub fn slot(&self, index: usize) -> Option<&BufferSlot> {
        self.slots.get(index)
    }

    /// All slots in index order.
    pub fn slots(&self) -> &[BufferSlot] {
        &self.slots
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no buffers are mapped.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots with the given owner.
    pub fn count_owned(&self, owner: Ownership) -> usize {
        self.slots.iter().filter(|slot| slot.owner == owner).count()
    }
}

fn corrupt(index: usize, found: Option<Ownership>, operation: &'static str) -> CameraError {
    error!(index, ?found, operation, "buffer ownership out of sync with driver");
    CameraError::BufferStateCorrupt {
        index,
        found,
        operation,
    }
}
