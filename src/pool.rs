//! Memory-mapped frame buffers shared with the capture device.

use std::io;

use tracing::{debug, trace, warn};

use crate::error::{CaptureError, Result};
use crate::request::MIN_BUFFERS;
use crate::traits::{
    BufferDescriptor, CameraDevice, Dequeued, Frame, FrameMetadata, MappedRegion, PixelFormat,
};

/// Who currently owns a slot's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Queued to the device; contents undefined.
    Pending,
    /// Dequeued and holding one full frame for the caller.
    Ready,
}

/// One mapped buffer.
pub struct BufferSlot<M> {
    descriptor: BufferDescriptor,
    mapping: M,
    len: usize,
    state: SlotState,
    metadata: FrameMetadata,
}

impl<M: MappedRegion> BufferSlot<M> {
    /// Kernel descriptor of the slot.
    pub const fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Usable length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the slot has no usable bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current owner of the slot.
    pub const fn state(&self) -> SlotState {
        self.state
    }

    fn bytes(&self) -> &[u8] {
        self.mapping.as_slice().get(..self.len).unwrap_or_default()
    }
}

/// Slots backing the direct capture backend.
///
/// At most one slot is ready at a time.
pub struct BufferPool<M> {
    slots: Vec<BufferSlot<M>>,
    ready: Option<usize>,
}

impl<M> Default for BufferPool<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> BufferPool<M> {
    /// An empty pool.
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            ready: None,
        }
    }

    /// Number of mapped slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slots are mapped.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The mapped slots.
    pub fn slots(&self) -> &[BufferSlot<M>] {
        &self.slots
    }

    /// Index of the slot currently held by the caller.
    pub const fn ready_index(&self) -> Option<usize> {
        self.ready
    }
}

impl<M: MappedRegion> BufferPool<M> {
    /// Request `count` buffers from `device`, map, zero and queue each one.
    ///
    /// On failure every mapping made by this call is undone and the kernel
    /// buffers are released, leaving the pool empty.
    pub fn allocate<D>(&mut self, device: &mut D, count: u32) -> Result<()>
    where
        D: CameraDevice<Mapping = M>,
    {
        if !self.slots.is_empty() {
            self.release(device)?;
        }
        if count < MIN_BUFFERS {
            return Err(CaptureError::BufferCountInsufficient {
                requested: count,
                granted: 0,
            });
        }

        let granted = device
            .request_buffers(count)
            .map_err(CaptureError::BufferRequestFailed)?;
        if granted < MIN_BUFFERS {
            return Err(CaptureError::BufferCountInsufficient {
                requested: count,
                granted,
            });
        }
        debug!(requested = count, granted, "device granted buffers");

        let mut slots = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            match Self::map_slot(device, index) {
                Ok(slot) => slots.push(slot),
                Err(err) => {
                    // Unmap everything from this call before giving the buffers back.
                    drop(slots);
                    if let Err(release_err) = device.request_buffers(0) {
                        warn!(
                            error = %release_err,
                            "failed to release buffers after mapping error"
                        );
                    }
                    return Err(err);
                }
            }
        }

        self.slots = slots;
        self.ready = None;
        Ok(())
    }

    fn map_slot<D>(device: &mut D, index: u32) -> Result<BufferSlot<M>>
    where
        D: CameraDevice<Mapping = M>,
    {
        let descriptor = device
            .query_buffer(index)
            .map_err(|source| CaptureError::QueryBufferFailed { index, source })?;

        let mut mapping = device
            .map_buffer(&descriptor)
            .map_err(|source| CaptureError::MapFailed { index, source })?;

        let mapped = mapping.as_slice().len();
        if mapped < descriptor.length {
            return Err(CaptureError::MapFailed {
                index,
                source: io::Error::other(format!(
                    "mapped {mapped} bytes, buffer is {}",
                    descriptor.length
                )),
            });
        }
        mapping.as_mut_slice().fill(0);

        device
            .queue_buffer(index)
            .map_err(|source| CaptureError::EnqueueFailed { index, source })?;

        trace!(index, length = descriptor.length, offset = descriptor.offset, "mapped buffer");
        Ok(BufferSlot {
            descriptor,
            mapping,
            len: descriptor.length,
            state: SlotState::Pending,
            metadata: FrameMetadata::default(),
        })
    }

    /// Unmap every slot and free the kernel buffers.
    ///
    /// The device must not be streaming.
    pub fn release<D>(&mut self, device: &mut D) -> Result<()>
    where
        D: CameraDevice<Mapping = M>,
    {
        if self.slots.is_empty() {
            return Ok(());
        }
        debug!(slots = self.slots.len(), "releasing buffers");

        self.slots.clear();
        self.ready = None;
        device
            .request_buffers(0)
            .map_err(CaptureError::BufferRequestFailed)?;
        Ok(())
    }

    /// Record that the device returned a filled buffer.
    ///
    /// Only one slot is ready at a time. A slot still marked ready is handed
    /// back to the device first so it stays in the working set.
    pub fn mark_ready<D>(&mut self, device: &mut D, dequeued: Dequeued) -> Result<()>
    where
        D: CameraDevice<Mapping = M>,
    {
        let position = self
            .slots
            .iter()
            .position(|slot| slot.descriptor.index == dequeued.index)
            .ok_or_else(|| {
                CaptureError::DequeueFailed(io::Error::other(format!(
                    "device returned unknown buffer {}",
                    dequeued.index
                )))
            })?;

        if self.ready.is_some_and(|previous| previous != position) {
            debug!(
                index = dequeued.index,
                "requeueing unclaimed ready buffer"
            );
            self.requeue_ready(device)?;
        }

        if let Some(slot) = self.slots.get_mut(position) {
            slot.mapping.begin_cpu_access();
            slot.state = SlotState::Ready;
            slot.metadata = dequeued.metadata;
        }
        self.ready = Some(position);
        Ok(())
    }

    /// Give the ready slot back to the device. No-op when nothing is ready.
    pub fn requeue_ready<D>(&mut self, device: &mut D) -> Result<()>
    where
        D: CameraDevice<Mapping = M>,
    {
        let Some(position) = self.ready else {
            trace!("no ready buffer to requeue");
            return Ok(());
        };
        let Some(slot) = self.slots.get_mut(position) else {
            self.ready = None;
            return Ok(());
        };

        let index = slot.descriptor.index;
        device
            .queue_buffer(index)
            .map_err(|source| CaptureError::EnqueueFailed { index, source })?;
        slot.state = SlotState::Pending;
        self.ready = None;
        Ok(())
    }

    /// Row stride for frames of `height` rows: slot length divided by height.
    pub fn row_stride(&self, height: u32) -> usize {
        match (self.slots.first(), height) {
            (Some(slot), h) if h > 0 => slot.len / h as usize,
            _ => 0,
        }
    }

    /// View of the ready slot. Never extends past the mapping.
    pub fn ready_frame(&self, width: u32, height: u32, format: PixelFormat) -> Option<Frame<'_>> {
        let slot = self.slots.get(self.ready?)?;
        if height == 0 {
            return None;
        }
        let stride = slot.len / height as usize;
        let data = slot.bytes().get(..stride * height as usize)?;

        Some(Frame {
            data,
            width,
            height,
            stride,
            format,
            metadata: slot.metadata.clone(),
        })
    }
}
