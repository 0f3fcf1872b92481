//! V4L2 device implementation using the v4l crate.
//!
//! Capability, format and rate negotiation go through `v4l::Device`. The
//! buffer handshake (`REQBUFS`, `QUERYBUF`, `QBUF`, `DQBUF`, `STREAMON`,
//! `STREAMOFF`) and the mappings are issued directly so that queueing and
//! dequeueing stay two separate steps.

#![allow(unsafe_code)]

use std::io;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    BufferDescriptor, CameraDevice, Dequeued, DeviceCapabilities, Format, FourCC,
    FrameMetadata, MappedRegion,
};

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    capabilities: DeviceCapabilities,
}

impl V4L2Device {
    /// Open a V4L2 device node and query its capabilities.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::from_device(Device::with_path(path)?)
    }

    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open_index(index: u32) -> io::Result<Self> {
        Self::from_device(Device::new(index as usize)?)
    }

    fn from_device(device: Device) -> io::Result<Self> {
        let caps = device.query_caps()?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(Flags::STREAMING),
        };
        debug!(
            driver = %capabilities.driver,
            card = %capabilities.card,
            capture = capabilities.can_capture,
            "queried device capabilities"
        );

        Ok(Self {
            device,
            capabilities,
        })
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }

    fn ioctl<T>(&self, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        // SAFETY: every caller passes the argument struct `request` expects,
        // and the exclusive borrow keeps it alive for the duration of the call.
        unsafe { v4l2::ioctl(self.fd(), request, ptr::from_mut(arg).cast::<c_void>()) }
    }

    fn raw_buffer(index: u32) -> v4l2_buffer {
        v4l2_buffer {
            index,
            type_: Type::VideoCapture as u32,
            memory: Memory::Mmap as u32,
            // SAFETY: v4l2_buffer is plain old data; all-zero is a valid value.
            ..unsafe { mem::zeroed() }
        }
    }

    /// Wait until the device has a filled buffer.
    fn poll_readable(&self) -> io::Result<()> {
        let mut fds = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            // SAFETY: `fds` points at exactly one initialized pollfd.
            let ret = unsafe { libc::poll(&mut fds, 1, -1) };
            if ret >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl CameraDevice for V4L2Device {
    type Mapping = MmapRegion;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        let mut fmt = self.device.format()?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self.device.set_format(&fmt)?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn set_frame_rate(&mut self, fps: u32) -> io::Result<()> {
        let params = self.device.set_params(&Parameters::with_fps(fps))?;
        debug!(interval = ?params.interval, "frame interval set");
        Ok(())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut request = v4l2_requestbuffers {
            count,
            type_: Type::VideoCapture as u32,
            memory: Memory::Mmap as u32,
            // SAFETY: v4l2_requestbuffers is plain old data.
            ..unsafe { mem::zeroed() }
        };
        self.ioctl(vidioc::VIDIOC_REQBUFS, &mut request)?;
        Ok(request.count)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferDescriptor> {
        let mut buffer = Self::raw_buffer(index);
        self.ioctl(vidioc::VIDIOC_QUERYBUF, &mut buffer)?;

        Ok(BufferDescriptor {
            index,
            length: buffer.length as usize,
            // SAFETY: for MMAP buffers the driver fills the `offset` member.
            offset: unsafe { buffer.m.offset },
        })
    }

    fn map_buffer(&self, descriptor: &BufferDescriptor) -> io::Result<MmapRegion> {
        let offset = libc::off_t::try_from(descriptor.offset)
            .map_err(|_| io::Error::other("buffer offset out of range"))?;
        // SAFETY: length and offset come from VIDIOC_QUERYBUF on this fd; the
        // returned region is only accessed through `MmapRegion`.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                descriptor.length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;

        Ok(MmapRegion {
            ptr,
            len: descriptor.length,
        })
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buffer = Self::raw_buffer(index);
        self.ioctl(vidioc::VIDIOC_QBUF, &mut buffer)
    }

    fn dequeue_buffer(&mut self) -> io::Result<Dequeued> {
        self.poll_readable()?;

        let mut buffer = Self::raw_buffer(0);
        self.ioctl(vidioc::VIDIOC_DQBUF, &mut buffer)?;

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = buffer.timestamp.tv_sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (buffer.timestamp.tv_usec.max(0) as u32).saturating_mul(1000);

        Ok(Dequeued {
            index: buffer.index,
            metadata: FrameMetadata {
                sequence: buffer.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: buffer.bytesused,
            },
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut buf_type = Type::VideoCapture as u32;
        self.ioctl(vidioc::VIDIOC_STREAMON, &mut buf_type)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut buf_type = Type::VideoCapture as u32;
        self.ioctl(vidioc::VIDIOC_STREAMOFF, &mut buf_type)
    }
}

/// A buffer mapped with `mmap`, unmapped on drop.
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedRegion for MmapRegion {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is a live mapping of `len` bytes until drop.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes the access exclusive.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: the region was returned by a successful mmap of `len` bytes.
        let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) };
        if ret != 0 {
            warn!(error = %io::Error::last_os_error(), len = self.len, "munmap failed");
        }
    }
}
