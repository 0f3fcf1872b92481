//! Mock device and decoder implementations for testing without hardware.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::traits::{
    BufferDescriptor, CameraDevice, DecodedImage, Dequeued, DeviceCapabilities, Format,
    FrameMetadata, MappedRegion, PixelFormat, VideoDecoder,
};

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Calls observed by a [`MockDevice`].
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    /// Successful mappings.
    pub maps: usize,
    /// Mappings dropped.
    pub unmaps: usize,
    /// Every buffer index queued, in order.
    pub queued: Vec<u32>,
    /// Every count passed to `request_buffers`.
    pub buffer_requests: Vec<u32>,
    /// Formats set.
    pub formats_set: usize,
    /// Rates set.
    pub rates_set: Vec<u32>,
    /// Stream-on calls.
    pub stream_ons: usize,
    /// Stream-off calls.
    pub stream_offs: usize,
}

#[derive(Debug, Default)]
struct Shared {
    log: MockLog,
    filled: HashMap<u32, Vec<u8>>,
}

/// Read access to a mock device's log after the device has been moved.
#[derive(Debug, Clone)]
pub struct MockLogHandle(Rc<RefCell<Shared>>);

impl MockLogHandle {
    /// Copy of the log as it stands.
    pub fn snapshot(&self) -> MockLog {
        self.0.borrow().log.clone()
    }
}

/// Mock device for testing without hardware.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    pattern: TestPattern,
    frame_count: u32,
    granted: u32,
    grant_override: Option<u32>,
    padding: usize,
    queue: VecDeque<u32>,
    streaming: bool,
    fail_map_at: Option<u32>,
    reject_format: bool,
    reject_rate: bool,
    fail_stream_on: bool,
    fail_dequeue: bool,
    shared: Rc<RefCell<Shared>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, PixelFormat::Yuyv422),
            pattern: TestPattern::ColorBars,
            frame_count: 0,
            granted: 0,
            grant_override: None,
            padding: 0,
            queue: VecDeque::new(),
            streaming: false,
            fail_map_at: None,
            reject_format: false,
            reject_rate: false,
            fail_stream_on: false,
            fail_dequeue: false,
            shared: Rc::default(),
        }
    }

    /// Set the format for this mock device.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the pattern written into dequeued buffers.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Grant this many buffers regardless of the request.
    #[must_use]
    pub const fn with_granted_buffers(mut self, granted: u32) -> Self {
        self.grant_override = Some(granted);
        self
    }

    /// Make every buffer `padding` bytes longer than one frame.
    #[must_use]
    pub const fn with_buffer_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// Fail to map buffer `index`.
    #[must_use]
    pub const fn with_map_failure_at(mut self, index: u32) -> Self {
        self.fail_map_at = Some(index);
        self
    }

    /// Reject every format.
    #[must_use]
    pub const fn rejecting_format(mut self) -> Self {
        self.reject_format = true;
        self
    }

    /// Reject every frame rate.
    #[must_use]
    pub const fn rejecting_rate(mut self) -> Self {
        self.reject_rate = true;
        self
    }

    /// Fail to start streaming.
    #[must_use]
    pub const fn failing_stream_on(mut self) -> Self {
        self.fail_stream_on = true;
        self
    }

    /// Fail every dequeue.
    #[must_use]
    pub const fn failing_dequeue(mut self) -> Self {
        self.fail_dequeue = true;
        self
    }

    /// Handle for inspecting calls after the device is moved.
    pub fn log_handle(&self) -> MockLogHandle {
        MockLogHandle(Rc::clone(&self.shared))
    }

    fn buffer_len(&self) -> usize {
        self.format.size as usize + self.padding
    }
}

impl CameraDevice for MockDevice {
    type Mapping = MockMapping;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        if self.reject_format {
            return Err(io::Error::other("format not supported"));
        }
        let pixel_format = PixelFormat::from_fourcc(format.fourcc).unwrap_or_default();
        self.format = Format::new(format.width, format.height, pixel_format);
        self.shared.borrow_mut().log.formats_set += 1;
        Ok(self.format.clone())
    }

    fn set_frame_rate(&mut self, fps: u32) -> io::Result<()> {
        if self.reject_rate {
            return Err(io::Error::other("frame interval not supported"));
        }
        self.shared.borrow_mut().log.rates_set.push(fps);
        Ok(())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.shared.borrow_mut().log.buffer_requests.push(count);
        self.queue.clear();
        self.granted = if count == 0 {
            0
        } else {
            self.grant_override.unwrap_or(count)
        };
        Ok(self.granted)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferDescriptor> {
        if index >= self.granted {
            return Err(io::Error::other(format!("no buffer {index}")));
        }
        let length = self.buffer_len();
        Ok(BufferDescriptor {
            index,
            length,
            offset: index * u32::try_from(length).unwrap_or(u32::MAX),
        })
    }

    fn map_buffer(&self, descriptor: &BufferDescriptor) -> io::Result<MockMapping> {
        if self.fail_map_at == Some(descriptor.index) {
            return Err(io::Error::other("mmap failed"));
        }
        self.shared.borrow_mut().log.maps += 1;
        Ok(MockMapping {
            index: descriptor.index,
            data: vec![0xAA; descriptor.length],
            shared: Rc::clone(&self.shared),
        })
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        if index >= self.granted || self.queue.contains(&index) {
            return Err(io::Error::other(format!("cannot queue buffer {index}")));
        }
        self.queue.push_back(index);
        self.shared.borrow_mut().log.queued.push(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<Dequeued> {
        if self.fail_dequeue {
            return Err(io::Error::other("device disconnected"));
        }
        if !self.streaming {
            return Err(io::Error::other("not streaming"));
        }
        let index = self
            .queue
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no buffer queued"))?;

        let mut data = generate_test_frame(&self.format, self.pattern);
        data.resize(self.buffer_len(), 0);
        self.shared.borrow_mut().filled.insert(index, data);

        let sequence = self.frame_count;
        self.frame_count += 1;

        Ok(Dequeued {
            index,
            metadata: FrameMetadata {
                sequence,
                timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
                bytes_used: self.format.size,
            },
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        if self.fail_stream_on {
            return Err(io::Error::other("stream on refused"));
        }
        self.streaming = true;
        self.shared.borrow_mut().log.stream_ons += 1;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.streaming = false;
        self.queue.clear();
        self.shared.borrow_mut().log.stream_offs += 1;
        Ok(())
    }
}

/// Heap-backed stand-in for a mapped buffer.
pub struct MockMapping {
    index: u32,
    data: Vec<u8>,
    shared: Rc<RefCell<Shared>>,
}

impl MappedRegion for MockMapping {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn begin_cpu_access(&mut self) {
        if let Some(filled) = self.shared.borrow_mut().filled.remove(&self.index) {
            let len = filled.len().min(self.data.len());
            self.data[..len].copy_from_slice(&filled[..len]);
        }
    }
}

impl Drop for MockMapping {
    fn drop(&mut self) {
        self.shared.borrow_mut().log.unmaps += 1;
    }
}

/// Scripted decoder: every slice NAL unit yields `frames_per_slice` images.
///
/// NAL type 31 is treated as undecodable.
pub struct MockDecoder {
    width: u32,
    height: u32,
    frames_per_slice: usize,
    reorder_depth: usize,
    failing_flush: bool,
    produced: u8,
    held: VecDeque<DecodedImage>,
    ready: VecDeque<DecodedImage>,
}

impl MockDecoder {
    /// A decoder reporting `width` x `height` images.
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames_per_slice: 1,
            reorder_depth: 0,
            failing_flush: false,
            produced: 0,
            held: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }

    /// Emit several images per slice.
    #[must_use]
    pub const fn with_frames_per_slice(mut self, frames: usize) -> Self {
        self.frames_per_slice = frames;
        self
    }

    /// Hold up to `depth` images back until later slices or a flush release them.
    #[must_use]
    pub const fn with_reorder_depth(mut self, depth: usize) -> Self {
        self.reorder_depth = depth;
        self
    }

    /// Make `flush` report an error.
    #[must_use]
    pub const fn with_failing_flush(mut self) -> Self {
        self.failing_flush = true;
        self
    }
}

impl VideoDecoder for MockDecoder {
    fn submit(&mut self, unit: &[u8]) -> Result<(), String> {
        let zeros = unit.iter().take_while(|b| **b == 0).count();
        let header = unit.get(zeros + 1).copied().ok_or("empty unit")?;

        match header & 0x1F {
            1 | 5 => {
                for _ in 0..self.frames_per_slice {
                    self.produced = self.produced.wrapping_add(1);
                    let stride = self.width as usize + 16;
                    self.held.push_back(DecodedImage {
                        width: self.width,
                        height: self.height,
                        stride,
                        plane: vec![self.produced; stride * self.height as usize],
                    });
                }
                while self.held.len() > self.reorder_depth {
                    self.ready.extend(self.held.pop_front());
                }
                Ok(())
            }
            31 => Err("unsupported NAL unit type 31".to_owned()),
            _ => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<(), String> {
        if self.failing_flush {
            return Err("flush failed".to_owned());
        }
        self.ready.append(&mut self.held);
        Ok(())
    }

    fn poll(&mut self) -> Option<DecodedImage> {
        self.ready.pop_front()
    }
}

/// Annex-B stream made of the given NAL payloads, each behind a 4-byte start code.
pub fn annexb(units: &[&[u8]]) -> Vec<u8> {
    units
        .iter()
        .flat_map(|unit| [0, 0, 0, 1].iter().chain(unit.iter()).copied())
        .collect()
}

/// Generate test frame data based on pattern.
fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let mut data = vec![0u8; format.size as usize];

    if PixelFormat::from_fourcc(format.fourcc) != Some(PixelFormat::Yuyv422) {
        data.fill(0x80);
        return data;
    }

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut data, format.width, format.height);
        }
        TestPattern::Gradient => {
            generate_gradient(&mut data, format.width, format.height);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(&mut data, y, u, v);
        }
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if offset + 3 < data.len() {
                data[offset] = y_val; // Y0
                data[offset + 1] = u_val; // U
                data[offset + 2] = y_val; // Y1
                data[offset + 3] = v_val; // V
            }
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if offset + 3 < data.len() {
                data[offset] = y_val; // Y0
                data[offset + 1] = 128; // U (neutral)
                data[offset + 2] = y_val; // Y1
                data[offset + 3] = 128; // V (neutral)
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for quad in data.chunks_exact_mut(4) {
        quad.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_device_format() {
        let mut device = MockDevice::new();
        let new_format = Format::new(1280, 720, PixelFormat::Yuyv422);
        let actual = device
            .set_format(&new_format)
            .expect("set_format should succeed");
        assert_eq!(actual.width, 1280);
        assert_eq!(actual.height, 720);
        assert_eq!(device.log_handle().snapshot().formats_set, 1);
    }

    #[test]
    fn test_mock_dequeue_follows_queue_order() {
        let mut device = MockDevice::new().with_format(Format::new(16, 2, PixelFormat::Yuyv422));
        device.request_buffers(2).expect("request_buffers");
        device.queue_buffer(1).expect("queue 1");
        device.queue_buffer(0).expect("queue 0");
        device.stream_on().expect("stream on");

        let first = device.dequeue_buffer().expect("dequeue");
        let second = device.dequeue_buffer().expect("dequeue");
        assert_eq!((first.index, first.metadata.sequence), (1, 0));
        assert_eq!((second.index, second.metadata.sequence), (0, 1));
        assert!(device.dequeue_buffer().is_err());
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, PixelFormat::Yuyv422);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, PixelFormat::Yuyv422);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = 479 * 640 * 2;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, PixelFormat::Yuyv422);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));

        assert_eq!(&data[..4], &[128, 64, 128, 192]);
    }

    #[test]
    fn test_mock_decoder_script() {
        let mut decoder = MockDecoder::new(4, 2).with_frames_per_slice(2);

        decoder.submit(&[0, 0, 0, 1, 0x67, 0x42]).expect("sps accepted");
        assert!(decoder.poll().is_none());

        decoder.submit(&[0, 0, 1, 0x65, 0x88]).expect("idr accepted");
        assert_eq!(decoder.poll().map(|img| img.plane[0]), Some(1));
        assert_eq!(decoder.poll().map(|img| img.plane[0]), Some(2));
        assert!(decoder.poll().is_none());

        assert!(decoder.submit(&[0, 0, 1, 0x1F]).is_err());
    }

    #[test]
    fn test_mock_decoder_holds_back_until_flush() {
        let mut decoder = MockDecoder::new(4, 2).with_reorder_depth(1);

        decoder.submit(&[0, 0, 1, 0x65, 0x88]).expect("idr accepted");
        assert!(decoder.poll().is_none());

        decoder.submit(&[0, 0, 1, 0x41, 0x9A]).expect("slice accepted");
        assert_eq!(decoder.poll().map(|img| img.plane[0]), Some(1));
        assert!(decoder.poll().is_none());

        decoder.flush().expect("flush");
        assert_eq!(decoder.poll().map(|img| img.plane[0]), Some(2));
        assert!(decoder.poll().is_none());
    }
}
