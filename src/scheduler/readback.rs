//! Non-blocking display readback.

use crate::device::{BufferId, ComputeDevice, ReadbackStatus, ReadbackTicket};

/// Keeps exactly one readback of a buffer in flight.
///
/// Polled once per tick. Completed data is handed out and a new request goes out in the
/// same poll; failures skip the frame and re-request. Nothing here ever blocks.
#[derive(Debug)]
pub struct ReadbackSlot {
    buffer: BufferId,
    ticket: Option<ReadbackTicket>,
    completed: u64,
    failed: u64,
}

impl ReadbackSlot {
    pub fn new(buffer: BufferId) -> Self {
        Self {
            buffer,
            ticket: None,
            completed: 0,
            failed: 0,
        }
    }

    fn request(&mut self, device: &mut dyn ComputeDevice) {
        match device.request_readback(self.buffer) {
            Ok(ticket) => self.ticket = Some(ticket),
            Err(e) => {
                self.failed += 1;
                self.ticket = None;
                log::warn!("Display readback request failed: {e}");
            }
        }
    }

    /// Returns the buffer contents when a readback has completed since the last poll.
    pub fn poll(&mut self, device: &mut dyn ComputeDevice) -> Option<Vec<f32>> {
        let Some(ticket) = self.ticket else {
            self.request(device);
            return None;
        };

        match device.poll_readback(ticket) {
            ReadbackStatus::Pending => None,
            ReadbackStatus::Ready(data) => {
                self.completed += 1;
                self.request(device);
                Some(data)
            }
            ReadbackStatus::Failed(reason) => {
                self.failed += 1;
                log::warn!("Display readback failed, skipping frame: {reason}");
                self.request(device);
                None
            }
        }
    }

    pub fn in_flight(&self) -> bool {
        self.ticket.is_some()
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Forget the in-flight request. The device drops it with the buffer.
    pub fn abandon(&mut self) {
        if self.ticket.take().is_some() {
            log::debug!("Abandoned in-flight readback of {:?}", self.buffer);
        }
    }
}
