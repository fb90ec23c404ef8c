use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::libraries::can::{CanController, CanFrame};

#[derive(Debug, Default)]
struct Controller {
    attached: bool,
    attach_error: Option<u8>,
    listen_only: bool,
    rx: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
}

/// CAN controller with a scripted receive queue and a record of sent frames.
#[derive(Debug, Clone, Default)]
pub struct SimCan {
    inner: Arc<Mutex<Controller>>,
}

impl SimCan {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Controller> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make the next attach fail with `code`.
    pub fn fail_attach(&self, code: u8) {
        self.lock().attach_error = Some(code);
    }

    pub fn push_rx(&self, frame: CanFrame) {
        self.lock().rx.push_back(frame);
    }

    pub fn sent(&self) -> Vec<CanFrame> {
        self.lock().sent.clone()
    }

    pub fn listen_only(&self) -> bool {
        self.lock().listen_only
    }
}

impl CanController for SimCan {
    fn attach(
        &mut self,
        _cs_pin: u8,
        _int_pin: u8,
        _oscillator_hz: u32,
        bitrate: u32,
    ) -> std::result::Result<u32, u8> {
        let mut controller = self.lock();
        if let Some(code) = controller.attach_error.take() {
            return Err(code);
        }
        controller.attached = true;
        Ok(bitrate)
    }

    fn detach(&mut self) {
        self.lock().attached = false;
    }

    fn read(&mut self) -> Option<CanFrame> {
        self.lock().rx.pop_front()
    }

    fn write(&mut self, frame: &CanFrame) -> bool {
        let mut controller = self.lock();
        if !controller.attached || controller.listen_only {
            return false;
        }
        controller.sent.push(frame.clone());
        true
    }

    fn set_listen_only(&mut self, listen_only: bool) -> u16 {
        self.lock().listen_only = listen_only;
        0
    }
}
