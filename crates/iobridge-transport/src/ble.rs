//! BLE binding over a GATT service.
//!
//! The host writes requests into the write characteristic; replies go out as
//! notifications on the read characteristic, split into packets no larger
//! than [`MAX_PACKET_SIZE`].

use bytes::{Buf, BytesMut};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// IO server GATT service.
pub const SERVICE_UUID: &str = "bec069d9-e1dc-49c4-8a05-f14198ed6e57";
/// Characteristic the host writes requests into.
pub const WRITE_CHARACTERISTIC_UUID: &str = "3236de8b-f993-48d0-9688-0c6c9ed5f6d1";
/// Characteristic the server notifies replies on.
pub const READ_CHARACTERISTIC_UUID: &str = "f9eab5de-92e7-457e-b640-8bc64fc6ed7c";
/// Largest characteristic value exchanged in one operation.
pub const MAX_PACKET_SIZE: usize = 512;

/// Radio-side surface of a BLE peripheral stack.
pub trait GattLink: Send {
    /// Start advertising the IO server service.
    fn advertise(&mut self) -> std::io::Result<()>;

    /// Stop advertising and drop any central.
    fn shutdown(&mut self) -> std::io::Result<()>;

    /// Whether a central is connected and subscribed.
    fn is_connected(&self) -> bool;

    /// Next value written into the write characteristic, if any.
    fn poll_write(&mut self) -> Option<Vec<u8>>;

    /// Notify one value on the read characteristic.
    fn notify(&mut self, value: &[u8]) -> std::io::Result<()>;
}

pub struct BleTransport<G> {
    link: G,
    pending: BytesMut,
    open: bool,
}

impl<G: GattLink> BleTransport<G> {
    pub fn new(link: G) -> Self {
        Self {
            link,
            pending: BytesMut::new(),
            open: false,
        }
    }

    pub fn get_ref(&self) -> &G {
        &self.link
    }

    pub fn get_mut(&mut self) -> &mut G {
        &mut self.link
    }
}

impl<G: GattLink> Transport for BleTransport<G> {
    fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        self.link.advertise()?;
        info!(service = SERVICE_UUID, "ble advertising");
        self.open = true;
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        if !self.link.is_connected() {
            return Err(TransportError::NotConnected);
        }
        for chunk in buf.chunks(MAX_PACKET_SIZE) {
            self.link.notify(chunk)?;
        }
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        while let Some(value) = self.link.poll_write() {
            if value.len() > MAX_PACKET_SIZE {
                return Err(TransportError::PacketTooLarge {
                    size: value.len(),
                    max: MAX_PACKET_SIZE,
                });
            }
            self.pending.extend_from_slice(&value);
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.link.shutdown()?;
        self.pending.clear();
        self.open = false;
        debug!("ble link closed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ble"
    }
}
