//! nusb-based scanner transport implementation.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nusb::transfer::{Bulk, BulkOrInterrupt, In, Interrupt, Out};
use nusb::{DeviceInfo, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, trace, warn};

use super::traits::{ScannerTransport, TransportError, TransportListener};
use crate::config::{DeviceConfig, TransferKind};

/// Endpoint buffer size, also the largest frame delivered in one callback.
const READ_BUFFER_SIZE: usize = 4096;

/// Delay between enumeration attempts while waiting for the device.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A USB device that matches the configured vendor/product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// Enumerate attached devices, optionally restricted to one vendor.
pub fn list_scanners(vendor_id: Option<u16>) -> Result<Vec<DeviceSummary>, TransportError> {
    let devices = list_devices()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

    Ok(devices
        .filter(|d| vendor_id.is_none_or(|vid| d.vendor_id() == vid))
        .map(|d| DeviceSummary {
            vendor_id: d.vendor_id(),
            product_id: d.product_id(),
            manufacturer: d.manufacturer_string().map(str::to_owned),
            product: d.product_string().map(str::to_owned),
            serial_number: d.serial_number().map(str::to_owned),
        })
        .collect())
}

/// An open link: claimed interface plus the reader thread feeding the listener.
struct Link {
    interface: Interface,
    out_endpoint: Option<u8>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    vid: u16,
    pid: u16,
}

/// nusb-based scanner transport.
pub struct NusbTransport {
    config: DeviceConfig,
    trigger_command: Option<Vec<u8>>,
    link: Option<Link>,
}

impl NusbTransport {
    pub fn new(config: DeviceConfig) -> Result<Self, TransportError> {
        let trigger_command = config
            .trigger_bytes()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        if config.read_timeout_ms == 0 {
            return Err(TransportError::InvalidConfig(
                "read timeout must be greater than zero".into(),
            ));
        }

        Ok(Self {
            config,
            trigger_command,
            link: None,
        })
    }

    /// Poll enumeration until a matching device shows up or the open timeout runs out.
    fn wait_for_device(&self) -> Result<DeviceInfo, TransportError> {
        let timeout = self.config.open_timeout();
        let start = Instant::now();
        let mut poll_count = 0u64;

        loop {
            poll_count += 1;

            let found = list_devices()
                .wait()
                .map_err(|e| TransportError::OpenFailed(e.to_string()))?
                .find(|d| self.config.matches(d.vendor_id(), d.product_id()));

            if let Some(device_info) = found {
                debug!(poll_count, "Device found");
                return Ok(device_info);
            }
            if start.elapsed() >= timeout {
                return Err(TransportError::DeviceNotFound {
                    vid: self.config.vendor_id,
                    pid: self.config.product_id,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn establish(
        &self,
        device_info: DeviceInfo,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Link, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();
        let interface_number = self.config.interface;

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Opening scanner"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let claimed = if self.config.detach_kernel_driver {
            device.detach_and_claim_interface(interface_number).wait()
        } else {
            device.claim_interface(interface_number).wait()
        };
        let interface = claimed.map_err(|e| TransportError::ClaimInterfaceFailed {
            interface: interface_number,
            message: e.to_string(),
        })?;

        let wanted = match self.config.transfer {
            TransferKind::Bulk => nusb::descriptors::TransferType::Bulk,
            TransferKind::Interrupt => nusb::descriptors::TransferType::Interrupt,
        };

        let mut in_endpoint: Option<u8> = None;
        let mut out_endpoint: Option<u8> = None;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() != interface_number {
                    continue;
                }
                for alt in iface.alt_settings() {
                    for ep in alt.endpoints() {
                        if ep.transfer_type() != wanted {
                            continue;
                        }
                        if ep.direction() == nusb::transfer::Direction::In {
                            in_endpoint.get_or_insert(ep.address());
                        } else {
                            out_endpoint.get_or_insert(ep.address());
                        }
                    }
                }
            }
        }

        let in_endpoint = in_endpoint.ok_or_else(|| TransportError::EndpointNotFound {
            ep_type: format!("{:?}", self.config.transfer),
            direction: "In".into(),
        })?;

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %out_endpoint.map_or("none".to_string(), |ep| format!("0x{:02X}", ep)),
            "Scanner link up"
        );

        let stop = Arc::new(AtomicBool::new(false));
        let read_timeout = self.config.read_timeout();
        let reader = match self.config.transfer {
            TransferKind::Bulk => {
                spawn_reader::<Bulk>(&interface, in_endpoint, read_timeout, &stop, listener)?
            }
            TransferKind::Interrupt => {
                spawn_reader::<Interrupt>(&interface, in_endpoint, read_timeout, &stop, listener)?
            }
        };

        Ok(Link {
            interface,
            out_endpoint,
            stop,
            reader: Some(reader),
            vid,
            pid,
        })
    }
}

fn spawn_reader<EpType: BulkOrInterrupt + Send + 'static>(
    interface: &Interface,
    address: u8,
    read_timeout: Duration,
    stop: &Arc<AtomicBool>,
    listener: Arc<dyn TransportListener>,
) -> Result<JoinHandle<()>, TransportError> {
    let endpoint = interface
        .endpoint::<EpType, In>(address)
        .map_err(|e| TransportError::ReadFailed(e.to_string()))?;
    let mut reader = endpoint
        .reader(READ_BUFFER_SIZE)
        .with_read_timeout(read_timeout);
    let stop = Arc::clone(stop);

    let handle = thread::Builder::new()
        .name("nlscan-usb-rx".into())
        .spawn(move || {
            listener.on_plug_changed(true);
            let mut buf = vec![0u8; READ_BUFFER_SIZE];

            while !stop.load(Ordering::Acquire) {
                match reader.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        trace!(bytes_read = n, "Frame received");
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        listener.on_data_received(&buf, n);
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        if !stop.load(Ordering::Acquire) {
                            warn!(error = %e, "Read failed, device gone");
                            listener.on_plug_changed(false);
                        }
                        break;
                    }
                }
            }
            debug!("Reader thread exiting");
        })?;

    Ok(handle)
}

fn write_command<EpType: BulkOrInterrupt>(
    interface: &Interface,
    address: u8,
    data: &[u8],
) -> Result<(), TransportError> {
    let endpoint = interface
        .endpoint::<EpType, Out>(address)
        .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

    let mut writer = endpoint.writer(READ_BUFFER_SIZE);
    writer
        .write_all(data)
        .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
    writer
        .flush()
        .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

    debug!(bytes_written = data.len(), "Command written");
    Ok(())
}

impl ScannerTransport for NusbTransport {
    #[instrument(level = "info", skip(self, listener), fields(vid = %format!("{:04X}", self.config.vendor_id)))]
    fn open(&mut self, listener: Arc<dyn TransportListener>) -> Result<(), TransportError> {
        if self.link.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        let device_info = self.wait_for_device()?;
        let link = self.establish(device_info, listener)?;
        self.link = Some(link);
        Ok(())
    }

    fn close(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        link.stop.store(true, Ordering::Release);
        if let Some(reader) = link.reader.take()
            && reader.join().is_err()
        {
            warn!("Reader thread panicked");
        }
        info!(
            vendor_id = %format!("{:04X}", link.vid),
            product_id = %format!("{:04X}", link.pid),
            "Scanner link closed"
        );
    }

    fn trigger(&mut self) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotOpen)?;
        let (Some(command), Some(out_endpoint)) = (&self.trigger_command, link.out_endpoint)
        else {
            return Err(TransportError::Unsupported);
        };

        match self.config.transfer {
            TransferKind::Bulk => write_command::<Bulk>(&link.interface, out_endpoint, command),
            TransferKind::Interrupt => {
                write_command::<Interrupt>(&link.interface, out_endpoint, command)
            }
        }
    }

    fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn device_ids(&self) -> Option<(u16, u16)> {
        self.link.as_ref().map(|l| (l.vid, l.pid))
    }
}

impl Drop for NusbTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_trigger() {
        let config = DeviceConfig {
            trigger_command: Some("1B3".into()),
            ..DeviceConfig::default()
        };
        assert!(matches!(
            NusbTransport::new(config),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_closed_transport() {
        let mut transport = NusbTransport::new(DeviceConfig::default()).unwrap();
        assert!(!transport.is_open());
        assert_eq!(transport.device_ids(), None);
        assert!(matches!(transport.trigger(), Err(TransportError::NotOpen)));
        transport.close();
    }
}
