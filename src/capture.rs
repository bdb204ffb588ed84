//! Traffic acquisition: live devices and previously recorded capture files.
//!
//! Both are wrapped behind [`CaptureSource`] so the dispatch loop reads frames
//! the same way regardless of origin. A capture that cannot be opened is fatal
//! to the caller; once open, per-frame problems are the pipeline's concern.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap::{Activated, Capture, Device, Linktype};
use thiserror::Error;
use tracing::debug;

/// Read timeout for live captures, so the loop can observe the stop flag
/// even when the interface is quiet.
const READ_TIMEOUT_MS: i32 = 250;
const SNAPLEN: i32 = 65535;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device {name:?} not found")]
    DeviceNotFound { name: String },

    #[error("no capture device available")]
    NoDevice,

    #[error(transparent)]
    Pcap(#[from] pcap::Error),
}

/// An open capture handle plus the link-layer type it produces.
pub struct CaptureSource {
    capture: Capture<dyn Activated>,
    link_type: Linktype,
}

impl CaptureSource {
    /// Opens a live capture on the named device in promiscuous mode.
    pub fn open_device(name: &str) -> Result<Self, CaptureError> {
        let device = Device::list()?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| CaptureError::DeviceNotFound {
                name: name.to_string(),
            })?;

        let capture = Capture::from_device(device)?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .open()?;

        let link_type = capture.get_datalink();
        debug!(
            event_name = "capture.device_opened",
            device = name,
            link_type = link_type.0,
            "opened live capture"
        );

        Ok(CaptureSource {
            capture: capture.into(),
            link_type,
        })
    }

    /// Opens a recorded capture file for offline replay.
    pub fn open_file(path: &Path) -> Result<Self, CaptureError> {
        let capture = Capture::from_file(path)?;
        let link_type = capture.get_datalink();
        debug!(
            event_name = "capture.file_opened",
            path = %path.display(),
            link_type = link_type.0,
            "opened capture file"
        );

        Ok(CaptureSource {
            capture: capture.into(),
            link_type,
        })
    }

    pub fn link_type(&self) -> Linktype {
        self.link_type
    }

    /// Reads frames until the source is exhausted (offline) or the stop flag
    /// is raised (live). The handler receives the capture timestamp and the
    /// raw frame bytes.
    pub fn run<F>(mut self, stop: Arc<AtomicBool>, mut handle: F) -> Result<(), CaptureError>
    where
        F: FnMut(SystemTime, &[u8]),
    {
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }

            match self.capture.next_packet() {
                Ok(frame) => handle(frame_time(frame.header), frame.data),
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Resolves the device to capture on: the named device when given, the
/// system default otherwise.
pub fn resolve_device(name: Option<&str>) -> Result<String, CaptureError> {
    match name {
        Some(name) => Ok(name.to_string()),
        None => Device::lookup()?
            .map(|d| d.name)
            .ok_or(CaptureError::NoDevice),
    }
}

/// Names and descriptions of every capture device visible to the process.
pub fn list_devices() -> Result<Vec<(String, Option<String>)>, CaptureError> {
    let devices = Device::list()?
        .into_iter()
        .map(|d| (d.name, d.desc))
        .collect();
    Ok(devices)
}

fn frame_time(header: &pcap::PacketHeader) -> SystemTime {
    let secs = u64::try_from(header.ts.tv_sec).unwrap_or(0);
    let micros = u64::try_from(header.ts.tv_usec).unwrap_or(0);
    UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_micros(micros)
}
