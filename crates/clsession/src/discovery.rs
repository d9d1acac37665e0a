//! Platform/device enumeration and selection.

use std::fmt;

use tracing::{debug, warn};

use crate::driver::ComputeDriver;
use crate::error::{ClStatus, FatalError, Result, Stage};

/// A device as seen during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListing {
    /// Position within its platform's device list.
    pub index: usize,
    pub name: String,
}

/// A platform and every device it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformListing {
    /// Position within the platform list.
    pub index: usize,
    pub name: String,
    pub devices: Vec<DeviceListing>,
}

impl fmt::Display for PlatformListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\t{}. Platform Name : {}", self.index, self.name)?;
        for device in &self.devices {
            writeln!(f, "\t\t{}.{} Device Name : {}", self.index, device.index, device.name)?;
        }
        Ok(())
    }
}

/// Outcome of enumerating every platform and device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// No platform is installed.
    NoPlatforms,
    /// Enumeration stopped at a platform without devices. `listed` holds the
    /// platforms enumerated before it.
    NoDevices { platform: String, listed: Vec<PlatformListing> },
    Found(Vec<PlatformListing>),
}

/// Which platform and device a session should use.
///
/// `None` selects position 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceSelection {
    pub platform: Option<usize>,
    pub device: Option<usize>,
    /// Enumerate and print only; create nothing.
    pub list_only: bool,
}

impl DeviceSelection {
    /// First platform, first device.
    pub fn first() -> Self {
        Self::default()
    }

    pub fn list_only() -> Self {
        Self { list_only: true, ..Self::default() }
    }

    pub fn at(platform: usize, device: usize) -> Self {
        Self { platform: Some(platform), device: Some(device), list_only: false }
    }

    /// Build from signed indices where any negative value means "first".
    pub fn from_raw(platform: i32, device: i32, list_only: bool) -> Self {
        Self {
            platform: usize::try_from(platform).ok(),
            device: usize::try_from(device).ok(),
            list_only,
        }
    }

    pub fn platform_index(&self) -> usize {
        self.platform.unwrap_or(0)
    }

    pub fn device_index(&self) -> usize {
        self.device.unwrap_or(0)
    }
}

/// Enumerate all platforms and their devices, printing one line per
/// platform and one indented line per device to stdout.
///
/// Zero platforms, or a platform with zero devices, is reported through the
/// returned [`Discovery`] rather than as an error. Any other driver failure
/// is fatal.
pub fn discover<D: ComputeDriver>(driver: &D) -> Result<Discovery> {
    let platforms = match driver.platforms() {
        Ok(platforms) => platforms,
        Err(e) if e.status == ClStatus::PlatformNotFoundKhr => Vec::new(),
        Err(e) => {
            return Err(FatalError::new(Stage::Enumerate, "Platform query failed", e).into())
        }
    };

    if platforms.is_empty() {
        warn!("No OpenCL platform found");
        return Ok(Discovery::NoPlatforms);
    }
    println!("Found {} platform(s)", platforms.len());

    let mut listed = Vec::with_capacity(platforms.len());
    for (index, platform) in platforms.iter().enumerate() {
        let name = driver.platform_name(platform).unwrap_or_default();
        println!("\t{index}. Platform Name : {name}");
        debug!("Scanning platform {index}: {name}");

        let devices = match driver.devices(platform) {
            Ok(devices) => devices,
            Err(e) if e.status == ClStatus::DeviceNotFound => Vec::new(),
            Err(e) => {
                return Err(FatalError::new(Stage::Enumerate, "Device query failed", e).into())
            }
        };

        if devices.is_empty() {
            warn!("No OpenCL devices found on platform '{name}'");
            return Ok(Discovery::NoDevices { platform: name, listed });
        }
        println!("Found {} device(s)", devices.len());

        let devices = devices
            .iter()
            .enumerate()
            .map(|(j, device)| {
                let device_name = driver.device_name(device).unwrap_or_default();
                println!("\t\t{index}.{j} Device Name : {device_name}");
                DeviceListing { index: j, name: device_name }
            })
            .collect();

        listed.push(PlatformListing { index, name, devices });
    }

    Ok(Discovery::Found(listed))
}
