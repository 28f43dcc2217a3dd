//! Scanner configuration, loaded from and saved to TOML.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::decode::DecodeConfig;

/// Newland Auto-ID USB vendor id.
pub const NEWLAND_VENDOR_ID: u16 = 0x1EAB;

/// USB transfer type used by the scanner's data endpoints.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// CDC-ACM style serial emulation.
    #[default]
    Bulk,
    /// HID-POS style reports.
    Interrupt,
}

/// Which device to open and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// USB vendor id to match.
    pub vendor_id: u16,
    /// USB product id to match; any product of the vendor when unset.
    pub product_id: Option<u16>,
    /// Interface carrying the data endpoints.
    pub interface: u8,
    /// Transfer type of the data endpoints.
    pub transfer: TransferKind,
    /// Poll interval of the reader thread, also the close latency bound.
    pub read_timeout_ms: u64,
    /// How long `open` keeps looking for the device before giving up.
    pub open_timeout_ms: u64,
    /// Detach a kernel driver bound to the interface before claiming it.
    pub detach_kernel_driver: bool,
    /// Hex-encoded software trigger command, e.g. `"1B 31"`.
    pub trigger_command: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: NEWLAND_VENDOR_ID,
            product_id: None,
            interface: 1,
            transfer: TransferKind::Bulk,
            read_timeout_ms: 200,
            open_timeout_ms: 3000,
            detach_kernel_driver: true,
            trigger_command: None,
        }
    }
}

impl DeviceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Decode the trigger command into raw bytes.
    pub fn trigger_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.trigger_command.as_deref().map(parse_hex).transpose()
    }

    /// Whether a device with these ids is the one this config selects.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == self.vendor_id && self.product_id.is_none_or(|pid| pid == product_id)
    }
}

/// Complete scanner configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub device: DeviceConfig,
    pub decode: DecodeConfig,
}

impl ScannerConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScannerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply command line overrides on top of the loaded values.
    pub fn with_overrides(mut self, vendor_id: Option<u16>, product_id: Option<u16>) -> Self {
        if let Some(vid) = vendor_id {
            self.device.vendor_id = vid;
        }
        if product_id.is_some() {
            self.device.product_id = product_id;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.read_timeout_ms == 0 {
            bail!("device.read_timeout_ms must be greater than zero");
        }
        if self.device.open_timeout_ms == 0 {
            bail!("device.open_timeout_ms must be greater than zero");
        }
        if self.decode.max_payload_len == 0 {
            bail!("decode.max_payload_len must be greater than zero");
        }
        self.device.trigger_bytes()?;
        Ok(())
    }
}

/// Parse whitespace separated or contiguous hex digits. Each byte may carry a `0x` prefix.
pub fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let digits: String = input
        .split_whitespace()
        .map(|tok| tok.replace("0x", "").replace("0X", ""))
        .collect();

    if digits.is_empty() {
        bail!("empty hex string");
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("invalid hex digits in {:?}", input);
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits in {:?}", input);
    }

    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair)?;
            u8::from_str_radix(pair, 16)
                .map_err(|e| anyhow::anyhow!("invalid hex byte {:?}: {}", pair, e))
        })
        .collect()
}

/// Parse a USB id given as `1eab`, `0x1EAB` or decimal `7851`.
///
/// Digits alone are decimal; hex needs the `0x` prefix or a letter.
pub fn parse_usb_id(input: &str) -> Result<u16> {
    let s = input.trim();
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)?
    } else if s.chars().any(|c| c.is_ascii_alphabetic()) {
        u16::from_str_radix(s, 16)?
    } else {
        s.parse()?
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("1B 31").unwrap(), vec![0x1B, 0x31]);
        assert_eq!(parse_hex("0x1b0x31").unwrap(), vec![0x1B, 0x31]);
        assert_eq!(parse_hex("7E0005").unwrap(), vec![0x7E, 0x00, 0x05]);
        assert!(parse_hex("").is_err());
        assert!(parse_hex("1B3").is_err());
        assert!(parse_hex("ZZ").is_err());
    }

    #[test]
    fn test_parse_hex_rejects_non_ascii() {
        assert!(parse_hex("aé1").is_err());
        assert!(parse_hex("1B é3").is_err());
    }

    #[test]
    fn test_parse_usb_id() {
        assert_eq!(parse_usb_id("0x1EAB").unwrap(), 0x1EAB);
        assert_eq!(parse_usb_id("1eab").unwrap(), 0x1EAB);
        assert_eq!(parse_usb_id("0010").unwrap(), 10);
        assert_eq!(parse_usb_id("7851").unwrap(), 7851);
        assert_eq!(parse_usb_id("1A06").unwrap(), 0x1A06);
        assert_eq!(parse_usb_id("42").unwrap(), 42);
        assert!(parse_usb_id("0xZZZZ").is_err());
    }

    #[test]
    fn test_device_matches() {
        let mut cfg = DeviceConfig::default();
        assert!(cfg.matches(NEWLAND_VENDOR_ID, 0x0001));
        assert!(!cfg.matches(0x8086, 0x0001));

        cfg.product_id = Some(0x1A06);
        assert!(cfg.matches(NEWLAND_VENDOR_ID, 0x1A06));
        assert!(!cfg.matches(NEWLAND_VENDOR_ID, 0x0001));
    }

    #[test]
    fn test_toml_partial_config() {
        let config: ScannerConfig = toml::from_str(
            r#"
[device]
product_id = 6662
transfer = "interrupt"
trigger_command = "1B 31"

[decode]
lossy = true
"#,
        )
        .unwrap();

        assert_eq!(config.device.vendor_id, NEWLAND_VENDOR_ID);
        assert_eq!(config.device.product_id, Some(6662));
        assert_eq!(config.device.transfer, TransferKind::Interrupt);
        assert_eq!(config.device.trigger_bytes().unwrap(), Some(vec![0x1B, 0x31]));
        assert!(config.decode.lossy);
        assert!(config.decode.strip_terminators);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ScannerConfig::default();
        config.device.read_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ScannerConfig::default();
        config.device.trigger_command = Some("XYZ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("nlscan-config-{}.toml", std::process::id()));
        let config = ScannerConfig::default().with_overrides(Some(0x05E0), Some(0x1200));
        config.save_to_file(&path).unwrap();

        let loaded = ScannerConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
        assert_eq!(loaded.device.vendor_id, 0x05E0);
    }
}
