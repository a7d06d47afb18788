//! Configuration management for usbasp-console.
//!
//! Settings live in `~/.usbasp-console/config.toml`:
//!
//! ```toml
//! # Append received text to this file (optional)
//! capture_file = "session.log"
//!
//! [serial]
//! # 2400, 4800, 9600, 19200, 28800 or 38400
//! baud_rate = 9600
//! # "manual" keeps the file as written, "auto" stores the last used rate on exit
//! baud_rate_type = "manual"
//!
//! [console]
//! # Committed lines kept on screen (50..=500)
//! max_rows = 100
//! local_echo = false
//! foreground = "#000000"
//! background = "#FFFFFF"
//! ```
//!
//! Invalid values are replaced by their defaults when the file is loaded.

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::term::state::{DEF_MAX_ROWS, MAX_ROWS, MIN_ROWS};
use crate::core::usb::BaudRate;

/// Directory holding the config file and the log
const APP_DIR: &str = ".usbasp-console";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Received text is appended here when set
    pub capture_file: Option<PathBuf>,
    /// Probe UART settings
    pub serial: SerialConfig,
    /// Console display settings
    pub console: ConsoleConfig,
}

/// How the baud rate setting is maintained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaudRateType {
    #[default]
    Manual,
    /// Remember the last rate used
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate in bits per second
    pub baud_rate: u32,
    pub baud_rate_type: BaudRateType,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::default().bps(),
            baud_rate_type: BaudRateType::Manual,
        }
    }
}

impl SerialConfig {
    /// Configured rate; falls back to the default for unsupported values
    pub fn baud(&self) -> BaudRate {
        BaudRate::from_bps(self.baud_rate)
            .filter(|b| !b.is_experimental())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub max_rows: usize,
    /// Feed typed bytes into the console as well as to the device
    pub local_echo: bool,
    /// Text color, `#RRGGBB`
    pub foreground: String,
    /// Background color, `#RRGGBB`
    pub background: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_rows: DEF_MAX_ROWS,
            local_echo: false,
            foreground: "#000000".to_string(),
            background: "#FFFFFF".to_string(),
        }
    }
}

impl ConsoleConfig {
    pub fn foreground_color(&self) -> Color {
        Color::parse(&self.foreground).unwrap_or(Color::BLACK)
    }

    pub fn background_color(&self) -> Color {
        Color::parse(&self.background).unwrap_or(Color::WHITE)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                match fs::read_to_string(&path) {
                    Ok(content) => return Self::from_toml(&content),
                    Err(e) => warn!("Cannot read {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    /// Parse and validate; an unparsable document yields the defaults
    pub fn from_toml(content: &str) -> Self {
        match toml::from_str::<Config>(content) {
            Ok(mut config) => {
                config.validate();
                config
            }
            Err(e) => {
                warn!("Invalid configuration, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::get_config_path().ok_or_else(|| anyhow!("Could not determine config path"))?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Replace out-of-range values with their defaults
    pub fn validate(&mut self) {
        let defaults = Config::default();

        match BaudRate::from_bps(self.serial.baud_rate) {
            Some(baud) if !baud.is_experimental() => {}
            _ => {
                warn!(
                    "Unsupported baud rate {}, using {}",
                    self.serial.baud_rate, defaults.serial.baud_rate
                );
                self.serial.baud_rate = defaults.serial.baud_rate;
            }
        }

        if !(MIN_ROWS..=MAX_ROWS).contains(&self.console.max_rows) {
            warn!(
                "max_rows {} outside {}..={}, using {}",
                self.console.max_rows, MIN_ROWS, MAX_ROWS, DEF_MAX_ROWS
            );
            self.console.max_rows = DEF_MAX_ROWS;
        }

        if Color::parse(&self.console.foreground).is_none() {
            warn!("Invalid foreground color {:?}", self.console.foreground);
            self.console.foreground = defaults.console.foreground;
        }
        if Color::parse(&self.console.background).is_none() {
            warn!("Invalid background color {:?}", self.console.background);
            self.console.background = defaults.console.background;
        }
    }

    /// Application directory, created on first use
    pub fn app_dir() -> Option<PathBuf> {
        let dir = home_dir()?.join(APP_DIR);
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir)
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        Self::app_dir().map(|dir| dir.join("config.toml"))
    }
}

/// Color definition (RGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB`
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("");
        assert_eq!(config, Config::default());
        assert_eq!(config.serial.baud(), BaudRate::B9600);
        assert_eq!(config.serial.baud_rate_type, BaudRateType::Manual);
        assert_eq!(config.console.max_rows, 100);
        assert_eq!(config.console.foreground_color(), Color::BLACK);
        assert_eq!(config.console.background_color(), Color::WHITE);
        assert!(config.capture_file.is_none());
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            r##"
capture_file = "out.txt"

[serial]
baud_rate = 19200
baud_rate_type = "auto"

[console]
max_rows = 250
local_echo = true
foreground = "#00FF00"
background = "#101010"
"##,
        );
        assert_eq!(config.capture_file, Some(PathBuf::from("out.txt")));
        assert_eq!(config.serial.baud(), BaudRate::B19200);
        assert_eq!(config.serial.baud_rate_type, BaudRateType::Auto);
        assert_eq!(config.console.max_rows, 250);
        assert!(config.console.local_echo);
        assert_eq!(config.console.foreground_color(), Color::new(0, 255, 0));
        assert_eq!(config.console.background_color(), Color::new(16, 16, 16));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_toml(
            r##"
[serial]
baud_rate = 57600

[console]
max_rows = 10
foreground = "green"
"##,
        );
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.console.max_rows, DEF_MAX_ROWS);
        assert_eq!(config.console.foreground, "#000000");
    }

    #[test]
    fn test_unparsable_file_gives_defaults() {
        let config = Config::from_toml("[serial\nbaud_rate = ");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = Config::default();
        config.serial.baud_rate = 4800;
        config.serial.baud_rate_type = BaudRateType::Auto;
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(Config::from_toml(&text), config);
    }

    #[test]
    fn test_color_parse() {
        assert_eq!(Color::parse("#ff8000"), Some(Color::new(255, 128, 0)));
        assert_eq!(Color::parse("ff8000"), None);
        assert_eq!(Color::parse("#ff80"), None);
        assert_eq!(Color::parse("#gg0000"), None);
    }
}
