use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{error::Error, serial::line_source::ReconnectPolicy};

/// Environment variable overriding [`DeviceConfig::path`].
pub const ENV_SERIAL_PATH: &str = "SERIAL_PATH";

/// Environment variable overriding [`DeviceConfig::baud`].
pub const ENV_BAUD: &str = "BAUD";

/// Environment variable overriding [`Config::port`].
pub const ENV_PORT: &str = "PORT";

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 3000;

/// The default baud rate.
pub const DEFAULT_BAUD: u32 = 9600;

#[cfg(windows)]
const DEFAULT_SERIAL_PATH: &str = "COM15";

#[cfg(not(windows))]
const DEFAULT_SERIAL_PATH: &str = "/dev/ttyACM0";

/// The serial device to read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Likely "/dev/ttyACMx" or "COMx".
    pub path: String,

    /// The speed of the device.
    pub baud: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_SERIAL_PATH.into(),
            baud: DEFAULT_BAUD,
        }
    }
}

/// How to reopen the serial device after it closes.
/// See [`ReconnectPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Fixed delay between attempts, in milliseconds.
    pub delay_ms: u64,

    /// Give up after this many failed attempts in a row.
    /// Retries forever if not set.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();

        Self {
            delay_ms: policy.delay.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

/// The configuration used for running the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// The serial device.
    pub device: DeviceConfig,

    /// The port the web server listens on.
    pub port: u16,

    /// Client assets are served from this directory.
    pub static_dir: PathBuf,

    /// Reopening the serial device.
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from("public"),
            reconnect: ReconnectConfig::default(),
        }
    }
}

fn parse_nonzero<T>(name: &str, value: &str) -> Option<T>
where
    T: std::str::FromStr + Default + PartialEq,
{
    match value.trim().parse::<T>() {
        Ok(v) if v != T::default() => Some(v),
        _ => {
            warn!(%name, %value, "Ignoring bad value");
            None
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            device: DeviceConfig {
                path: "/dev/ttyUSB0".into(),
                baud: 115_200,
            },
            port: 8080,
            static_dir: PathBuf::from("/srv/captcha/public"),
            reconnect: ReconnectConfig {
                delay_ms: 5_000,
                max_attempts: Some(100),
            },
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .expect("Config should serialize")
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();

        let s = std::fs::read_to_string(path).map_err(|e| Error::ConfigFile {
            path: path.display().to_string(),
            problem: e.to_string(),
        })?;

        Self::deserialize(&s).map_err(|e| Error::ConfigFile {
            path: path.display().to_string(),
            problem: e.to_string(),
        })
    }

    /// Override fields from the process environment.
    /// See [`ENV_SERIAL_PATH`], [`ENV_BAUD`] and [`ENV_PORT`].
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Override fields using the given lookup.
    ///
    /// Numbers which do not parse, or are zero, are ignored
    /// and the value from before is kept.
    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_SERIAL_PATH).filter(|path| !path.is_empty()) {
            debug!(%path, "Serial path from environment");
            self.device.path = path;
        }

        if let Some(baud) = lookup(ENV_BAUD).and_then(|v| parse_nonzero(ENV_BAUD, &v)) {
            debug!(%baud, "Baud from environment");
            self.device.baud = baud;
        }

        if let Some(port) = lookup(ENV_PORT).and_then(|v| parse_nonzero(ENV_PORT, &v)) {
            debug!(%port, "Port from environment");
            self.port = port;
        }

        self
    }

    /// The reconnect policy described by this configuration.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(self.reconnect.delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.device.path.is_empty() {
            return Err(Error::BadConfig("The serial device path is empty.".into()));
        }

        if self.device.baud == 0 {
            return Err(Error::BadConfig(format!(
                "The baud rate of `{}` is zero.",
                self.device.path
            )));
        }

        if self.reconnect.delay_ms == 0 {
            return Err(Error::BadConfig(
                "The reconnect delay is zero. This would retry in a tight loop, please use a positive delay.".into(),
            ));
        }

        if self.reconnect.max_attempts == Some(0) {
            return Err(Error::BadConfig(
                "The maximum number of reconnect attempts is zero. Leave it out to retry forever.".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = Config::default();

        assert_eq!(c.device.baud, 9600);
        assert_eq!(c.port, 3000);
        assert_eq!(c.reconnect_policy(), ReconnectPolicy::default());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn serialize_roundtrip_example() {
        let c = Config::example();
        let s = c.serialize_pretty();

        println!("{s}");

        assert_eq!(Config::deserialize(&s).unwrap(), c);
    }

    #[test]
    fn deserialize_partial() {
        let input = r#"
(
    device: (
        path: "COM3",
        baud: 115200,
    ),
    reconnect: (
        delay_ms: 1000,
        max_attempts: 5,
    ),
)
"#;
        let c = Config::deserialize(input).unwrap();

        assert_eq!(c.device.path, "COM3");
        assert_eq!(c.port, DEFAULT_PORT);
        assert_eq!(
            c.reconnect_policy(),
            ReconnectPolicy::fixed(Duration::from_secs(1)).with_max_attempts(5)
        );
    }

    #[test]
    fn bad_ron_is_bad_config() {
        let err = Config::deserialize("(port: \"nope\")").unwrap_err();

        assert!(err.try_into_bad_config().is_ok());
    }

    #[test]
    fn env_overrides() {
        let c = Config::default().with_env_from(env(&[
            (ENV_SERIAL_PATH, "/dev/ttyUSB3"),
            (ENV_BAUD, "57600"),
            (ENV_PORT, "8081"),
        ]));

        assert_eq!(c.device.path, "/dev/ttyUSB3");
        assert_eq!(c.device.baud, 57600);
        assert_eq!(c.port, 8081);
    }

    #[test]
    fn env_bad_numbers_ignored() {
        let c = Config::default().with_env_from(env(&[
            (ENV_SERIAL_PATH, ""),
            (ENV_BAUD, "fast"),
            (ENV_PORT, "0"),
        ]));

        assert_eq!(c, Config::default());
    }

    #[test]
    fn bad_config_zero_delay() {
        let mut c = Config::default();
        c.reconnect.delay_ms = 0;

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("reconnect delay"));
    }

    #[test]
    fn bad_config_zero_baud() {
        let mut c = Config::default();
        c.device.baud = 0;

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        // Error message mentions the problematic device
        assert!(err.contains(DEFAULT_SERIAL_PATH));
    }

    #[test]
    fn missing_file() {
        let err = Config::new_from_path("/definitely/not/here.ron").unwrap_err();

        assert!(matches!(err, Error::ConfigFile { .. }));
    }
}
