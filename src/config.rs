//! Process configuration. Read once at startup and handed to the server; the
//! request path never consults it again except through `web::Data`.

use anyhow::{ensure, Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::env;

/// Config file picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "vg.toml";

/// Prefix for environment overrides, e.g. `VG_WORKERS=4`
pub const ENV_PREFIX: &str = "VG";

/// Unprefixed variables honoured for compatibility with existing service
/// units, as `(config key, variable)`
const BARE_ENV_OVERRIDES: [(&str, &str); 2] = [("host", "HOST"), ("port", "PORT")];

#[derive(Debug, Clone)]
pub struct Settings {
    /// Address to bind the listener to
    pub host: String,

    pub port: u16,

    /// Number of actix worker threads
    pub workers: usize,

    /// Default tracing filter, used when `RUST_LOG` is unset
    pub log: String,

    /// Maximum accepted JSON body size, in bytes
    pub json_limit: usize,

    /// Maximum accepted size of an uploaded file, in bytes
    pub upload_limit: usize,
}

/// Settings as read. `config` narrows integers with `as` casts, so numbers
/// are taken as `i64` and range-checked when converting.
#[derive(Deserialize)]
struct RawSettings {
    host: String,
    port: i64,
    workers: i64,
    log: String,
    json_limit: i64,
    upload_limit: i64,
}

impl TryFrom<RawSettings> for Settings {
    type Error = anyhow::Error;

    fn try_from(raw: RawSettings) -> Result<Self> {
        let settings = Settings {
            host: raw.host,
            port: u16::try_from(raw.port).context("port out of range")?,
            workers: usize::try_from(raw.workers).context("workers out of range")?,
            log: raw.log,
            json_limit: usize::try_from(raw.json_limit).context("json_limit out of range")?,
            upload_limit: usize::try_from(raw.upload_limit).context("upload_limit out of range")?,
        };

        ensure!(settings.workers > 0, "workers must be at least 1");
        ensure!(!settings.host.is_empty(), "host must not be empty");

        Ok(settings)
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file, `VG_*` variables
    /// and finally `HOST`/`PORT`.
    ///
    /// An explicitly given `path` must exist; the default file is optional.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut builder = Self::defaults()?
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        for (key, var) in BARE_ENV_OVERRIDES {
            if let Ok(value) = env::var(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        Self::finish(builder)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8000_i64)?
            .set_default("workers", 2_i64)?
            .set_default("log", "info")?
            .set_default("json_limit", 64_i64 * 1024 * 1024)?
            .set_default("upload_limit", 64_i64 * 1024 * 1024)?)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let raw: RawSettings = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        raw.try_into()
    }
}
