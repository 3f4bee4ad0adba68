//! Daemon configuration document (`torrc`).
//!
//! The document is a line-oriented `Key Value` list. It is rebuilt from
//! scratch on every start and replaces whatever file was there before; no
//! merge with earlier contents takes place.

use std::fmt;

use prysm_config::AppConfig;
use tracing::{debug, info};

use crate::storage::{ServicePaths, StorageError};

/// A single `Key Value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub key: String,
    pub value: String,
}

impl Directive {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.value)
    }
}

/// Daemon settings that do not depend on the directory layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrcSettings {
    pub control_port: u16,
    pub cookie_authentication: bool,
    pub virtual_port: u16,
    pub target_host: String,
    pub target_port: u16,
    pub log: Vec<String>,
}

impl Default for TorrcSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl TorrcSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            control_port: config.tor.control_port,
            cookie_authentication: config.tor.cookie_authentication,
            virtual_port: config.hidden_service.virtual_port,
            target_host: config.hidden_service.target_host.clone(),
            target_port: config.hidden_service.target_port,
            log: config.tor.log.clone(),
        }
    }
}

/// Errors from parsing a rendered daemon config.
#[derive(Debug, thiserror::Error)]
pub enum TorrcParseError {
    #[error("line {line}: directive {key:?} has no value")]
    MissingValue { line: usize, key: String },
}

/// Ordered list of directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorrcDocument {
    directives: Vec<Directive>,
}

impl TorrcDocument {
    /// Build the fixed directive set for the given layout.
    ///
    /// Order: `ControlPort`, `DataDirectory`, `CookieAuthentication`,
    /// `HiddenServiceDir`, `HiddenServicePort`, then one `Log` per configured
    /// log directive.
    pub fn build(paths: &ServicePaths, settings: &TorrcSettings) -> Self {
        let mut directives = vec![
            Directive::new("ControlPort", settings.control_port.to_string()),
            Directive::new("DataDirectory", paths.working_dir().display().to_string()),
            Directive::new(
                "CookieAuthentication",
                if settings.cookie_authentication { "1" } else { "0" },
            ),
            Directive::new(
                "HiddenServiceDir",
                paths.hidden_service_dir().display().to_string(),
            ),
            Directive::new(
                "HiddenServicePort",
                format!(
                    "{} {}:{}",
                    settings.virtual_port, settings.target_host, settings.target_port
                ),
            ),
        ];
        directives.extend(settings.log.iter().map(|level| Directive::new("Log", level)));
        Self { directives }
    }

    /// Parse a rendered document. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, TorrcParseError> {
        let mut directives = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) if !value.trim().is_empty() => (key, value.trim()),
                _ => {
                    return Err(TorrcParseError::MissingValue {
                        line: idx + 1,
                        key: line.to_string(),
                    });
                }
            };
            directives.push(Directive::new(key, value));
        }
        Ok(Self { directives })
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|d| d.key == key)
            .map(|d| d.value.as_str())
    }

    /// Every value for `key`, in document order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.directives
            .iter()
            .filter(move |d| d.key == key)
            .map(|d| d.value.as_str())
    }

    /// Render the document with a trailing newline.
    pub fn render(&self) -> String {
        let mut out = String::from("# Generated by prysm; rewritten on every start.\n");
        for directive in &self.directives {
            out.push_str(&directive.to_string());
            out.push('\n');
        }
        out
    }
}

/// Build the document for `paths` and replace the config file inside the
/// working directory with it.
pub async fn write(
    paths: &ServicePaths,
    settings: &TorrcSettings,
) -> Result<TorrcDocument, StorageError> {
    let document = TorrcDocument::build(paths, settings);
    let path = paths.torrc_path();
    tokio::fs::write(&path, document.render())
        .await
        .map_err(|source| StorageError::Write {
            path: path.clone(),
            source,
        })?;
    info!(path = %path.display(), directives = document.directives().len(), "Wrote daemon config");
    debug!(contents = %document.render(), "Daemon config contents");
    Ok(document)
}
