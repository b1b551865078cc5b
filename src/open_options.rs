use crate::engine::{Engine, EngineSettings};
use crate::utils::Collation;
use crate::{Error, MemoryStreamFactory, Result};
use std::str::FromStr;

/// Connection options: how to reach and open a database.
///
/// Parseable from a `key=value;` connection string
/// (`"filename=app.db; collation=127/1"`); a bare string is a filename.
/// `:memory:` opens a process-local in-memory database.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub filename: String,
    pub password: Option<String>,
    pub read_only: bool,
    pub upgrade: bool,
    pub collation: Option<Collation>,
    pub initial_size: u64,
    pub auto_rebuild: bool,
}

impl OpenOptions {
    pub fn new(filename: impl Into<String>) -> Self {
        OpenOptions {
            filename: filename.into(),
            ..Default::default()
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    pub fn initial_size(mut self, initial_size: u64) -> Self {
        self.initial_size = initial_size;
        self
    }

    pub fn auto_rebuild(mut self, auto_rebuild: bool) -> Self {
        self.auto_rebuild = auto_rebuild;
        self
    }

    /// Opens the engine described by these options.
    pub async fn open(&self) -> Result<Engine> {
        if self.password.is_some() {
            return Err(Error::unsupported("encrypted databases"));
        }
        if self.upgrade {
            return Err(Error::unsupported("file version upgrades"));
        }
        if self.filename.is_empty() {
            return Err(Error::file_not_found("(no filename)"));
        }

        let (data_factory, log_factory): (
            Box<dyn crate::engine::StreamFactory>,
            Box<dyn crate::engine::StreamFactory>,
        ) = if self.filename == ":memory:" {
            (
                Box::new(MemoryStreamFactory::new()),
                Box::new(MemoryStreamFactory::new()),
            )
        } else {
            #[cfg(feature = "tokio-fs")]
            {
                (
                    Box::new(crate::FileStreamFactory::new(&self.filename)),
                    Box::new(crate::FileStreamFactory::new(log_filename(&self.filename))),
                )
            }
            #[cfg(not(feature = "tokio-fs"))]
            {
                return Err(Error::unsupported(
                    "on-disk databases require the tokio-fs feature",
                ));
            }
        };

        Engine::open(EngineSettings {
            data_factory,
            log_factory,
            collation: self.collation,
            initial_size: self.initial_size,
            read_only: self.read_only,
            auto_rebuild: self.auto_rebuild,
        })
        .await
    }
}

/// `app.db` → `app-log.db`.
#[cfg(feature = "tokio-fs")]
fn log_filename(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{stem}-log.{extension}"),
        _ => format!("{filename}-log"),
    }
}

impl FromStr for OpenOptions {
    type Err = Error;

    fn from_str(connection_string: &str) -> Result<Self> {
        let mut options = OpenOptions::default();

        if !connection_string.contains('=') {
            options.filename = connection_string.trim().to_string();
            return Ok(options);
        }

        for pair in connection_string.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::unsupported("malformed connection string"))?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "filename" => options.filename = value.to_string(),
                "password" => options.password = Some(value.to_string()),
                "readonly" | "read-only" => options.read_only = parse_bool(value)?,
                "upgrade" => options.upgrade = parse_bool(value)?,
                "collation" => options.collation = Some(value.parse()?),
                "initialsize" | "initial-size" => {
                    options.initial_size = value
                        .parse()
                        .map_err(|_| Error::unsupported("invalid InitialSize"))?;
                }
                "autorebuild" | "auto-rebuild" => options.auto_rebuild = parse_bool(value)?,
                other => {
                    return Err(Error::unsupported(&format!(
                        "unknown connection option: {other}"
                    )));
                }
            }
        }

        Ok(options)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::unsupported("invalid boolean option")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_filename() {
        let options: OpenOptions = "app.db".parse().unwrap();
        assert_eq!(options.filename, "app.db");
        assert!(!options.read_only);
    }

    #[test]
    fn key_value_pairs() {
        let options: OpenOptions =
            "filename=data/app.db; ReadOnly=true; InitialSize=32768; Collation=127/1"
                .parse()
                .unwrap();
        assert_eq!(options.filename, "data/app.db");
        assert!(options.read_only);
        assert_eq!(options.initial_size, 32768);
        assert_eq!(options.collation, Some(Collation::default()));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!("filename=a.db; bogus=1".parse::<OpenOptions>().is_err());
    }

    #[cfg(feature = "tokio-fs")]
    #[test]
    fn log_file_naming() {
        assert_eq!(log_filename("app.db"), "app-log.db");
        assert_eq!(log_filename("noext"), "noext-log");
    }
}
