//! Stable device identifiers used to tag outgoing batches
//!
//! A missing or unreadable id must never block telemetry, so providers
//! always return *some* id and only log when persistence fails.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Supplies the device id stamped on every delivered event
pub trait DeviceIdProvider: Send + Sync {
    fn device_id(&self) -> String;
}

/// Mints a random id on first use and keeps it for the process lifetime
#[derive(Default)]
pub struct LazyDeviceId {
    id: Mutex<Option<String>>,
}

impl LazyDeviceId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceIdProvider for LazyDeviceId {
    fn device_id(&self) -> String {
        self.id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone()
    }
}

/// Fixed id, for hosts that manage their own installation id
pub struct StaticDeviceId(pub String);

impl DeviceIdProvider for StaticDeviceId {
    fn device_id(&self) -> String {
        self.0.clone()
    }
}

/// Device id persisted to a file so it survives restarts
///
/// The file is read (or created) on first use. I/O failures fall back to an
/// in-memory id for the rest of the process.
pub struct FileDeviceId {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl FileDeviceId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Device id file under the XDG data directory
    pub fn default_location() -> Self {
        Self::new(crate::config::Config::device_id_path())
    }

    fn load_or_create(&self) -> String {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if !content.trim().is_empty() => return content.trim().to_string(),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read device id");
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let written = self
            .path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(&self.path, &id));
        if let Err(e) = written {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to persist device id; using an in-memory id"
            );
        }
        id
    }
}

impl DeviceIdProvider for FileDeviceId {
    fn device_id(&self) -> String {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| self.load_or_create())
            .clone()
    }
}
