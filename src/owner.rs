/// Collaborator interfaces for disk owners and settings persistence

use crate::image::FloppyDisk;
use std::collections::BTreeMap;
use std::error::Error;

/// Flat string-keyed settings map filled by `put_settings_to` methods
pub type Settings = BTreeMap<String, String>;

/// Receiver of fire-and-forget notifications from disks and drives
///
/// All methods default to no-ops, so an owner only implements what it
/// displays. Implementations must not block and are called without any
/// disk lock held.
pub trait DiskOwner: Send + Sync {
    /// A sector or image operation failed
    fn report_error(&self, _message: &str, _cause: Option<&(dyn Error + 'static)>) {}

    /// Sides, cylinders, sectors per track or sector size of a disk changed
    fn report_format_changed(&self, _disk: &FloppyDisk) {}

    /// A drive was accessed by the controller
    fn report_drive_accessed(&self, _drive: usize) {}
}

/// Owner that ignores all notifications
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOwner;

impl DiskOwner for NullOwner {}

/// Store a key/value pair under `prefix`
pub(crate) fn put_setting<V: ToString>(settings: &mut Settings, prefix: &str, key: &str, value: V) {
    settings.insert(format!("{}{}", prefix, key), value.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_setting_prefix() {
        let mut settings = Settings::new();
        put_setting(&mut settings, "drive.0.", "sides", 2);
        put_setting(&mut settings, "drive.0.", "readonly", false);
        assert_eq!(settings.get("drive.0.sides").map(String::as_str), Some("2"));
        assert_eq!(settings.get("drive.0.readonly").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_null_owner_is_silent() {
        let owner = NullOwner;
        owner.report_error("boom", None);
        owner.report_drive_accessed(1);
    }
}
