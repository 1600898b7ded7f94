/// Mounter configuration loaded from a JSON file
use crate::config::types::{MountError, MountType, Result, MOUNT_PATH_REMOVE_DELAY};
use crate::kernel::mount::MountBackend;
use crate::table::{Manager, MountTable, MountTableBuilder, MountVariant};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn default_remove_delay_secs() -> u64 {
    MOUNT_PATH_REMOVE_DELAY.as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MounterConfig {
    pub mount_type: MountType,
    /// Device prefixes, or the single NFS server address
    #[serde(default)]
    pub identifiers: Vec<String>,
    /// Substrings a mount path must contain; empty allows everything
    #[serde(default)]
    pub allowed_dirs: Vec<String>,
    #[serde(default = "default_remove_delay_secs")]
    pub path_remove_delay_secs: u64,
    /// Alternate mountinfo source, mostly for testing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountinfo_path: Option<PathBuf>,
}

impl MounterConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path)
            .map_err(|e| MountError::Config(format!("Failed to read config file: {}", e)))?;

        let config: MounterConfig = serde_json::from_str(&config_content)
            .map_err(|e| MountError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    pub fn remove_delay(&self) -> Duration {
        Duration::from_secs(self.path_remove_delay_secs)
    }

    fn variant(&self) -> Result<MountVariant> {
        match self.mount_type {
            MountType::Device => Ok(MountVariant::device(self.identifiers.clone())),
            MountType::Nfs => MountVariant::nfs(&self.identifiers),
            // Needs a caller-supplied loader
            MountType::Custom => Err(MountError::Unsupported),
        }
    }

    /// Table builder preset from this config, for callers that supply
    /// their own collaborators
    pub fn builder(&self) -> Result<MountTableBuilder> {
        let mut builder = MountTable::builder(self.variant()?)
            .allowed_dirs(self.allowed_dirs.clone())
            .remove_delay(self.remove_delay());
        if let Some(path) = &self.mountinfo_path {
            builder = builder.mountinfo_path(path.clone());
        }
        Ok(builder)
    }

    /// Build the table and load it from the live mount table
    pub fn build(&self, backend: Option<Arc<dyn MountBackend>>) -> Result<MountTable> {
        let mut builder = self.builder()?;
        if let Some(backend) = backend {
            builder = builder.backend(backend);
        }

        let table = builder.build()?;
        table.load(&[])?;
        info!(
            "Built {} mounter with allowed dirs {:?}",
            self.mount_type, self.allowed_dirs
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mounttab_config_{}_{}.json", name, std::process::id()));
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_applied() {
        let path = write_config("defaults", r#"{ "mount_type": "device" }"#);
        let config = MounterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.mount_type, MountType::Device);
        assert!(config.identifiers.is_empty());
        assert!(config.allowed_dirs.is_empty());
        assert_eq!(config.remove_delay(), Duration::from_secs(30));
        assert!(config.mountinfo_path.is_none());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_full_config() {
        let path = write_config(
            "full",
            r#"{ "mount_type": "nfs", "identifiers": ["10.0.0.5"],
                 "allowed_dirs": ["/mnt"], "path_remove_delay_secs": 5 }"#,
        );
        let config = MounterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.mount_type, MountType::Nfs);
        assert_eq!(config.identifiers, vec!["10.0.0.5".to_string()]);
        assert_eq!(config.allowed_dirs, vec!["/mnt".to_string()]);
        assert_eq!(config.remove_delay(), Duration::from_secs(5));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let path = write_config("bad", r#"{ "mount_type": "tape" }"#);
        assert!(matches!(
            MounterConfig::load_from_file(&path),
            Err(MountError::Config(_))
        ));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_file_is_config_error() {
        assert!(matches!(
            MounterConfig::load_from_file("/nonexistent/mounttab.json"),
            Err(MountError::Config(_))
        ));
    }

    #[test]
    fn test_custom_cannot_be_built_from_file() {
        let config = MounterConfig {
            mount_type: MountType::Custom,
            identifiers: Vec::new(),
            allowed_dirs: Vec::new(),
            path_remove_delay_secs: 30,
            mountinfo_path: None,
        };
        assert!(matches!(config.build(None), Err(MountError::Unsupported)));
    }

    #[test]
    fn test_build_loads_from_mountinfo_fixture() {
        let mountinfo = write_config(
            "mountinfo",
            "36 25 8:17 / /mnt/data rw,relatime shared:1 - ext4 /dev/sdb1 rw\n\
             37 25 0:45 / /tmp rw - tmpfs tmpfs rw\n",
        );
        let config = MounterConfig {
            mount_type: MountType::Device,
            identifiers: vec!["/dev/sd".to_string()],
            allowed_dirs: Vec::new(),
            path_remove_delay_secs: 30,
            mountinfo_path: Some(mountinfo.clone()),
        };
        let backend: Arc<dyn MountBackend> = Arc::new(crate::testing::RecordingBackend::new());
        let table = config.build(Some(backend)).unwrap();
        assert_eq!(table.get_source_paths(), vec!["/dev/sdb1".to_string()]);
        assert_eq!(table.has_target("/mnt/data"), Some("/dev/sdb1".to_string()));
        fs::remove_file(mountinfo).unwrap();
    }
}
