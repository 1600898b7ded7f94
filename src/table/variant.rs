/// Mount variants and the selector that builds a table for each
///
/// Every variant shares the same [`MountTable`]; a variant only decides which
/// sources it owns when the table is rebuilt from the live OS mount table.
use crate::config::types::{MountError, MountType, Result};
use crate::kernel::mount::mountinfo::{read_mountinfo_from, MountRecord};
use crate::kernel::mount::MountBackend;
use crate::table::manager::Manager;
use crate::table::mount_table::MountTable;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Source discovery for drivers whose mounts are not visible as plain
/// block-device or NFS entries.
pub trait CustomLoader: Send + Sync {
    fn discover(&self, identifiers: &[String]) -> Result<Vec<MountRecord>>;
}

#[derive(Clone)]
pub enum MountVariant {
    /// Local block devices whose path starts with one of `prefixes`
    Device { prefixes: Vec<String> },
    /// Exports of a single NFS server
    Nfs { server: String },
    Custom {
        identifiers: Vec<String>,
        loader: Arc<dyn CustomLoader>,
    },
}

impl fmt::Debug for MountVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountVariant::Device { prefixes } => {
                f.debug_struct("Device").field("prefixes", prefixes).finish()
            }
            MountVariant::Nfs { server } => f.debug_struct("Nfs").field("server", server).finish(),
            MountVariant::Custom { identifiers, .. } => f
                .debug_struct("Custom")
                .field("identifiers", identifiers)
                .finish_non_exhaustive(),
        }
    }
}

impl MountVariant {
    pub fn device(prefixes: Vec<String>) -> Self {
        MountVariant::Device { prefixes }
    }

    /// NFS needs exactly one server address
    pub fn nfs(identifiers: &[String]) -> Result<Self> {
        match identifiers {
            [server] if !server.is_empty() => Ok(MountVariant::Nfs {
                server: server.clone(),
            }),
            [] | [_] => Err(MountError::Config(
                "NFS mounter requires a server address".to_string(),
            )),
            _ => Err(MountError::Config(
                "Multiple server addresses provided.".to_string(),
            )),
        }
    }

    pub fn custom(identifiers: Vec<String>, loader: Arc<dyn CustomLoader>) -> Self {
        MountVariant::Custom {
            identifiers,
            loader,
        }
    }

    pub fn mount_type(&self) -> MountType {
        match self {
            MountVariant::Device { .. } => MountType::Device,
            MountVariant::Nfs { .. } => MountType::Nfs,
            MountVariant::Custom { .. } => MountType::Custom,
        }
    }

    /// Whether a live mount belongs to this variant. `identifiers` overrides
    /// the configured prefixes / server when non-empty.
    pub fn accepts(&self, record: &MountRecord, identifiers: &[String]) -> bool {
        match self {
            MountVariant::Device { prefixes } => {
                let prefixes = if identifiers.is_empty() {
                    prefixes.as_slice()
                } else {
                    identifiers
                };
                if prefixes.is_empty() {
                    return record.source.starts_with("/dev/");
                }
                prefixes.iter().any(|p| record.source.starts_with(p.as_str()))
            }
            MountVariant::Nfs { server } => {
                if !record.fstype.starts_with("nfs") {
                    return false;
                }
                let Some((host, _export)) = record.source.split_once(':') else {
                    return false;
                };
                if identifiers.is_empty() {
                    host == server
                } else {
                    identifiers.iter().any(|s| s == host)
                }
            }
            MountVariant::Custom { .. } => true,
        }
    }

    /// Live mounts owned by this variant
    pub(crate) fn discover(
        &self,
        identifiers: &[String],
        mountinfo_path: &Path,
    ) -> Result<Vec<MountRecord>> {
        let records = match self {
            MountVariant::Custom {
                identifiers: configured,
                loader,
            } => {
                let identifiers = if identifiers.is_empty() {
                    configured.as_slice()
                } else {
                    identifiers
                };
                loader.discover(identifiers)?
            }
            _ => read_mountinfo_from(mountinfo_path)?,
        };
        Ok(records
            .into_iter()
            .filter(|r| self.accepts(r, identifiers))
            .collect())
    }
}

/// Build a mount table for the selected variant and load it from the live
/// OS mount table.
///
/// `backend` defaults to [`SyscallBackend`](crate::kernel::mount::SyscallBackend).
pub fn new_mounter(
    mount_type: MountType,
    backend: Option<Arc<dyn MountBackend>>,
    identifiers: Vec<String>,
    custom_loader: Option<Arc<dyn CustomLoader>>,
    allowed_dirs: Vec<String>,
) -> Result<MountTable> {
    let variant = match mount_type {
        MountType::Device => MountVariant::device(identifiers),
        MountType::Nfs => MountVariant::nfs(&identifiers)?,
        MountType::Custom => match custom_loader {
            Some(loader) => MountVariant::custom(identifiers, loader),
            None => return Err(MountError::Unsupported),
        },
    };

    let mut builder = MountTable::builder(variant).allowed_dirs(allowed_dirs);
    if let Some(backend) = backend {
        builder = builder.backend(backend);
    }
    let table = builder.build()?;
    table.load(&[])?;
    Ok(table)
}
