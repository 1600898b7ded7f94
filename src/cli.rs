use crate::config::types::{MountType, MOUNT_PATH_REMOVE_DELAY};
use crate::config::MounterConfig;
use crate::safety::TimerScheduler;
use crate::table::{Manager, MountTable};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "Mount table for storage volume drivers", long_about = None)]
struct Cli {
    /// JSON mounter config; overrides --type, --id and --allowed-dir
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Mount variant
    #[arg(long = "type", value_enum, default_value_t = VariantArg::Device, global = true)]
    mount_type: VariantArg,
    /// Device prefix or NFS server address (repeatable)
    #[arg(long = "id", global = true)]
    identifiers: Vec<String>,
    /// Directory a mount path must contain (repeatable)
    #[arg(long = "allowed-dir", global = true)]
    allowed_dirs: Vec<String>,
    /// Mountinfo file to load the table from
    #[arg(long, global = true)]
    mountinfo: Option<PathBuf>,
    /// Seconds to wait before a mount path is removed
    #[arg(long, global = true)]
    remove_delay: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VariantArg {
    Device,
    Nfs,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a device at a path
    Mount {
        #[arg(long)]
        device: String,
        #[arg(long)]
        path: String,
        /// Filesystem type
        #[arg(long)]
        fs: String,
        #[arg(long, default_value_t = 0)]
        minor: i32,
        /// Raw mount(2) flags
        #[arg(long, default_value_t = 0)]
        flags: u64,
        /// Filesystem-specific mount options
        #[arg(long, default_value = "")]
        data: String,
        /// Seconds to wait for the syscall; 0 waits forever
        #[arg(long, default_value_t = 0)]
        timeout: u64,
    },
    /// Unmount a device from a path
    Unmount {
        #[arg(long)]
        device: String,
        #[arg(long)]
        path: String,
        /// Raw umount2(2) flags
        #[arg(long, default_value_t = 0)]
        flags: i32,
        #[arg(long, default_value_t = 0)]
        timeout: u64,
        /// Remove the mount path directory afterwards
        #[arg(long)]
        remove_path: bool,
    },
    /// Print the mount table
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Make a mount path writeable and remove it after the removal delay
    RemovePath {
        #[arg(long)]
        path: String,
    },
}

impl Cli {
    fn mounter_config(&self) -> Result<MounterConfig> {
        let mut config = match &self.config {
            Some(path) => MounterConfig::load_from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => MounterConfig {
                mount_type: match self.mount_type {
                    VariantArg::Device => MountType::Device,
                    VariantArg::Nfs => MountType::Nfs,
                },
                identifiers: self.identifiers.clone(),
                allowed_dirs: self.allowed_dirs.clone(),
                path_remove_delay_secs: MOUNT_PATH_REMOVE_DELAY.as_secs(),
                mountinfo_path: None,
            },
        };
        if let Some(secs) = self.remove_delay {
            config.path_remove_delay_secs = secs;
        }
        if let Some(path) = &self.mountinfo {
            config.mountinfo_path = Some(path.clone());
        }
        Ok(config)
    }
}

fn build_table(config: &MounterConfig, scheduler: Arc<TimerScheduler>) -> Result<MountTable> {
    if config.mount_type == MountType::Custom {
        anyhow::bail!("custom mounters cannot be built from the command line");
    }
    let table = config.builder()?.scheduler(scheduler).build()?;
    table.load(&[])?;
    Ok(table)
}

/// Wait for a scheduled path removal so it is not lost when the process exits
fn wait_for_removal(scheduler: &TimerScheduler, delay: Duration) {
    eprintln!("Waiting {:?} for mount path removal", delay);
    if !scheduler.wait_idle(delay + Duration::from_secs(5)) {
        eprintln!("Warning: mount path removal did not finish");
    }
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.mounter_config()?;
    let scheduler = Arc::new(TimerScheduler::new()?);
    let table = build_table(&config, Arc::clone(&scheduler))?;

    match cli.command {
        Commands::Mount {
            device,
            path,
            fs,
            minor,
            flags,
            data,
            timeout,
        } => {
            table.mount(
                minor,
                &device,
                &path,
                &fs,
                flags,
                &data,
                Duration::from_secs(timeout),
            )?;
            eprintln!("Mounted {} at {}", device, path);
        }
        Commands::Unmount {
            device,
            path,
            flags,
            timeout,
            remove_path,
        } => {
            table.unmount(&device, &path, flags, Duration::from_secs(timeout), remove_path)?;
            eprintln!("Unmounted {} from {}", device, path);
            if remove_path {
                wait_for_removal(&scheduler, config.remove_delay());
            }
        }
        Commands::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&table.snapshot())?);
            } else {
                print!("{}", table);
            }
        }
        Commands::RemovePath { path } => {
            table.remove_mount_path(&path)?;
            wait_for_removal(&scheduler, config.remove_delay());
        }
    }
    Ok(())
}
