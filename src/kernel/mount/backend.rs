//! Mount backend abstraction.
//!
//! The table never issues mount syscalls itself; it goes through a
//! [`MountBackend`] so tests and alternative drivers can substitute their own.

use crate::config::types::{MountError, Result};
use nix::mount::{MntFlags, MsFlags};
use std::thread;
use std::time::Duration;

pub trait MountBackend: Send + Sync {
    /// Mount `source` on `target`. A zero `timeout` means no deadline.
    fn mount(
        &self,
        source: &str,
        target: &str,
        fstype: &str,
        flags: u64,
        data: &str,
        timeout: Duration,
    ) -> Result<()>;

    fn unmount(&self, target: &str, flags: i32, timeout: Duration) -> Result<()>;
}

/// Backend issuing `mount(2)` and `umount2(2)` directly
#[derive(Clone, Debug, Default)]
pub struct SyscallBackend;

impl SyscallBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MountBackend for SyscallBackend {
    fn mount(
        &self,
        source: &str,
        target: &str,
        fstype: &str,
        flags: u64,
        data: &str,
        timeout: Duration,
    ) -> Result<()> {
        let source = source.to_string();
        let target_owned = target.to_string();
        let fstype = fstype.to_string();
        let data = data.to_string();
        let ms_flags = ms_flags(flags);

        run_with_deadline("mount", target, timeout, move || {
            let data_arg = if data.is_empty() {
                None
            } else {
                Some(data.as_str())
            };
            nix::mount::mount(
                Some(source.as_str()),
                target_owned.as_str(),
                Some(fstype.as_str()),
                ms_flags,
                data_arg,
            )
            .map_err(|errno| MountError::Backend { op: "mount", errno })
        })
    }

    fn unmount(&self, target: &str, flags: i32, timeout: Duration) -> Result<()> {
        let target_owned = target.to_string();
        let mnt_flags = mnt_flags(flags);

        run_with_deadline("umount", target, timeout, move || {
            nix::mount::umount2(target_owned.as_str(), mnt_flags)
                .map_err(|errno| MountError::Backend { op: "umount", errno })
        })
    }
}

/// Raw flags go to the kernel as given, including bits nix has no name for
fn ms_flags(raw: u64) -> MsFlags {
    MsFlags::from_bits_retain(raw as libc::c_ulong)
}

fn mnt_flags(raw: i32) -> MntFlags {
    MntFlags::from_bits_retain(raw)
}

/// Run a blocking syscall, giving up on it after `timeout`.
///
/// The syscall cannot be cancelled; on expiry the helper thread is left to
/// finish on its own and its result is discarded.
fn run_with_deadline<F>(op: &'static str, target: &str, timeout: Duration, call: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    if timeout.is_zero() {
        return call();
    }

    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name(format!("mounttab-{}", op))
        .spawn(move || {
            let _ = tx.send(call());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
            log::warn!("{} of {} still running after {:?}", op, target, timeout);
            Err(MountError::Timeout {
                op,
                target: target.to_string(),
                waited: timeout,
            })
        }
        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(MountError::Config(
            format!("{} helper thread for {} exited without a result", op, target),
        )),
    }
}
