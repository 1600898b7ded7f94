/// Immutable-attribute handling for mountpoint directories
///
/// A mountpoint is marked immutable before a device is mounted on it so nothing
/// can write into the bare directory while the mount is in flight, and cleared
/// again before the directory is removed.
use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// `FS_IMMUTABLE_FL` from linux/fs.h
const FS_IMMUTABLE_FL: libc::c_int = 0x0000_0010;

// linux/fs.h declares these with a `long` argument, but the kernel reads and
// writes an `int`. Keep the `long`-sized request numbers with an `int` buffer.
const FS_IOC_GETFLAGS: nix::sys::ioctl::ioctl_num_type =
    nix::request_code_read!(b'f', 1, mem::size_of::<libc::c_long>());
const FS_IOC_SETFLAGS: nix::sys::ioctl::ioctl_num_type =
    nix::request_code_write!(b'f', 2, mem::size_of::<libc::c_long>());

nix::ioctl_read_bad!(fs_ioc_getflags, FS_IOC_GETFLAGS, libc::c_int);
nix::ioctl_write_ptr_bad!(fs_ioc_setflags, FS_IOC_SETFLAGS, libc::c_int);

pub trait MountpathAttributes: Send + Sync {
    fn set_immutable(&self, path: &Path) -> io::Result<()>;
    fn clear_immutable(&self, path: &Path) -> io::Result<()>;
}

/// Toggles the inode immutable flag the same way `chattr +i` / `chattr -i` does
#[derive(Clone, Debug, Default)]
pub struct InodeFlagAttributes;

impl InodeFlagAttributes {
    pub fn new() -> Self {
        Self
    }

    fn update(&self, path: &Path, immutable: bool) -> io::Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOFOLLOW)
            .open(path)?;
        let fd = file.as_raw_fd();

        let mut flags: libc::c_int = 0;
        // SAFETY: fd is open for the lifetime of `file` and `flags` is a valid out pointer.
        unsafe { fs_ioc_getflags(fd, &mut flags) }.map_err(io::Error::from)?;

        let updated = if immutable {
            flags | FS_IMMUTABLE_FL
        } else {
            flags & !FS_IMMUTABLE_FL
        };
        if updated == flags {
            return Ok(());
        }

        // SAFETY: as above; the kernel only reads through the pointer.
        unsafe { fs_ioc_setflags(fd, &updated) }.map_err(io::Error::from)?;
        log::debug!(
            "{} immutable attribute on {}",
            if immutable { "Set" } else { "Cleared" },
            path.display()
        );
        Ok(())
    }
}

impl MountpathAttributes for InodeFlagAttributes {
    fn set_immutable(&self, path: &Path) -> io::Result<()> {
        self.update(path, true)
    }

    fn clear_immutable(&self, path: &Path) -> io::Result<()> {
        self.update(path, false)
    }
}
