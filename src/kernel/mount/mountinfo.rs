//! Reader for the live OS mount table (`/proc/self/mountinfo`).

use crate::config::types::{MountError, Result};
use std::fs;
use std::path::Path;

pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// One line of mountinfo, reduced to what the table needs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountRecord {
    pub source: String,
    pub mountpoint: String,
    pub fstype: String,
    pub minor: i32,
}

pub fn read_mountinfo_from(path: &Path) -> Result<Vec<MountRecord>> {
    let contents = fs::read_to_string(path).map_err(|e| {
        MountError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })?;
    Ok(parse_mountinfo(&contents))
}

/// Parse mountinfo text; malformed lines are skipped.
///
/// Format: `id parent major:minor root mountpoint options [optional...] - fstype source superopts`
pub fn parse_mountinfo(contents: &str) -> Vec<MountRecord> {
    let mut records = Vec::new();
    for line in contents.lines() {
        let Some((left, right)) = line.split_once(" - ") else {
            continue;
        };
        let left_parts: Vec<&str> = left.split_whitespace().collect();
        if left_parts.len() < 6 {
            continue;
        }
        let right_parts: Vec<&str> = right.split_whitespace().collect();
        if right_parts.len() < 2 {
            continue;
        }

        let minor = left_parts[2]
            .split_once(':')
            .and_then(|(_, minor)| minor.parse::<i32>().ok())
            .unwrap_or(0);

        records.push(MountRecord {
            source: decode_mount_escape(right_parts[1]),
            mountpoint: decode_mount_escape(left_parts[4]),
            fstype: right_parts[0].to_string(),
            minor,
        });
    }
    records
}

fn decode_mount_escape(value: &str) -> String {
    value
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
22 1 0:21 / /proc rw,nosuid,nodev,noexec,relatime shared:12 - proc proc rw
98 29 8:17 / /mnt/vol1 rw,relatime shared:45 - ext4 /dev/sdb1 rw
99 29 8:17 / /var/lib/osd/mounts/vol\\0401 rw,relatime shared:45 - ext4 /dev/sdb1 rw
120 29 0:55 / /mnt/nfs rw,relatime - nfs4 10.0.0.5:/exports/data rw,vers=4.2
garbage line without separator
";

    #[test]
    fn test_parse_mountinfo() {
        let records = parse_mountinfo(SAMPLE);
        assert_eq!(records.len(), 4);

        assert_eq!(
            records[1],
            MountRecord {
                source: "/dev/sdb1".to_string(),
                mountpoint: "/mnt/vol1".to_string(),
                fstype: "ext4".to_string(),
                minor: 17,
            }
        );
        assert_eq!(records[2].mountpoint, "/var/lib/osd/mounts/vol 1");
        assert_eq!(records[3].source, "10.0.0.5:/exports/data");
        assert_eq!(records[3].fstype, "nfs4");
        assert_eq!(records[3].minor, 55);
    }

    #[test]
    fn test_decode_backslash_last() {
        assert_eq!(decode_mount_escape("a\\134040b"), "a\\040b");
    }

    #[test]
    fn test_read_live_mountinfo() {
        if Path::new(MOUNTINFO_PATH).exists() {
            let records = read_mountinfo_from(Path::new(MOUNTINFO_PATH)).unwrap();
            assert!(!records.is_empty());
        }
    }
}
