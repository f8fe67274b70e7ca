use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filesystem {
    Tmpfs,
    Ext4,
    Ext4NoJournal,
    Xfs,
    Btrfs,
    F2fs,
    Nova,
    Splitfs,
    Assise,
    Pmfs,
    Ext2,
    Ext3,
    Odinfs,
    Winefs,
    Jfs,
    Reiserfs,
}

/// How a filesystem gets onto its mount point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountKind {
    /// Memory-backed, no device.
    Tmpfs,
    /// `mkfs` then a plain mount of the formatted device.
    Formatted,
    /// The kernel module formats the device itself with `-o init`.
    SelfInit,
    /// ext4 on a fixed path with a preloaded user-space library.
    Splitfs,
    /// Mounted by the operator outside the harness.
    External,
}

impl Filesystem {
    pub const ALL: &'static [Filesystem] = &[
        Filesystem::Tmpfs,
        Filesystem::Ext4,
        Filesystem::Ext4NoJournal,
        Filesystem::Xfs,
        Filesystem::Btrfs,
        Filesystem::F2fs,
        Filesystem::Nova,
        Filesystem::Splitfs,
        Filesystem::Assise,
        Filesystem::Pmfs,
        Filesystem::Ext2,
        Filesystem::Ext3,
        Filesystem::Odinfs,
        Filesystem::Winefs,
    ];

    /// Mountable but left out of the default sweep.
    pub const UNSWEPT: &'static [Filesystem] = &[Filesystem::Jfs, Filesystem::Reiserfs];

    pub fn name(self) -> &'static str {
        match self {
            Filesystem::Tmpfs => "tmpfs",
            Filesystem::Ext4 => "ext4",
            Filesystem::Ext4NoJournal => "ext4-no-jnl",
            Filesystem::Xfs => "xfs",
            Filesystem::Btrfs => "btrfs",
            Filesystem::F2fs => "f2fs",
            Filesystem::Nova => "nova",
            Filesystem::Splitfs => "splitfs",
            Filesystem::Assise => "assise",
            Filesystem::Pmfs => "pmfs",
            Filesystem::Ext2 => "ext2",
            Filesystem::Ext3 => "ext3",
            Filesystem::Odinfs => "odinfs",
            Filesystem::Winefs => "winefs",
            Filesystem::Jfs => "jfs",
            Filesystem::Reiserfs => "reiserfs",
        }
    }

    pub fn mount_kind(self) -> MountKind {
        match self {
            Filesystem::Tmpfs => MountKind::Tmpfs,
            Filesystem::Ext2
            | Filesystem::Ext3
            | Filesystem::Ext4
            | Filesystem::Ext4NoJournal
            | Filesystem::Xfs
            | Filesystem::Btrfs
            | Filesystem::F2fs
            | Filesystem::Jfs
            | Filesystem::Reiserfs => MountKind::Formatted,
            Filesystem::Nova | Filesystem::Pmfs | Filesystem::Winefs | Filesystem::Odinfs => {
                MountKind::SelfInit
            }
            Filesystem::Splitfs => MountKind::Splitfs,
            Filesystem::Assise => MountKind::External,
        }
    }

    /// Name passed to `mkfs.` and `mount -t`.
    pub fn fs_type(self) -> &'static str {
        match self {
            Filesystem::Ext4NoJournal | Filesystem::Splitfs => "ext4",
            Filesystem::Nova => "NOVA",
            other => other.name(),
        }
    }

    pub fn is_ext(self) -> bool {
        self.fs_type().starts_with("ext")
    }

    pub fn without_journal(self) -> bool {
        self == Filesystem::Ext4NoJournal
    }

    pub fn mkfs_args(self, block_size: usize, stride: usize) -> Vec<String> {
        match self {
            Filesystem::Ext2 | Filesystem::Ext3 | Filesystem::Ext4 | Filesystem::Splitfs => vec![
                String::from("-b"),
                block_size.to_string(),
                String::from("-E"),
                format!("stride={}", stride),
                String::from("-F"),
            ],
            Filesystem::Ext4NoJournal => vec![String::from("-F")],
            Filesystem::Xfs | Filesystem::Btrfs => vec![String::from("-f")],
            Filesystem::Jfs | Filesystem::Reiserfs => vec![String::from("-q")],
            _ => Vec::new(),
        }
    }

    /// `-o` options for the mount. `delegation_threads` only matters to odinfs.
    pub fn mount_options(self, delegation_threads: usize) -> Option<String> {
        match self {
            Filesystem::Tmpfs => None,
            Filesystem::Odinfs => Some(format!("init,dele_thrds={}", delegation_threads)),
            fs if fs.mount_kind() == MountKind::SelfInit => Some(String::from("init")),
            fs if fs.is_ext() => Some(String::from("dax")),
            _ => None,
        }
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Filesystem {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Filesystem::ALL
            .iter()
            .chain(Filesystem::UNSWEPT)
            .cloned()
            .find(|fs| fs.name() == s)
            .ok_or_else(|| Error::invalid_arg(format!("unknown filesystem {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ext_family_formats_with_stride() {
        assert_eq!(
            Filesystem::Ext4.mkfs_args(4096, 512),
            vec!["-b", "4096", "-E", "stride=512", "-F"]
        );
        assert_eq!(Filesystem::Ext4NoJournal.mkfs_args(4096, 512), vec!["-F"]);
        assert_eq!(Filesystem::Xfs.mkfs_args(4096, 512), vec!["-f"]);
        assert!(Filesystem::F2fs.mkfs_args(4096, 512).is_empty());
        assert_eq!(Filesystem::Jfs.mkfs_args(4096, 512), vec!["-q"]);
    }

    #[test]
    fn mount_options_per_filesystem() {
        assert_eq!(Filesystem::Ext4NoJournal.mount_options(0).as_deref(), Some("dax"));
        assert_eq!(Filesystem::Ext2.mount_options(0).as_deref(), Some("dax"));
        assert_eq!(Filesystem::Xfs.mount_options(0), None);
        assert_eq!(Filesystem::Nova.mount_options(0).as_deref(), Some("init"));
        assert_eq!(Filesystem::Pmfs.mount_options(0).as_deref(), Some("init"));
        assert_eq!(
            Filesystem::Odinfs.mount_options(12).as_deref(),
            Some("init,dele_thrds=12")
        );
    }

    #[test]
    fn no_journal_variant_formats_as_ext4() {
        assert_eq!(Filesystem::Ext4NoJournal.fs_type(), "ext4");
        assert!(Filesystem::Ext4NoJournal.without_journal());
        assert!(!Filesystem::Ext4.without_journal());
        assert_eq!(Filesystem::Nova.fs_type(), "NOVA");
    }

    #[test]
    fn names_round_trip() {
        for fs in Filesystem::ALL.iter().chain(Filesystem::UNSWEPT) {
            assert_eq!(fs.name().parse::<Filesystem>().expect("known fs"), *fs);
        }
    }
}
