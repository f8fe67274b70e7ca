use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Media {
    Ssd,
    Hdd,
    Nvme,
    /// A loop device backed by an image on tmpfs.
    Mem,
    PmemLocal,
    PmemRemote1Hop,
    PmemRemote2Hop,
    DmStripe,
    DmStripe1Local,
    DmStripe1Remote,
    /// The pmem array device managed by `parradm`.
    PmArray,
}

impl Media {
    pub const ALL: &'static [Media] = &[
        Media::Ssd,
        Media::Hdd,
        Media::Nvme,
        Media::Mem,
        Media::PmemLocal,
        Media::PmemRemote1Hop,
        Media::PmemRemote2Hop,
        Media::DmStripe,
        Media::DmStripe1Local,
        Media::DmStripe1Remote,
        Media::PmArray,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Media::Ssd => "ssd",
            Media::Hdd => "hdd",
            Media::Nvme => "nvme",
            Media::Mem => "mem",
            Media::PmemLocal => "pmem-local",
            Media::PmemRemote1Hop => "pmem-remote-1-hop",
            Media::PmemRemote2Hop => "pmem-remote-2-hop",
            Media::DmStripe => "dm-stripe",
            Media::DmStripe1Local => "dm-stripe-1-local",
            Media::DmStripe1Remote => "dm-stripe-1-remote",
            Media::PmArray => "pm-array",
        }
    }

    /// Device class shared by the NUMA placements of one kind of media.
    pub fn family(self) -> &'static str {
        match self {
            Media::PmemLocal | Media::PmemRemote1Hop | Media::PmemRemote2Hop => "pmem",
            Media::DmStripe | Media::DmStripe1Local | Media::DmStripe1Remote => "dm-stripe",
            other => other.name(),
        }
    }

    pub fn is_memory(self) -> bool {
        self == Media::Mem
    }
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Media {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Media::ALL
            .iter()
            .cloned()
            .find(|m| m.name() == s)
            .ok_or_else(|| Error::invalid_arg(format!("unknown media {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for media in Media::ALL {
            assert_eq!(media.name().parse::<Media>().expect("known media"), *media);
        }
        assert!("floppy".parse::<Media>().is_err());
    }

    #[test]
    fn pmem_placements_share_a_family() {
        assert_eq!(Media::PmemLocal.family(), "pmem");
        assert_eq!(Media::PmemRemote2Hop.family(), "pmem");
        assert_eq!(Media::DmStripe1Remote.family(), "dm-stripe");
        assert_eq!(Media::Nvme.family(), "nvme");
    }
}
