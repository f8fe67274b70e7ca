use std::fs::{self, Permissions};
use std::io::Write;
use std::mem;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::mount::{umount2, MntFlags};

use crate::config::HarnessConfig;
use crate::enumerate::Delegation;
use crate::error::{Error, Result};
use crate::filesystem::{Filesystem, MountKind};
use crate::media::Media;
use crate::util;

/// splitfs only works when mounted here.
pub const SPLITFS_ROOT: &str = "/mnt/pmem_emul";
/// Mount point assise is set up on by the operator.
pub const ASSISE_ROOT: &str = "/mlfs";

const DISK_IMAGE: &str = "disk.img";

/// A resource a media initializer set up that has to be released once the
/// filesystem on top of it is unmounted.
#[derive(Clone, Debug, PartialEq)]
pub enum UnmountHook {
    /// Loop device attached to an image on a tmpfs mounted at `backing`.
    LoopDevice { device: PathBuf, backing: PathBuf },
    /// Device-mapper target created with `dmsetup create`.
    DmStripe { name: String },
    /// pmem array assembled with `parradm create`.
    PmArray { parradm: PathBuf },
}

impl UnmountHook {
    fn release(self) -> Result<()> {
        debug!("releasing {:?}", self);
        match self {
            UnmountHook::LoopDevice { device, backing } => {
                detach_loop(&device);
                force_unmount(&backing)
            }
            UnmountHook::DmStripe { name } => {
                util::run_checked(Command::new("dmsetup").arg("remove").arg(&name))
            }
            UnmountHook::PmArray { parradm } => {
                util::run_checked(Command::new(parradm).arg("delete"))
            }
        }
    }
}

fn detach_loop(device: &Path) {
    // fails when nothing is attached
    let _ = util::run_quiet(Command::new("losetup").arg("-d").arg(device));
}

/// Unmounts `path` until nothing is mounted there anymore, sleeping a second
/// before every attempt. Stacked mounts are peeled one at a time; a busy
/// target is retried indefinitely, so this blocks until whatever holds the
/// mount lets go. Interrupts do not cut it short.
pub fn force_unmount(path: &Path) -> Result<()> {
    loop {
        thread::sleep(Duration::from_secs(1));
        match umount2(path, MntFlags::empty()) {
            Ok(()) => debug!("unmounted {:?}", path),
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => return Ok(()),
            Err(Errno::EBUSY) => warn!("{:?} is busy, retrying", path),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Arguments for `mount` once the device is ready.
pub fn mount_args(fs: Filesystem, device: &Path, path: &Path, delegation_threads: usize) -> Vec<String> {
    let mut args = vec![String::from("-t"), fs.fs_type().to_string()];
    if let Some(options) = fs.mount_options(delegation_threads) {
        args.push(String::from("-o"));
        args.push(options);
    }
    args.push(device.display().to_string());
    args.push(path.display().to_string());
    args
}

/// `dmsetup` table striping `devices` (with their sizes in sectors) into one
/// target: `0 <len> striped <n> <chunk> <dev> 0 ...`.
pub fn stripe_table(devices: &[(PathBuf, u64)], chunk_size: usize) -> String {
    let length: u64 = devices.iter().map(|&(_, size)| size).sum();
    let mut table = format!("0 {} striped {} {}", length, devices.len(), chunk_size);
    for (device, _) in devices {
        table.push_str(&format!(" {} 0", device.display()));
    }
    table
}

/// The pmem devices making up a stripe of `count` members.
pub fn stripe_set(devices: &[PathBuf], count: usize) -> Result<&[PathBuf]> {
    match count {
        1 | 2 | 4 | 8 if count <= devices.len() => Ok(&devices[..count]),
        _ => Err(Error::invalid_arg(format!(
            "no stripe set of {} pmem devices",
            count
        ))),
    }
}

/// Prepares media and mounts filesystems on them, remembering what has to be
/// torn down afterwards.
pub struct Mounter {
    config: HarnessConfig,
    delegation: Delegation,
    hooks: Vec<UnmountHook>,
}

impl Mounter {
    pub fn new(config: HarnessConfig, delegation: Delegation) -> Self {
        Mounter {
            config,
            delegation,
            hooks: Vec::new(),
        }
    }

    pub fn hooks(&self) -> &[UnmountHook] {
        &self.hooks
    }

    pub fn register(&mut self, hook: UnmountHook) {
        self.hooks.push(hook);
    }

    fn tmp_path(&self) -> PathBuf {
        util::resolve(&self.config.tools.tmp_dir)
    }

    /// Unmounts `path`, then releases every registered hook exactly once.
    pub fn umount(&mut self, path: &Path) -> Result<()> {
        let res = force_unmount(path);
        self.release_hooks();
        res
    }

    pub fn release_hooks(&mut self) {
        for hook in mem::take(&mut self.hooks) {
            let desc = format!("{:?}", hook);
            if let Err(e) = hook.release() {
                warn!("failed to release {}: {}", desc, e);
            }
        }
    }

    /// Mounts `fs` on `media` at `path`. Filesystems mounted by the operator
    /// are not unmounted first.
    pub fn mount(&mut self, media: Media, fs: Filesystem, path: &Path) -> Result<()> {
        if fs.mount_kind() != MountKind::External {
            self.umount(path)?;
        }
        util::mkdir(path)?;
        match fs.mount_kind() {
            MountKind::Tmpfs => self.mount_tmpfs(path),
            MountKind::External => Ok(()),
            MountKind::Splitfs => {
                if path != Path::new(SPLITFS_ROOT) {
                    return Err(Error::invalid_arg(format!(
                        "splitfs must be mounted at {}, not {:?}",
                        SPLITFS_ROOT, path
                    )));
                }
                self.mount_device(media, fs, path)
            }
            MountKind::Formatted | MountKind::SelfInit => self.mount_device(media, fs, path),
        }
    }

    fn mount_tmpfs(&self, path: &Path) -> Result<()> {
        util::run_checked(
            Command::new("mount")
                .args(&["-t", "tmpfs", "-o"])
                .arg(format!("mode=0777,size={}", self.config.disk_size))
                .arg("none")
                .arg(path),
        )
    }

    fn mount_device(&mut self, media: Media, fs: Filesystem, path: &Path) -> Result<()> {
        let device = self.init_media(media)?;
        if fs.mount_kind() == MountKind::Formatted || fs == Filesystem::Splitfs {
            util::run_checked(
                Command::new(format!("mkfs.{}", fs.fs_type()))
                    .args(fs.mkfs_args(self.config.ext_block_size, self.config.ext_stride_size))
                    .arg(&device),
            )?;
            if fs.without_journal() {
                util::run_checked(
                    Command::new("tune2fs")
                        .args(&["-O", "^has_journal"])
                        .arg(&device),
                )?;
            }
        }
        util::run_checked(Command::new("mount").args(mount_args(
            fs,
            &device,
            path,
            self.delegation.threads,
        )))?;
        fs::set_permissions(path, Permissions::from_mode(0o777))?;
        info!("mounted {} on {} ({:?}) at {:?}", fs, media, device, path);
        Ok(())
    }

    /// Readies `media` and returns the device node to put a filesystem on.
    pub fn init_media(&mut self, media: Media) -> Result<PathBuf> {
        let device = match media {
            Media::Mem => return self.init_mem_disk(),
            Media::DmStripe | Media::DmStripe1Local | Media::DmStripe1Remote => {
                return self.init_dm_stripe()
            }
            Media::PmArray => return self.init_pm_array(),
            Media::Nvme => self.config.devices.nvme.clone(),
            Media::Ssd => self.config.devices.ssd.clone(),
            Media::Hdd => self.config.devices.hdd.clone(),
            Media::PmemLocal | Media::PmemRemote1Hop | Media::PmemRemote2Hop => {
                self.config.devices.pmem.clone()
            }
        };
        if device.exists() {
            Ok(device)
        } else {
            Err(Error::MediaUnavailable(format!("{} ({:?})", media, device)))
        }
    }

    fn init_mem_disk(&mut self) -> Result<PathBuf> {
        let loop_dev = self.config.devices.loop_dev.clone();
        let tmp = self.tmp_path();
        detach_loop(&loop_dev);
        force_unmount(&tmp)?;
        detach_loop(&loop_dev);
        util::mkdir(&tmp)?;
        self.mount_tmpfs(&tmp)?;

        // fills the tmpfs; dd exits non-zero once it runs out of space
        let image = tmp.join(DISK_IMAGE);
        util::run_quiet(
            Command::new("dd")
                .arg("if=/dev/zero")
                .arg(format!("of={}", image.display()))
                .args(&["bs=1G", "count=1024000"]),
        )?;
        util::run_checked(Command::new("losetup").arg(&loop_dev).arg(&image))?;
        self.register(UnmountHook::LoopDevice {
            device: loop_dev.clone(),
            backing: tmp,
        });
        Ok(loop_dev)
    }

    fn init_dm_stripe(&mut self) -> Result<PathBuf> {
        let members = stripe_set(&self.config.devices.pmem_devices, self.delegation.sockets)?;
        let mut sized = Vec::with_capacity(members.len());
        for device in members {
            sized.push((device.clone(), block_device_sectors(device)?));
        }
        let table = stripe_table(&sized, self.config.dm_stripe_chunk_size);

        let target = self.config.devices.dm_stripe.clone();
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::invalid_arg(format!("bad dm-stripe device {:?}", target)))?;
        debug!("dmsetup create {}: {}", name, table);
        let mut child = Command::new("dmsetup")
            .arg("create")
            .arg(&name)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            writeln!(stdin, "{}", table)?;
        }
        let status = child.wait()?;
        if !status.success() {
            return Err(Error::CommandFailed {
                command: format!("dmsetup create {}", name),
                status,
            });
        }
        self.register(UnmountHook::DmStripe { name });
        Ok(target)
    }

    fn init_pm_array(&mut self) -> Result<PathBuf> {
        let count = std::cmp::min(self.delegation.sockets, self.config.devices.pmem_devices.len());
        let parradm = util::resolve(&self.config.tools.parradm);
        util::run_checked(
            Command::new(&parradm)
                .arg("create")
                .args(&self.config.devices.pmem_devices[..count]),
        )?;
        self.register(UnmountHook::PmArray { parradm });
        Ok(self.config.devices.pm_array.clone())
    }
}

fn block_device_sectors(device: &Path) -> Result<u64> {
    let output = Command::new("blockdev").arg("--getsz").arg(device).output()?;
    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: format!("blockdev --getsz {}", device.display()),
            status: output.status,
        });
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.trim()
        .parse()
        .map_err(|_| Error::parse("blockdev", format!("bad size {:?}", text.trim())))
}
