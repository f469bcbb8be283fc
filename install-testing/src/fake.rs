// SPDX-License-Identifier: GPL-3.0-only

//! In-memory `SystemBackend` that records every mutating call

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use install_contracts::{
    BackendError, BackendErrorKind, DeviceDiscovery, FilesystemOps, LuksOps, PartitionOps,
    TargetOps,
};
use install_types::{
    BlockIdentity, Device, Fido2Device, FilesystemType, FirmwareMode, MountEntry, PartitionId,
    PartitionModification, PartitionTableType, Password,
};

/// One recorded backend operation
///
/// Read-only discovery queries are not recorded; `list_devices` is counted
/// instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateTable {
        device: PathBuf,
        table_type: PartitionTableType,
    },
    CreatePartition {
        device: PathBuf,
        id: PartitionId,
        number: u32,
        start: u64,
        end: u64,
    },
    DeletePartition {
        device: PathBuf,
        number: u32,
    },
    Settle(PathBuf),
    Format {
        device: PathBuf,
        fs_type: FilesystemType,
    },
    Mount {
        source: PathBuf,
        target: PathBuf,
        fs_type: Option<FilesystemType>,
    },
    Unmount {
        target: PathBuf,
        recursive: bool,
    },
    Swapoff(PathBuf),
    LuksFormat(PathBuf),
    LuksOpen {
        device: PathBuf,
        name: String,
    },
    LuksClose(String),
    LuksAddKey {
        device: PathBuf,
        key_file: PathBuf,
    },
    Fido2Enroll(PathBuf),
    Pacstrap {
        root: PathBuf,
        packages: Vec<String>,
    },
    Chroot {
        root: PathBuf,
        args: Vec<String>,
        stdin: Option<String>,
    },
    Shell(PathBuf),
}

/// Operation kind of a [`Call`], used for counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateTable,
    CreatePartition,
    DeletePartition,
    Settle,
    Format,
    Mount,
    Unmount,
    Swapoff,
    LuksFormat,
    LuksOpen,
    LuksClose,
    LuksAddKey,
    Fido2Enroll,
    Pacstrap,
    Chroot,
    Shell,
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::CreateTable { .. } => Op::CreateTable,
            Call::CreatePartition { .. } => Op::CreatePartition,
            Call::DeletePartition { .. } => Op::DeletePartition,
            Call::Settle(_) => Op::Settle,
            Call::Format { .. } => Op::Format,
            Call::Mount { .. } => Op::Mount,
            Call::Unmount { .. } => Op::Unmount,
            Call::Swapoff(_) => Op::Swapoff,
            Call::LuksFormat(_) => Op::LuksFormat,
            Call::LuksOpen { .. } => Op::LuksOpen,
            Call::LuksClose(_) => Op::LuksClose,
            Call::LuksAddKey { .. } => Op::LuksAddKey,
            Call::Fido2Enroll(_) => Op::Fido2Enroll,
            Call::Pacstrap { .. } => Op::Pacstrap,
            Call::Chroot { .. } => Op::Chroot,
            Call::Shell(_) => Op::Shell,
        }
    }

    /// Device or path the call acted on
    pub fn device(&self) -> Option<&Path> {
        match self {
            Call::CreateTable { device, .. }
            | Call::CreatePartition { device, .. }
            | Call::DeletePartition { device, .. }
            | Call::Format { device, .. }
            | Call::LuksOpen { device, .. }
            | Call::LuksAddKey { device, .. } => Some(device),
            Call::Settle(device)
            | Call::Swapoff(device)
            | Call::LuksFormat(device)
            | Call::Fido2Enroll(device) => Some(device),
            Call::Mount { target, .. } | Call::Unmount { target, .. } => Some(target),
            _ => None,
        }
    }
}

#[derive(Default)]
struct State {
    devices: Vec<Device>,
    mounts: Vec<MountEntry>,
    probes: HashMap<PathBuf, FilesystemType>,
    identities: HashMap<PathBuf, BlockIdentity>,
    failures: HashMap<Op, String>,
    firmware: Option<FirmwareMode>,
    list_devices_count: usize,
}

/// Recording backend with a simulated mount table
///
/// Clones share their state, so a test keeps one handle while the code under
/// test owns another.
#[derive(Clone, Default)]
pub struct FakeBackend {
    calls: Arc<Mutex<Vec<Call>>>,
    state: Arc<Mutex<State>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: Device) {
        lock(&self.state).devices.push(device);
    }

    /// Pretend `source` is already mounted at `target`
    pub fn add_mount(&self, source: impl Into<PathBuf>, target: impl Into<PathBuf>, fs_type: &str) {
        lock(&self.state).mounts.push(MountEntry {
            source: source.into(),
            target: target.into(),
            fs_type: fs_type.to_string(),
            options: vec!["rw".to_string(), "relatime".to_string()],
        });
    }

    pub fn set_probe(&self, device: impl Into<PathBuf>, fs_type: FilesystemType) {
        lock(&self.state).probes.insert(device.into(), fs_type);
    }

    pub fn set_identity(&self, device: impl Into<PathBuf>, uuid: &str) {
        lock(&self.state).identities.insert(
            device.into(),
            BlockIdentity {
                uuid: Some(uuid.to_string()),
                partuuid: None,
            },
        );
    }

    pub fn set_firmware(&self, firmware: FirmwareMode) {
        lock(&self.state).firmware = Some(firmware);
    }

    /// Every later call of `op` is recorded and then fails with `message`
    pub fn fail_on(&self, op: Op, message: &str) {
        lock(&self.state).failures.insert(op, message.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *lock(&self.calls))
    }

    pub fn count(&self, op: Op) -> usize {
        lock(&self.calls).iter().filter(|c| c.op() == op).count()
    }

    pub fn list_devices_count(&self) -> usize {
        lock(&self.state).list_devices_count
    }

    pub fn mounts(&self) -> Vec<MountEntry> {
        lock(&self.state).mounts.clone()
    }

    fn record(&self, call: Call) -> Result<(), BackendError> {
        let op = call.op();
        lock(&self.calls).push(call);
        match lock(&self.state).failures.get(&op) {
            Some(message) => Err(BackendError::command_failed(message.clone())),
            None => Ok(()),
        }
    }
}

impl DeviceDiscovery for FakeBackend {
    fn list_devices(&self) -> Result<Vec<Device>, BackendError> {
        let mut state = lock(&self.state);
        state.list_devices_count += 1;
        Ok(state.devices.clone())
    }

    fn mount_table(&self) -> Result<Vec<MountEntry>, BackendError> {
        Ok(lock(&self.state).mounts.clone())
    }

    fn probe_filesystem(&self, path: &Path) -> Result<Option<FilesystemType>, BackendError> {
        Ok(lock(&self.state).probes.get(path).copied())
    }

    fn block_identity(&self, path: &Path) -> Result<BlockIdentity, BackendError> {
        Ok(lock(&self.state)
            .identities
            .get(path)
            .cloned()
            .unwrap_or_default())
    }

    fn firmware_mode(&self) -> FirmwareMode {
        lock(&self.state).firmware.unwrap_or(FirmwareMode::Uefi)
    }
}

impl PartitionOps for FakeBackend {
    fn create_partition_table(
        &self,
        device: &Path,
        table_type: PartitionTableType,
    ) -> Result<(), BackendError> {
        self.record(Call::CreateTable {
            device: device.to_path_buf(),
            table_type,
        })
    }

    fn create_partition(
        &self,
        device: &Device,
        _table_type: PartitionTableType,
        partition: &PartitionModification,
        number: u32,
    ) -> Result<PathBuf, BackendError> {
        let invalid = |err: install_types::SizeError| {
            BackendError::new(BackendErrorKind::InvalidInput, err.to_string())
        };
        let total = device.total_bytes().map_err(invalid)?;
        let range = partition.range(total).map_err(invalid)?;
        self.record(Call::CreatePartition {
            device: device.path.clone(),
            id: partition.id,
            number,
            start: range.start,
            end: range.end,
        })?;
        Ok(device.partition_path(number))
    }

    fn delete_partition(&self, device: &Path, number: u32) -> Result<(), BackendError> {
        self.record(Call::DeletePartition {
            device: device.to_path_buf(),
            number,
        })
    }

    fn settle(&self, device: &Path) -> Result<(), BackendError> {
        self.record(Call::Settle(device.to_path_buf()))
    }
}

impl FilesystemOps for FakeBackend {
    fn format(&self, device: &Path, fs_type: FilesystemType) -> Result<(), BackendError> {
        self.record(Call::Format {
            device: device.to_path_buf(),
            fs_type,
        })
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: Option<FilesystemType>,
        options: &[String],
    ) -> Result<(), BackendError> {
        self.record(Call::Mount {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            fs_type,
        })?;
        lock(&self.state).mounts.push(MountEntry {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            fs_type: fs_type.map_or("auto", |fs| fs.mount_type()).to_string(),
            options: options.to_vec(),
        });
        Ok(())
    }

    fn unmount(&self, target: &Path, recursive: bool) -> Result<(), BackendError> {
        self.record(Call::Unmount {
            target: target.to_path_buf(),
            recursive,
        })?;
        lock(&self.state)
            .mounts
            .retain(|m| !(m.target == target || (recursive && m.target.starts_with(target))));
        Ok(())
    }

    fn swapoff(&self, device: &Path) -> Result<(), BackendError> {
        self.record(Call::Swapoff(device.to_path_buf()))
    }
}

impl LuksOps for FakeBackend {
    fn luks_format(&self, device: &Path, _password: &Password) -> Result<(), BackendError> {
        self.record(Call::LuksFormat(device.to_path_buf()))
    }

    fn luks_open(
        &self,
        device: &Path,
        name: &str,
        _password: &Password,
    ) -> Result<PathBuf, BackendError> {
        self.record(Call::LuksOpen {
            device: device.to_path_buf(),
            name: name.to_string(),
        })?;
        Ok(Path::new("/dev/mapper").join(name))
    }

    fn luks_close(&self, name: &str) -> Result<(), BackendError> {
        self.record(Call::LuksClose(name.to_string()))
    }

    fn luks_add_key(
        &self,
        device: &Path,
        _password: &Password,
        key_file: &Path,
    ) -> Result<(), BackendError> {
        self.record(Call::LuksAddKey {
            device: device.to_path_buf(),
            key_file: key_file.to_path_buf(),
        })
    }

    fn fido2_enroll(
        &self,
        device: &Path,
        _token: &Fido2Device,
        _password: &Password,
    ) -> Result<(), BackendError> {
        self.record(Call::Fido2Enroll(device.to_path_buf()))
    }
}

impl TargetOps for FakeBackend {
    fn pacstrap(&self, root: &Path, packages: &[String]) -> Result<(), BackendError> {
        self.record(Call::Pacstrap {
            root: root.to_path_buf(),
            packages: packages.to_vec(),
        })
    }

    fn chroot_run(
        &self,
        root: &Path,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<String, BackendError> {
        self.record(Call::Chroot {
            root: root.to_path_buf(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stdin: stdin.map(str::to_string),
        })?;
        Ok(String::new())
    }

    fn interactive_shell(&self, root: &Path) -> Result<(), BackendError> {
        self.record(Call::Shell(root.to_path_buf()))
    }
}
