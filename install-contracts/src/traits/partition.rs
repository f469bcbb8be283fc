// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use install_types::{Device, PartitionModification, PartitionTableType};

use crate::BackendError;

pub trait PartitionOps: Send + Sync {
    /// Erase all signatures and write an empty table
    fn create_partition_table(
        &self,
        device: &Path,
        table_type: PartitionTableType,
    ) -> Result<(), BackendError>;

    /// Create `partition` as number `number` and return its device node
    fn create_partition(
        &self,
        device: &Device,
        table_type: PartitionTableType,
        partition: &PartitionModification,
        number: u32,
    ) -> Result<PathBuf, BackendError>;

    fn delete_partition(&self, device: &Path, number: u32) -> Result<(), BackendError>;

    /// Wait until the kernel and udev caught up with table changes
    fn settle(&self, device: &Path) -> Result<(), BackendError>;
}
