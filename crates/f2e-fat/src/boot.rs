use f2e_error::{ConvertError, Result};
use f2e_types::{read_fixed, read_le_u16, read_le_u32, ClusterNo, FIRST_DATA_CLUSTER};
use tracing::debug;

/// Size of the boot sector region we parse.
pub const BOOT_SECTOR_LEN: usize = 512;

const BOOT_SIGNATURE: u16 = 0xAA55;
/// Extended boot signature value indicating the volume label field is absent.
const EXT_BOOT_SIG_NO_LABEL: u8 = 0x28;

/// Validated FAT32 volume geometry, derived from the boot sector once at
/// startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub fat_count: u32,
    pub total_sectors: u32,
    pub sectors_per_fat: u32,
    pub root_cluster: ClusterNo,
    pub volume_id: u32,
    /// Trimmed volume label; empty when the boot sector carries none.
    pub volume_label: Vec<u8>,

    // Derived values.
    pub cluster_size: u32,
    pub fat_start_byte: u64,
    pub data_start_byte: u64,
    /// One past the highest addressable cluster number.
    pub cluster_count: u32,
}

impl Geometry {
    /// Parse and validate a FAT32 boot sector.
    ///
    /// Everything that would make an in-place conversion unsound is
    /// rejected here: FAT12/16 volumes, cluster sizes outside
    /// 1 KiB..=64 KiB, and a data region that is not cluster-aligned.
    pub fn parse(sector: &[u8], image_len: u64) -> Result<Self> {
        let signature = read_le_u16(sector, 510)?;
        if signature != BOOT_SIGNATURE {
            return Err(ConvertError::Unsupported(format!(
                "missing boot signature (found {signature:#06x})"
            )));
        }

        let bytes_per_sector = u32::from(read_le_u16(sector, 11)?);
        let sectors_per_cluster = u32::from(sector[13]);
        let reserved_sectors = u32::from(read_le_u16(sector, 14)?);
        let fat_count = u32::from(sector[16]);
        let root_entry_count = read_le_u16(sector, 17)?;
        let total_sectors_16 = read_le_u16(sector, 19)?;
        let fat_size_16 = read_le_u16(sector, 22)?;
        let total_sectors_32 = read_le_u32(sector, 32)?;
        let sectors_per_fat = read_le_u32(sector, 36)?;
        let root_cluster = read_le_u32(sector, 44)?;
        let ext_boot_signature = sector[66];
        let volume_id = read_le_u32(sector, 67)?;
        let label_raw: [u8; 11] = read_fixed(sector, 71)?;

        if root_entry_count != 0 || total_sectors_16 != 0 || fat_size_16 != 0 {
            return Err(ConvertError::Unsupported(
                "volume is FAT12/FAT16, only FAT32 is supported".into(),
            ));
        }
        if !bytes_per_sector.is_power_of_two() || bytes_per_sector < 512 {
            return Err(ConvertError::Unsupported(format!(
                "invalid bytes per sector: {bytes_per_sector}"
            )));
        }
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(ConvertError::Unsupported(format!(
                "invalid sectors per cluster: {sectors_per_cluster}"
            )));
        }
        let cluster_size = bytes_per_sector * sectors_per_cluster;
        if cluster_size < 1024 {
            return Err(ConvertError::Unsupported(format!(
                "cluster size {cluster_size} is below 1 KiB; ext4 has no matching block size"
            )));
        }
        if cluster_size > 65536 {
            return Err(ConvertError::Unsupported(format!(
                "cluster size {cluster_size} is above 64 KiB; ext4 has no matching block size"
            )));
        }
        if fat_count == 0 || sectors_per_fat == 0 {
            return Err(ConvertError::Unsupported(
                "boot sector describes no FAT".into(),
            ));
        }
        let total_sectors = total_sectors_32;
        if total_sectors == 0 {
            return Err(ConvertError::Unsupported("zero total sectors".into()));
        }

        let fat_start_byte = u64::from(reserved_sectors) * u64::from(bytes_per_sector);
        let sectors_before_data = reserved_sectors + sectors_per_fat * fat_count;
        let data_start_byte = u64::from(sectors_before_data) * u64::from(bytes_per_sector);
        if data_start_byte % u64::from(cluster_size) != 0 {
            return Err(ConvertError::Unsupported(
                "FAT data region is not aligned to the cluster size; \
                 cannot reuse clusters as ext4 blocks (see mkfs.fat -a)"
                    .into(),
            ));
        }
        if total_sectors <= sectors_before_data {
            return Err(ConvertError::Unsupported(
                "data region lies beyond the volume end".into(),
            ));
        }

        let cluster_count =
            (total_sectors - sectors_before_data) / sectors_per_cluster + FIRST_DATA_CLUSTER;
        let fat_entry_capacity = (u64::from(sectors_per_fat) * u64::from(bytes_per_sector)) / 4;
        if fat_entry_capacity < u64::from(cluster_count) {
            return Err(ConvertError::Unsupported(format!(
                "FAT holds {fat_entry_capacity} entries but the volume has {cluster_count} clusters"
            )));
        }
        if root_cluster < FIRST_DATA_CLUSTER || root_cluster >= cluster_count {
            return Err(ConvertError::Unsupported(format!(
                "root cluster {root_cluster} out of range"
            )));
        }

        let volume_bytes = u64::from(total_sectors) * u64::from(bytes_per_sector);
        if volume_bytes > image_len {
            return Err(ConvertError::Unsupported(format!(
                "boot sector claims {volume_bytes} bytes but the image holds {image_len}"
            )));
        }

        let volume_label = if ext_boot_signature == EXT_BOOT_SIG_NO_LABEL {
            Vec::new()
        } else {
            let end = label_raw
                .iter()
                .rposition(|&b| b != b' ')
                .map_or(0, |idx| idx + 1);
            label_raw[..end].to_vec()
        };

        let geometry = Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            total_sectors,
            sectors_per_fat,
            root_cluster: ClusterNo(root_cluster),
            volume_id,
            volume_label,
            cluster_size,
            fat_start_byte,
            data_start_byte,
            cluster_count,
        };
        debug!(
            target: "f2e::fat",
            cluster_size,
            cluster_count,
            root_cluster,
            "parsed FAT32 geometry"
        );
        Ok(geometry)
    }

    /// Byte offset of a data cluster within the image.
    #[must_use]
    pub fn cluster_offset(&self, cluster: ClusterNo) -> u64 {
        debug_assert!(cluster.is_data());
        self.data_start_byte
            + u64::from(cluster.0 - FIRST_DATA_CLUSTER) * u64::from(self.cluster_size)
    }

    /// Number of ext4 blocks that precede the first data cluster.
    ///
    /// Validity of the division is guaranteed by the alignment check in
    /// [`Geometry::parse`].
    #[must_use]
    pub fn blocks_before_data(&self) -> u64 {
        self.data_start_byte / u64::from(self.cluster_size)
    }

    /// Translate a data cluster to its ext4 block number.
    #[must_use]
    pub fn cluster_to_block(&self, cluster: ClusterNo) -> u64 {
        u64::from(cluster.0 - FIRST_DATA_CLUSTER) + self.blocks_before_data()
    }

    /// Translate an ext4 block to a data cluster, or `None` for blocks
    /// before the data region.
    #[must_use]
    pub fn block_to_cluster(&self, block: u64) -> Option<ClusterNo> {
        let cluster = block
            .checked_sub(self.blocks_before_data())?
            .checked_add(u64::from(FIRST_DATA_CLUSTER))?;
        u32::try_from(cluster).ok().map(ClusterNo)
    }

    /// Total volume size in bytes.
    #[must_use]
    pub fn volume_bytes(&self) -> u64 {
        u64::from(self.total_sectors) * u64::from(self.bytes_per_sector)
    }

    #[must_use]
    pub fn dentries_per_cluster(&self) -> usize {
        self.cluster_size as usize / crate::dentry::DENTRY_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::boot_sector_bytes;

    #[test]
    fn parses_valid_geometry() {
        // 1 KiB sectors, 1 sector per cluster, 2 reserved, 2 FATs of 16 sectors
        let sector = boot_sector_bytes(1024, 1, 2, 2, 4096, 16);
        let geometry = Geometry::parse(&sector, 4096 * 1024).unwrap();
        assert_eq!(geometry.cluster_size, 1024);
        assert_eq!(geometry.fat_start_byte, 2048);
        assert_eq!(geometry.data_start_byte, (2 + 32) as u64 * 1024);
        assert_eq!(geometry.cluster_count, 4096 - 34 + 2);
        assert_eq!(geometry.volume_label, b"TESTVOL");
    }

    #[test]
    fn cluster_block_translation_round_trips() {
        let sector = boot_sector_bytes(1024, 1, 2, 2, 4096, 16);
        let geometry = Geometry::parse(&sector, 4096 * 1024).unwrap();
        let block = geometry.cluster_to_block(ClusterNo(2));
        assert_eq!(block, 34);
        assert_eq!(geometry.block_to_cluster(block), Some(ClusterNo(2)));
        assert_eq!(geometry.block_to_cluster(5), None);
    }

    #[test]
    fn rejects_fat16_signatures() {
        let mut sector = boot_sector_bytes(1024, 1, 2, 2, 4096, 16);
        sector[17..19].copy_from_slice(&512_u16.to_le_bytes()); // root_entry_count
        assert!(Geometry::parse(&sector, 4096 * 1024).is_err());

        let mut sector = boot_sector_bytes(1024, 1, 2, 2, 4096, 16);
        sector[22..24].copy_from_slice(&8_u16.to_le_bytes()); // fat_size_16
        assert!(Geometry::parse(&sector, 4096 * 1024).is_err());
    }

    #[test]
    fn rejects_small_clusters() {
        let sector = boot_sector_bytes(512, 1, 4, 2, 4096, 32);
        let err = Geometry::parse(&sector, 4096 * 512).unwrap_err();
        assert!(err.to_string().contains("below 1 KiB"));
    }

    #[test]
    fn rejects_misaligned_data_region() {
        // 512-byte sectors, 4 per cluster (2 KiB clusters), but an odd
        // number of sectors before the data region.
        let sector = boot_sector_bytes(512, 4, 3, 2, 8192, 32);
        let err = Geometry::parse(&sector, 8192 * 512).unwrap_err();
        assert!(err.to_string().contains("not aligned"));
    }

    #[test]
    fn rejects_missing_signature() {
        let mut sector = boot_sector_bytes(1024, 1, 2, 2, 4096, 16);
        sector[510] = 0;
        assert!(Geometry::parse(&sector, 4096 * 1024).is_err());
    }

    #[test]
    fn no_label_when_old_ext_signature() {
        let mut sector = boot_sector_bytes(1024, 1, 2, 2, 4096, 16);
        sector[66] = 0x28;
        let geometry = Geometry::parse(&sector, 4096 * 1024).unwrap();
        assert!(geometry.volume_label.is_empty());
    }
}
