//! Shared fixtures for the unit tests in this crate.

use f2e_fat::Geometry;
use f2e_layout::Plan;

/// A FAT32 geometry with 1 KiB sectors and clusters, 2 reserved sectors
/// and two FATs sized to address every cluster of the volume.
pub(crate) fn fat_geometry(total_sectors: u32) -> Geometry {
    let mut sectors_per_fat = 1_u32;
    loop {
        let before_data = 2 + 2 * sectors_per_fat;
        let cluster_count = total_sectors - before_data + 2;
        if sectors_per_fat * 1024 / 4 >= cluster_count {
            break;
        }
        sectors_per_fat += 1;
    }

    let mut sector = vec![0_u8; 512];
    sector[11..13].copy_from_slice(&1024_u16.to_le_bytes());
    sector[13] = 1;
    sector[14..16].copy_from_slice(&2_u16.to_le_bytes());
    sector[16] = 2;
    sector[32..36].copy_from_slice(&total_sectors.to_le_bytes());
    sector[36..40].copy_from_slice(&sectors_per_fat.to_le_bytes());
    sector[44..48].copy_from_slice(&2_u32.to_le_bytes());
    sector[66] = 0x29;
    sector[71..82].copy_from_slice(b"DISKTEST   ");
    sector[510] = 0x55;
    sector[511] = 0xAA;
    Geometry::parse(&sector, u64::from(total_sectors) * 1024).unwrap()
}

pub(crate) fn fat_plan(total_sectors: u32, uuid: [u8; 16], mkfs_time: u32) -> Plan {
    Plan::new(&fat_geometry(total_sectors), uuid, mkfs_time).unwrap()
}
