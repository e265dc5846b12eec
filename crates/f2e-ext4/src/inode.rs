//! In-memory inode image, serialized to the 256-byte on-disk layout at
//! write time.

use f2e_types::{split_u48, split_u64, write_bytes, write_le_u16, write_le_u32, InodeNo, ParseError};

pub const S_IFDIR: u16 = 0x4000;
pub const S_IFREG: u16 = 0x8000;
/// `i_flags` bit: inode uses extents.
const EXT4_EXTENTS_FL: u32 = 0x0008_0000;
/// Bytes of `i_block` holding the extent tree root.
pub const INODE_BLOCK_AREA: usize = 60;
const EXTRA_ISIZE: u16 = 32;

/// All the state of one inode while the filesystem is being built.
#[derive(Debug, Clone)]
pub struct InodeImage {
    pub ino: InodeNo,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub crtime: u32,
    pub links_count: u16,
    /// Allocated storage in 512-byte units, data and tree nodes alike.
    pub blocks_512: u64,
    /// Serialized extent-tree root, placed in `i_block`.
    pub block_area: [u8; INODE_BLOCK_AREA],
}

impl InodeImage {
    /// A directory inode. `links_count` starts at zero; the builder adds
    /// one per name referring to it.
    #[must_use]
    pub fn directory(ino: InodeNo, mode_bits: u16, uid: u32, gid: u32, times: InodeTimes) -> Self {
        Self::new(ino, S_IFDIR | mode_bits, uid, gid, times)
    }

    /// A regular-file inode.
    #[must_use]
    pub fn regular(ino: InodeNo, mode_bits: u16, uid: u32, gid: u32, times: InodeTimes) -> Self {
        Self::new(ino, S_IFREG | mode_bits, uid, gid, times)
    }

    fn new(ino: InodeNo, mode: u16, uid: u32, gid: u32, times: InodeTimes) -> Self {
        Self {
            ino,
            mode,
            uid,
            gid,
            size: 0,
            atime: times.atime,
            ctime: times.ctime,
            mtime: times.mtime,
            crtime: times.crtime,
            links_count: 0,
            blocks_512: 0,
            block_area: [0; INODE_BLOCK_AREA],
        }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFDIR != 0
    }

    /// Serialize to the 256-byte on-disk inode.
    pub fn encode(&self) -> Result<[u8; 256], ParseError> {
        let mut out = [0_u8; 256];
        let (size_lo, size_hi) = split_u64(self.size);
        let (blocks_lo, blocks_hi) =
            split_u48(self.blocks_512).ok_or(ParseError::IntegerConversion {
                field: "i_blocks",
            })?;

        write_le_u16(&mut out, 0x00, self.mode);
        write_le_u16(&mut out, 0x02, self.uid as u16);
        write_le_u32(&mut out, 0x04, size_lo);
        write_le_u32(&mut out, 0x08, self.atime);
        write_le_u32(&mut out, 0x0C, self.ctime);
        write_le_u32(&mut out, 0x10, self.mtime);
        // 0x14: i_dtime stays 0.
        write_le_u16(&mut out, 0x18, self.gid as u16);
        write_le_u16(&mut out, 0x1A, self.links_count);
        write_le_u32(&mut out, 0x1C, blocks_lo);
        write_le_u32(&mut out, 0x20, EXT4_EXTENTS_FL);
        write_bytes(&mut out, 0x28, &self.block_area);
        write_le_u32(&mut out, 0x6C, size_hi);
        write_le_u16(&mut out, 0x74, blocks_hi);
        write_le_u16(&mut out, 0x78, (self.uid >> 16) as u16);
        write_le_u16(&mut out, 0x7A, (self.gid >> 16) as u16);
        write_le_u16(&mut out, 0x80, EXTRA_ISIZE);
        write_le_u32(&mut out, 0x90, self.crtime);
        Ok(out)
    }
}

/// Timestamps for a new inode, already in epoch seconds.
#[derive(Debug, Clone, Copy)]
pub struct InodeTimes {
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub crtime: u32,
}

impl InodeTimes {
    /// All four timestamps set to `now` (reserved inodes).
    #[must_use]
    pub fn all(now: u32) -> Self {
        Self {
            atime: now,
            ctime: now,
            mtime: now,
            crtime: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use f2e_types::{read_le_u16, read_le_u32};

    #[test]
    fn encodes_well_known_offsets() {
        let mut inode = InodeImage::directory(
            InodeNo(2),
            0o755,
            1000,
            0x0001_0001,
            InodeTimes {
                atime: 10,
                ctime: 21,
                mtime: 20,
                crtime: 5,
            },
        );
        inode.links_count = 3;
        inode.size = 0x1_0000_0400;
        inode.blocks_512 = 0x1_0000_0008;
        let bytes = inode.encode().unwrap();

        assert_eq!(read_le_u16(&bytes, 0x00).unwrap(), 0x4000 | 0o755);
        assert_eq!(read_le_u16(&bytes, 0x02).unwrap(), 1000);
        assert_eq!(read_le_u16(&bytes, 0x78).unwrap(), 0);
        assert_eq!(read_le_u16(&bytes, 0x18).unwrap(), 1);
        assert_eq!(read_le_u16(&bytes, 0x7A).unwrap(), 1);
        assert_eq!(read_le_u32(&bytes, 0x04).unwrap(), 0x400);
        assert_eq!(read_le_u32(&bytes, 0x6C).unwrap(), 1);
        assert_eq!(read_le_u32(&bytes, 0x1C).unwrap(), 8);
        assert_eq!(read_le_u16(&bytes, 0x74).unwrap(), 1);
        assert_eq!(read_le_u16(&bytes, 0x1A).unwrap(), 3);
        assert_eq!(read_le_u32(&bytes, 0x20).unwrap(), 0x0008_0000);
        assert_eq!(read_le_u32(&bytes, 0x08).unwrap(), 10);
        assert_eq!(read_le_u32(&bytes, 0x0C).unwrap(), 21);
        assert_eq!(read_le_u32(&bytes, 0x10).unwrap(), 20);
        assert_eq!(read_le_u32(&bytes, 0x90).unwrap(), 5);
        assert_eq!(read_le_u16(&bytes, 0x80).unwrap(), 32);
    }

    #[test]
    fn oversized_block_count_is_rejected() {
        let mut inode = InodeImage::regular(InodeNo(12), 0o644, 0, 0, InodeTimes::all(0));
        inode.blocks_512 = 1 << 48;
        assert!(inode.encode().is_err());
    }
}
