use f2e_error::{ConvertError, Result};
use f2e_types::{read_le_u16, read_le_u32, ClusterNo, LFN_UNITS_PER_ENTRY};

/// On-disk size of a FAT directory entry.
pub const DENTRY_SIZE: usize = 32;

const ATTR_READ_ONLY: u8 = 0x01;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LONG_NAME_MASK: u8 = 0x3F;
const ATTR_LONG_NAME: u8 = 0x0F;

/// Case flag: 8.3 base name is stored uppercase but displays lowercase.
const CASE_LOWER_BASE: u8 = 0x08;
/// Case flag: 8.3 extension is stored uppercase but displays lowercase.
const CASE_LOWER_EXT: u8 = 0x10;

/// First name byte of a deleted entry.
const DELETED_MARKER: u8 = 0xE5;
/// First name byte substitute when the real value would be 0xE5.
const KANJI_ESCAPE: u8 = 0x05;
/// Sequence-number bit marking the final (highest) LFN entry of a group.
const LFN_LAST_FLAG: u8 = 0x40;

/// A classified 32-byte directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEntry {
    /// 0x00 first byte: no further entries in this directory.
    End,
    /// Deleted entry (0xE5).
    Deleted,
    /// Long-filename entry carrying up to 13 UCS-2 units.
    Lfn {
        sequence: u8,
        is_last: bool,
        units: [u16; LFN_UNITS_PER_ENTRY],
    },
    /// Regular short-name entry (file, directory, dot entry or label).
    Short(ShortEntry),
}

/// Decoded short-name directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortEntry {
    pub name: [u8; 8],
    pub extension: [u8; 3],
    pub attrs: u8,
    pub case_flags: u8,
    pub create_time_tenths: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub access_date: u16,
    pub modify_time: u16,
    pub modify_date: u16,
    pub file_size: u32,
    first_cluster_high: u16,
    first_cluster_low: u16,
}

impl RawEntry {
    /// Classify one 32-byte entry.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DENTRY_SIZE {
            return Err(ConvertError::BadDirectory {
                cluster: 0,
                detail: format!("directory entry truncated to {} bytes", bytes.len()),
            });
        }
        if bytes[0] == 0x00 {
            return Ok(Self::End);
        }
        if bytes[0] == DELETED_MARKER {
            return Ok(Self::Deleted);
        }
        let attrs = bytes[11];
        if attrs & ATTR_LONG_NAME_MASK == ATTR_LONG_NAME {
            let mut units = [0_u16; LFN_UNITS_PER_ENTRY];
            for (slot, offset) in (1..11).step_by(2).enumerate() {
                units[slot] = read_le_u16(bytes, offset)?;
            }
            for (slot, offset) in (14..26).step_by(2).enumerate() {
                units[slot + 5] = read_le_u16(bytes, offset)?;
            }
            for (slot, offset) in (28..32).step_by(2).enumerate() {
                units[slot + 11] = read_le_u16(bytes, offset)?;
            }
            return Ok(Self::Lfn {
                sequence: bytes[0] & 0x1F,
                is_last: bytes[0] & LFN_LAST_FLAG != 0,
                units,
            });
        }

        let mut name = [0_u8; 8];
        name.copy_from_slice(&bytes[0..8]);
        if name[0] == KANJI_ESCAPE {
            name[0] = DELETED_MARKER;
        }
        let mut extension = [0_u8; 3];
        extension.copy_from_slice(&bytes[8..11]);

        Ok(Self::Short(ShortEntry {
            name,
            extension,
            attrs,
            case_flags: bytes[12],
            create_time_tenths: bytes[13],
            create_time: read_le_u16(bytes, 14)?,
            create_date: read_le_u16(bytes, 16)?,
            access_date: read_le_u16(bytes, 18)?,
            first_cluster_high: read_le_u16(bytes, 20)?,
            modify_time: read_le_u16(bytes, 22)?,
            modify_date: read_le_u16(bytes, 24)?,
            first_cluster_low: read_le_u16(bytes, 26)?,
            file_size: read_le_u32(bytes, 28)?,
        }))
    }
}

impl ShortEntry {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.attrs & ATTR_DIRECTORY != 0
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.attrs & ATTR_READ_ONLY != 0
    }

    #[must_use]
    pub fn is_volume_label(&self) -> bool {
        self.attrs & ATTR_VOLUME_ID != 0 && self.attrs & ATTR_LONG_NAME_MASK != ATTR_LONG_NAME
    }

    /// `.` or `..` entry.
    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name[0] == b'.'
    }

    #[must_use]
    pub fn first_cluster(&self) -> ClusterNo {
        ClusterNo(u32::from(self.first_cluster_low) | (u32::from(self.first_cluster_high) << 16))
    }

    /// The 8.3 name as UCS-2 units, honoring the lowercase flags.
    ///
    /// Short names are OEM-encoded; the printable subset is ASCII, which
    /// maps to UCS-2 one-to-one.
    #[must_use]
    pub fn name_units(&self) -> Vec<u16> {
        let base_end = self
            .name
            .iter()
            .rposition(|&b| b != b' ')
            .map_or(0, |idx| idx + 1);
        let ext_end = self
            .extension
            .iter()
            .rposition(|&b| b != b' ')
            .map_or(0, |idx| idx + 1);

        let mut units = Vec::with_capacity(12);
        for &byte in &self.name[..base_end] {
            units.push(u16::from(case_byte(byte, self.case_flags & CASE_LOWER_BASE != 0)));
        }
        if ext_end > 0 {
            units.push(u16::from(b'.'));
            for &byte in &self.extension[..ext_end] {
                units.push(u16::from(case_byte(byte, self.case_flags & CASE_LOWER_EXT != 0)));
            }
        }
        units
    }
}

fn case_byte(byte: u8, lowercase: bool) -> u8 {
    if lowercase {
        byte.to_ascii_lowercase()
    } else {
        byte
    }
}

/// A directory child: decoded short entry plus the name in UCS-2 units
/// (from the LFN group when present, from the 8.3 name otherwise).
#[derive(Debug, Clone)]
pub struct FatFile {
    pub entry: ShortEntry,
    pub name_units: Vec<u16>,
}

/// Iterates the children of one directory from its raw cluster-chain bytes.
///
/// Deleted entries, dot entries and the volume label are skipped. An LFN
/// group is coalesced with its terminal short entry; a dangling group is a
/// directory-corruption error.
pub struct DirEntries<'a> {
    data: &'a [u8],
    offset: usize,
    /// Cluster number reported in errors.
    origin: ClusterNo,
    done: bool,
}

impl<'a> DirEntries<'a> {
    #[must_use]
    pub fn new(data: &'a [u8], origin: ClusterNo) -> Self {
        Self {
            data,
            offset: 0,
            origin,
            done: false,
        }
    }

    fn next_raw(&mut self) -> Option<Result<RawEntry>> {
        if self.offset + DENTRY_SIZE > self.data.len() {
            return None;
        }
        let bytes = &self.data[self.offset..self.offset + DENTRY_SIZE];
        self.offset += DENTRY_SIZE;
        Some(RawEntry::parse(bytes))
    }

    fn bad(&self, detail: impl Into<String>) -> ConvertError {
        ConvertError::BadDirectory {
            cluster: self.origin.0,
            detail: detail.into(),
        }
    }

    /// Assemble the LFN group starting with `first` (the `is_last` entry),
    /// returning the name units and the terminal short entry.
    fn collect_lfn(
        &mut self,
        sequence: u8,
        units: [u16; LFN_UNITS_PER_ENTRY],
    ) -> Result<(Vec<u16>, ShortEntry)> {
        if sequence == 0 {
            return Err(self.bad("long filename entry with sequence number 0"));
        }
        let mut name = vec![0_u16; usize::from(sequence) * LFN_UNITS_PER_ENTRY];
        let mut expected = sequence;
        let mut place = |seq: u8, units: &[u16; LFN_UNITS_PER_ENTRY]| {
            let start = usize::from(seq - 1) * LFN_UNITS_PER_ENTRY;
            name[start..start + LFN_UNITS_PER_ENTRY].copy_from_slice(units);
        };
        place(sequence, &units);

        while expected > 1 {
            expected -= 1;
            match self.next_raw() {
                Some(Ok(RawEntry::Lfn {
                    sequence: seq,
                    is_last: false,
                    units,
                })) if seq == expected => place(seq, &units),
                Some(Ok(_)) | None => {
                    return Err(self.bad("long filename group interrupted"));
                }
                Some(Err(err)) => return Err(err),
            }
        }

        match self.next_raw() {
            Some(Ok(RawEntry::Short(entry))) => {
                // Trim the NUL terminator and 0xFFFF padding.
                let end = name
                    .iter()
                    .position(|&unit| unit == 0 || unit == 0xFFFF)
                    .unwrap_or(name.len());
                name.truncate(end);
                Ok((name, entry))
            }
            Some(Ok(_)) | None => Err(self.bad("long filename group without a short entry")),
            Some(Err(err)) => Err(err),
        }
    }
}

impl Iterator for DirEntries<'_> {
    type Item = Result<FatFile>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.next_raw()? {
                Ok(RawEntry::End) => {
                    self.done = true;
                    return None;
                }
                Ok(RawEntry::Deleted) => {}
                Ok(RawEntry::Lfn {
                    sequence,
                    is_last,
                    units,
                }) => {
                    if !is_last {
                        return Some(Err(self.bad("long filename group starts mid-sequence")));
                    }
                    return Some(self.collect_lfn(sequence, units).map(
                        |(name_units, entry)| FatFile { entry, name_units },
                    ));
                }
                Ok(RawEntry::Short(entry)) => {
                    if entry.is_dot() || entry.is_volume_label() {
                        continue;
                    }
                    let name_units = entry.name_units();
                    return Some(Ok(FatFile { entry, name_units }));
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
