#![forbid(unsafe_code)]
//! Append-only typed record log stored in free clusters.
//!
//! The conversion serializes the whole FAT directory tree into this log
//! before any ext4 structure is written. Pages are clusters obtained from
//! the allocator; each starts with a next-page pointer, and the payload is
//! a sequence of typed, length-prefixed record groups. The log is written
//! once, then read twice (dry run and commit) through forkable cursors.
//!
//! Records never straddle a page boundary; a unit that does not fit the
//! current page starts the next one, and the reader mirrors that rule.

mod records;

pub use records::{DentryRecord, DirMeta, NameUnit, Record, RecordKind};

use f2e_alloc::ExtentAllocator;
use f2e_error::{ConvertError, Result};
use f2e_image::ByteImage;
use f2e_types::{ClusterNo, FIRST_DATA_CLUSTER};
use tracing::{debug, trace};

/// Bytes reserved at the start of every page: next-page cluster number and
/// a reserved word kept zero.
pub const PAGE_HEADER_LEN: usize = 8;
/// Next-pointer value marking the last page.
const NO_NEXT_PAGE: u32 = 0xFFFF_FFFF;
/// Group header: record kind and record count.
const GROUP_HEADER_LEN: usize = 8;

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Maps cluster numbers to byte offsets for archive pages.
#[derive(Debug, Clone, Copy)]
pub struct PageStore {
    pub data_start_byte: u64,
    pub cluster_size: u32,
}

impl PageStore {
    #[must_use]
    pub fn page_offset(&self, page: ClusterNo) -> u64 {
        self.data_start_byte
            + u64::from(page.0 - FIRST_DATA_CLUSTER) * u64::from(self.cluster_size)
    }
}

/// Completed archive: entry point for readers.
#[derive(Debug, Clone, Copy)]
pub struct Archive {
    pub head: ClusterNo,
    pub pages: u32,
    store: PageStore,
}

// ── Writer ──────────────────────────────────────────────────────────────────

/// Single writer over the record log. The current page is buffered in
/// memory and flushed to an allocator-issued cluster when full; the
/// previous page's next-pointer is back-patched on flush.
pub struct ArchiveWriter {
    store: PageStore,
    buf: Vec<u8>,
    pos: usize,
    head: Option<ClusterNo>,
    prev: Option<ClusterNo>,
    pages: u32,
}

impl ArchiveWriter {
    #[must_use]
    pub fn new(store: PageStore) -> Self {
        let mut buf = vec![0_u8; store.cluster_size as usize];
        buf[0..4].copy_from_slice(&NO_NEXT_PAGE.to_le_bytes());
        Self {
            store,
            buf,
            pos: PAGE_HEADER_LEN,
            head: None,
            prev: None,
            pages: 0,
        }
    }

    /// Append one typed group: an 8-byte header followed by the records.
    pub fn append_group<R: Record>(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        records: &[R],
    ) -> Result<()> {
        let count = u32::try_from(records.len())
            .map_err(|_| ConvertError::BadArchive("group with more than 2^32 records".into()))?;
        let mut header = [0_u8; GROUP_HEADER_LEN];
        header[0..4].copy_from_slice(&(R::KIND as u32).to_le_bytes());
        header[4..8].copy_from_slice(&count.to_le_bytes());
        self.put_unit(image, alloc, &header)?;

        let mut record_buf = vec![0_u8; R::LEN];
        for record in records {
            record.encode(&mut record_buf);
            self.put_unit(image, alloc, &record_buf)?;
        }
        trace!(
            target: "f2e::archive",
            kind = ?R::KIND,
            count,
            "archived group"
        );
        Ok(())
    }

    fn put_unit(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        unit: &[u8],
    ) -> Result<()> {
        debug_assert!(unit.len() <= self.buf.len() - PAGE_HEADER_LEN);
        if self.buf.len() - self.pos < unit.len() {
            self.flush_page(image, alloc)?;
        }
        self.buf[self.pos..self.pos + unit.len()].copy_from_slice(unit);
        self.pos += unit.len();
        Ok(())
    }

    fn flush_page(&mut self, image: &mut dyn ByteImage, alloc: &mut ExtentAllocator) -> Result<()> {
        let page = alloc.allocate_one()?;
        image.write_all_at(self.store.page_offset(page), &self.buf)?;
        match self.prev {
            Some(prev) => {
                // Back-patch the previous page's next-pointer.
                image.write_all_at(self.store.page_offset(prev), &page.0.to_le_bytes())?;
            }
            None => self.head = Some(page),
        }
        self.prev = Some(page);
        self.pages += 1;

        self.buf.fill(0);
        self.buf[0..4].copy_from_slice(&NO_NEXT_PAGE.to_le_bytes());
        self.pos = PAGE_HEADER_LEN;
        Ok(())
    }

    /// Flush the trailing page and seal the archive.
    pub fn finish(
        mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
    ) -> Result<Archive> {
        if self.pos > PAGE_HEADER_LEN || self.head.is_none() {
            self.flush_page(image, alloc)?;
        }
        let head = self
            .head
            .ok_or_else(|| ConvertError::BadArchive("archive is empty".into()))?;
        debug!(target: "f2e::archive", pages = self.pages, head = head.0, "archive sealed");
        Ok(Archive {
            head,
            pages: self.pages,
            store: self.store,
        })
    }
}

// ── Reader ──────────────────────────────────────────────────────────────────

/// Forward-scanning cursor over a sealed archive.
///
/// Cloning forks the cursor: the fork scans ahead without consuming the
/// original's position.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    store: PageStore,
    page_buf: Vec<u8>,
    pos: usize,
}

impl ArchiveReader {
    pub fn new(image: &dyn ByteImage, archive: &Archive) -> Result<Self> {
        let mut page_buf = vec![0_u8; archive.store.cluster_size as usize];
        image.read_exact_at(archive.store.page_offset(archive.head), &mut page_buf)?;
        Ok(Self {
            store: archive.store,
            page_buf,
            pos: PAGE_HEADER_LEN,
        })
    }

    /// Read one group, requiring it to be of kind `R::KIND`.
    pub fn read_group<R: Record>(&mut self, image: &dyn ByteImage) -> Result<Vec<R>> {
        self.ensure(image, GROUP_HEADER_LEN)?;
        let kind = read_u32(&self.page_buf, self.pos);
        let count = read_u32(&self.page_buf, self.pos + 4);
        self.pos += GROUP_HEADER_LEN;

        if kind != R::KIND as u32 {
            return Err(ConvertError::BadArchive(format!(
                "expected {:?} group, found kind {kind}",
                R::KIND
            )));
        }

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            self.ensure(image, R::LEN)?;
            records.push(R::decode(&self.page_buf[self.pos..self.pos + R::LEN]));
            self.pos += R::LEN;
        }
        Ok(records)
    }

    fn ensure(&mut self, image: &dyn ByteImage, len: usize) -> Result<()> {
        if self.page_buf.len() - self.pos >= len {
            return Ok(());
        }
        let next = read_u32(&self.page_buf, 0);
        if next == NO_NEXT_PAGE {
            return Err(ConvertError::BadArchive(
                "read past the end of the archive".into(),
            ));
        }
        image.read_exact_at(self.store.page_offset(ClusterNo(next)), &mut self.page_buf)?;
        self.pos = PAGE_HEADER_LEN;
        Ok(())
    }
}
