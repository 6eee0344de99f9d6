use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::buffer::{BufferPool, PageRef};
use crate::disk::FileId;
use crate::error::{DbError, Result};
use crate::page::{Page, Rid};

pub const MAX_FILE_NAME: usize = 32;

// Header page layout (page 0 of every heap file):
//   name: 32 bytes, zero padded
//   rec_cnt: u32     - live records across all data pages
//   page_cnt: u32    - number of data pages in the chain
//   first_page: u32  - head of the data page chain
//   last_page: u32   - tail of the data page chain

/// Byte accessors for the header page. The header is an ordinary pool
/// page; these functions interpret its bytes in place.
pub(crate) struct FileHeader;

impl FileHeader {
    pub fn init(page: &mut Page, name: &str, first_page: u32) {
        page.data.fill(0);
        let bytes = name.as_bytes();
        let n = bytes.len().min(MAX_FILE_NAME);
        page.data[..n].copy_from_slice(&bytes[..n]);
        Self::set_rec_cnt(page, 0);
        Self::set_page_cnt(page, 1);
        Self::set_first_page(page, first_page);
        Self::set_last_page(page, first_page);
    }

    pub fn name(page: &Page) -> String {
        let end = page.data[..MAX_FILE_NAME]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_FILE_NAME);
        String::from_utf8_lossy(&page.data[..end]).into_owned()
    }

    pub fn rec_cnt(page: &Page) -> u32 {
        u32::from_ne_bytes(page.data[32..36].try_into().unwrap())
    }

    pub fn set_rec_cnt(page: &mut Page, count: u32) {
        page.data[32..36].copy_from_slice(&count.to_ne_bytes());
    }

    pub fn page_cnt(page: &Page) -> u32 {
        u32::from_ne_bytes(page.data[36..40].try_into().unwrap())
    }

    pub fn set_page_cnt(page: &mut Page, count: u32) {
        page.data[36..40].copy_from_slice(&count.to_ne_bytes());
    }

    pub fn first_page(page: &Page) -> u32 {
        u32::from_ne_bytes(page.data[40..44].try_into().unwrap())
    }

    pub fn set_first_page(page: &mut Page, page_no: u32) {
        page.data[40..44].copy_from_slice(&page_no.to_ne_bytes());
    }

    pub fn last_page(page: &Page) -> u32 {
        u32::from_ne_bytes(page.data[44..48].try_into().unwrap())
    }

    pub fn set_last_page(page: &mut Page, page_no: u32) {
        page.data[44..48].copy_from_slice(&page_no.to_ne_bytes());
    }
}

/// The one data page a heap file keeps pinned as its cursor position.
pub(crate) struct CurrentPage {
    pub page_no: u32,
    pub page: PageRef,
    pub dirty: bool,
}

/// A heap file: a chain of data pages behind a header page, holding
/// unordered variable-length records addressed by RID.
///
/// The header page stays pinned for the lifetime of the handle; at most
/// one data page (the "current" page) is pinned besides it. Dropping the
/// handle unpins both and closes the file.
pub struct HeapFile {
    pub(crate) pool: Arc<Mutex<BufferPool>>,
    pub(crate) file_id: FileId,
    pub(crate) name: String,
    pub(crate) header_page_no: u32,
    pub(crate) header: PageRef,
    pub(crate) hdr_dirty: bool,
    pub(crate) cur: Option<CurrentPage>,
    pub(crate) cur_rec: Option<Rid>,
}

impl HeapFile {
    /// Open an existing heap file, pinning its header page and its first
    /// data page.
    pub fn open(pool: &Arc<Mutex<BufferPool>>, name: &str) -> Result<HeapFile> {
        debug!("opening heap file {name}");
        let mut guard = pool.lock().unwrap();
        let file_id = guard.open_file(name)?;

        let header_page_no = match guard.first_page(file_id) {
            Ok(page_no) => page_no,
            Err(err) => {
                let _ = guard.close_file(file_id);
                return Err(err);
            }
        };
        let header = match guard.read_page(file_id, header_page_no) {
            Ok(page) => page,
            Err(err) => {
                let _ = guard.close_file(file_id);
                return Err(err);
            }
        };

        let first_page = FileHeader::first_page(&header.read().unwrap());
        let cur_page = match guard.read_page(file_id, first_page) {
            Ok(page) => page,
            Err(err) => {
                let _ = guard.unpin_page(file_id, header_page_no, false);
                let _ = guard.close_file(file_id);
                return Err(err);
            }
        };
        drop(guard);

        Ok(HeapFile {
            pool: Arc::clone(pool),
            file_id,
            name: name.to_string(),
            header_page_no,
            header,
            hdr_dirty: false,
            cur: Some(CurrentPage {
                page_no: first_page,
                page: cur_page,
                dirty: false,
            }),
            cur_rec: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live records in the file.
    pub fn rec_cnt(&self) -> u32 {
        FileHeader::rec_cnt(&self.header.read().unwrap())
    }

    /// Fetch the record at `rid`, switching the current page if needed.
    /// The cursor is updated only on success.
    pub fn get_record(&mut self, rid: Rid) -> Result<Vec<u8>> {
        let on_page = self
            .cur
            .as_ref()
            .is_some_and(|cur| cur.page_no == rid.page_no);
        if !on_page {
            self.release_current()?;
            self.pin_current(rid.page_no)?;
        }

        let cur = self.cur.as_ref().unwrap();
        let rec = cur.page.read().unwrap().get_record(rid)?.to_vec();
        self.cur_rec = Some(rid);
        Ok(rec)
    }

    /// Unpin the current data page, if any, reporting its dirty state to
    /// the pool. The cursor page is gone afterwards even on error.
    pub(crate) fn release_current(&mut self) -> Result<()> {
        if let Some(cur) = self.cur.take() {
            self.pool
                .lock()
                .unwrap()
                .unpin_page(self.file_id, cur.page_no, cur.dirty)?;
        }
        Ok(())
    }

    /// Pin `page_no` as the new current page. The previous current page
    /// must already have been released.
    pub(crate) fn pin_current(&mut self, page_no: u32) -> Result<()> {
        debug_assert!(self.cur.is_none());
        let page = self.pool.lock().unwrap().read_page(self.file_id, page_no)?;
        self.cur = Some(CurrentPage {
            page_no,
            page,
            dirty: false,
        });
        Ok(())
    }

    pub(crate) fn first_data_page(&self) -> u32 {
        FileHeader::first_page(&self.header.read().unwrap())
    }

    pub(crate) fn last_data_page(&self) -> u32 {
        FileHeader::last_page(&self.header.read().unwrap())
    }

    /// Bookkeeping after a successful insert.
    pub(crate) fn record_added(&mut self) {
        let mut header = self.header.write().unwrap();
        let count = FileHeader::rec_cnt(&header);
        FileHeader::set_rec_cnt(&mut header, count + 1);
        drop(header);
        self.hdr_dirty = true;
    }

    /// Bookkeeping after a successful delete.
    pub(crate) fn record_removed(&mut self) {
        let mut header = self.header.write().unwrap();
        let count = FileHeader::rec_cnt(&header);
        FileHeader::set_rec_cnt(&mut header, count - 1);
        drop(header);
        self.hdr_dirty = true;
    }

    /// Bookkeeping after linking a fresh page onto the tail.
    pub(crate) fn tail_extended(&mut self, new_page_no: u32) {
        let mut header = self.header.write().unwrap();
        let pages = FileHeader::page_cnt(&header);
        FileHeader::set_page_cnt(&mut header, pages + 1);
        FileHeader::set_last_page(&mut header, new_page_no);
        drop(header);
        self.hdr_dirty = true;
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        if let Err(err) = self.release_current() {
            warn!("unpin of data page failed closing {}: {err}", self.name);
        }
        let mut pool = self.pool.lock().unwrap();
        if let Err(err) = pool.unpin_page(self.file_id, self.header_page_no, self.hdr_dirty) {
            warn!("unpin of header page failed closing {}: {err}", self.name);
        }
        if let Err(err) = pool.close_file(self.file_id) {
            warn!("close of heap file {} failed: {err}", self.name);
        }
    }
}

/// Create an empty heap file: a header page plus one empty data page.
pub fn create_heap_file(pool: &Arc<Mutex<BufferPool>>, name: &str) -> Result<()> {
    let mut guard = pool.lock().unwrap();
    if guard.file_exists(name) {
        return Err(DbError::FileExists(name.to_string()));
    }
    debug!("creating heap file {name}");

    guard.create_file(name)?;
    let file_id = guard.open_file(name)?;

    let (header_page_no, header_page) = guard.alloc_page(file_id)?;
    let (data_page_no, data_page) = guard.alloc_page(file_id)?;

    data_page.write().unwrap().init(data_page_no);
    FileHeader::init(&mut header_page.write().unwrap(), name, data_page_no);

    guard.unpin_page(file_id, header_page_no, true)?;
    guard.unpin_page(file_id, data_page_no, true)?;
    guard.close_file(file_id)
}

/// Remove a heap file from disk. The file must not be open.
pub fn destroy_heap_file(pool: &Arc<Mutex<BufferPool>>, name: &str) -> Result<()> {
    pool.lock().unwrap().destroy_file(name)
}
