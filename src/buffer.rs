use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, error, trace};

use crate::disk::{FileId, FileManager};
use crate::error::{DbError, Result};
use crate::page::Page;

/// Shared handle to a buffered page. Holding one of these is only valid
/// while the caller also holds a pin on the page; after the last unpin
/// the frame may be recycled for a different page at any time.
pub type PageRef = Arc<RwLock<Page>>;

type PageKey = (FileId, u32);

struct Frame {
    page: PageRef,
    /// Identity of the buffered page; `None` for an empty frame.
    key: Option<PageKey>,
    pin_count: u32,
    dirty: bool,
    /// Clock reference bit, set on every access.
    referenced: bool,
}

impl Frame {
    fn new() -> Self {
        Frame {
            page: Arc::new(RwLock::new(Page::zeroed())),
            key: None,
            pin_count: 0,
            dirty: false,
            referenced: false,
        }
    }

    /// Take ownership of a freshly loaded page.
    fn set(&mut self, key: PageKey) {
        self.key = Some(key);
        self.pin_count = 1;
        self.dirty = false;
        self.referenced = true;
    }

    fn clear(&mut self) {
        self.key = None;
        self.pin_count = 0;
        self.dirty = false;
        self.referenced = false;
    }
}

/// Fixed-size pool of page frames with clock replacement.
///
/// The pool owns the file manager; all file and page I/O in the engine
/// goes through here. Every `read_page`/`alloc_page` pins the page and
/// must be paired with exactly one `unpin_page`.
pub struct BufferPool {
    frames: Vec<Frame>,
    frame_table: HashMap<PageKey, usize>,
    files: FileManager,
    clock_hand: usize,
}

impl BufferPool {
    pub fn new(files: FileManager, pool_size: usize) -> Self {
        assert!(pool_size > 0);
        BufferPool {
            frames: (0..pool_size).map(|_| Frame::new()).collect(),
            frame_table: HashMap::with_capacity(pool_size),
            files,
            // start one short of frame 0 so the first advance lands there
            clock_hand: pool_size - 1,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Pin count of a buffered page, `None` if the page is not resident.
    pub fn pin_count(&self, file_id: FileId, page_no: u32) -> Option<u32> {
        self.frame_table
            .get(&(file_id, page_no))
            .map(|&idx| self.frames[idx].pin_count)
    }

    /// Find a frame to load a page into, evicting if necessary.
    ///
    /// Clock sweep: empty frames are taken immediately; a referenced
    /// frame loses its bit and gets a second chance; an unreferenced,
    /// unpinned frame is the victim (written back first if dirty). The
    /// sweep gives up once a whole round saw only pinned frames, or
    /// after more than two full revolutions without progress.
    fn allocate_frame(&mut self) -> Result<usize> {
        let start = self.clock_hand;
        let mut round = 0;
        let mut pinned_this_round = 0;

        loop {
            if self.clock_hand == start {
                round += 1;
                pinned_this_round = 0;
            }
            self.clock_hand = (self.clock_hand + 1) % self.frames.len();

            let hand = self.clock_hand;
            let frame = &mut self.frames[hand];
            match frame.key {
                None => return Ok(hand),
                Some(key) => {
                    if frame.referenced {
                        frame.referenced = false;
                        if frame.pin_count > 0 {
                            pinned_this_round += 1;
                        }
                    } else if frame.pin_count > 0 {
                        pinned_this_round += 1;
                    } else {
                        if frame.dirty {
                            debug!(
                                "evicting dirty page {} of file {} from frame {hand}",
                                key.1, key.0
                            );
                            let guard = frame.page.read().unwrap();
                            self.files.write_page(key.0, key.1, &guard.data)?;
                        } else {
                            trace!("evicting page {} of file {} from frame {hand}", key.1, key.0);
                        }
                        if self.frame_table.remove(&key).is_none() {
                            return Err(DbError::FrameTableCorrupt);
                        }
                        self.frames[hand].clear();
                        return Ok(hand);
                    }
                }
            }

            if pinned_this_round == self.frames.len()
                || (self.clock_hand == start && round > 2)
            {
                return Err(DbError::BufferExceeded);
            }
        }
    }

    /// Fetch a page, pinning it. A page already resident is pinned again
    /// and its reference bit set; otherwise a frame is allocated and the
    /// page read from disk.
    pub fn read_page(&mut self, file_id: FileId, page_no: u32) -> Result<PageRef> {
        let key = (file_id, page_no);
        if let Some(&idx) = self.frame_table.get(&key) {
            let frame = &mut self.frames[idx];
            frame.pin_count += 1;
            frame.referenced = true;
            return Ok(Arc::clone(&frame.page));
        }

        let idx = self.allocate_frame()?;
        trace!("reading page {page_no} of file {file_id} into frame {idx}");
        {
            let frame = &mut self.frames[idx];
            let mut page = frame.page.write().unwrap();
            self.files.read_page(file_id, page_no, &mut page.data)?;
        }
        if self.frame_table.insert(key, idx).is_some() {
            return Err(DbError::FrameTableCorrupt);
        }
        self.frames[idx].set(key);
        Ok(Arc::clone(&self.frames[idx].page))
    }

    /// Allocate a fresh page in the file and pin it. The page's contents
    /// are zeroed but not formatted; the caller is expected to `init` it.
    pub fn alloc_page(&mut self, file_id: FileId) -> Result<(u32, PageRef)> {
        let page_no = self.files.allocate_page(file_id)?;
        let idx = self.allocate_frame()?;
        trace!("allocated page {page_no} of file {file_id} in frame {idx}");
        self.frames[idx].page.write().unwrap().data.fill(0);

        let key = (file_id, page_no);
        if self.frame_table.insert(key, idx).is_some() {
            return Err(DbError::FrameTableCorrupt);
        }
        self.frames[idx].set(key);
        Ok((page_no, Arc::clone(&self.frames[idx].page)))
    }

    pub fn unpin_page(&mut self, file_id: FileId, page_no: u32, dirty: bool) -> Result<()> {
        let key = (file_id, page_no);
        let Some(&idx) = self.frame_table.get(&key) else {
            return Err(DbError::PageNotCached { file_id, page_no });
        };
        let frame = &mut self.frames[idx];
        if frame.pin_count == 0 {
            return Err(DbError::PageNotPinned { file_id, page_no });
        }
        frame.pin_count -= 1;
        if dirty {
            frame.dirty = true;
        }
        Ok(())
    }

    /// Drop a page from the pool (if buffered) and from the file.
    pub fn dispose_page(&mut self, file_id: FileId, page_no: u32) -> Result<()> {
        if let Some(idx) = self.frame_table.remove(&(file_id, page_no)) {
            self.frames[idx].clear();
        }
        self.files.dispose_page(file_id, page_no)
    }

    /// Write back and drop every frame belonging to the file. Fails with
    /// `PagePinned` if any of them is still pinned.
    pub fn flush_file(&mut self, file_id: FileId) -> Result<()> {
        for idx in 0..self.frames.len() {
            let frame = &mut self.frames[idx];
            let Some(key) = frame.key else { continue };
            if key.0 != file_id {
                continue;
            }
            if frame.pin_count > 0 {
                return Err(DbError::PagePinned {
                    file_id,
                    page_no: key.1,
                });
            }
            if frame.dirty {
                debug!("flushing page {} of file {file_id}", key.1);
                let guard = frame.page.read().unwrap();
                self.files.write_page(key.0, key.1, &guard.data)?;
                drop(guard);
                frame.dirty = false;
            }
            if self.frame_table.remove(&key).is_none() {
                return Err(DbError::FrameTableCorrupt);
            }
            self.frames[idx].clear();
        }
        Ok(())
    }

    /// Write back every dirty frame in the pool, leaving pages resident.
    pub fn flush_all(&mut self) -> Result<()> {
        for idx in 0..self.frames.len() {
            let frame = &mut self.frames[idx];
            let Some(key) = frame.key else { continue };
            if frame.dirty {
                let guard = frame.page.read().unwrap();
                self.files.write_page(key.0, key.1, &guard.data)?;
                drop(guard);
                frame.dirty = false;
            }
        }
        Ok(())
    }

    // --- file operations, fronted so that all I/O flows through the pool ---

    pub fn create_file(&mut self, name: &str) -> Result<()> {
        self.files.create_file(name)
    }

    pub fn open_file(&mut self, name: &str) -> Result<FileId> {
        self.files.open_file(name)
    }

    /// Close one handle on the file. The last close flushes the file's
    /// pages out of the pool first, so a closed file is never stale on
    /// disk and leaves nothing behind in the pool.
    pub fn close_file(&mut self, file_id: FileId) -> Result<()> {
        if self.files.ref_count(file_id) == 1 {
            self.flush_file(file_id)?;
        }
        self.files.close_file(file_id)
    }

    pub fn destroy_file(&mut self, name: &str) -> Result<()> {
        self.files.destroy_file(name)
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.files.exists(name)
    }

    pub fn first_page(&self, file_id: FileId) -> Result<u32> {
        self.files.first_page(file_id)
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        for idx in 0..self.frames.len() {
            let frame = &mut self.frames[idx];
            let Some(key) = frame.key else { continue };
            if frame.dirty {
                let guard = frame.page.read().unwrap();
                if let Err(err) = self.files.write_page(key.0, key.1, &guard.data) {
                    error!(
                        "writeback of page {} of file {} failed during teardown: {err}",
                        key.1, key.0
                    );
                }
            }
        }
    }
}
