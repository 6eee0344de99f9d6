use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::buffer::BufferPool;
use crate::error::{DbError, Result};
use crate::heap::{CurrentPage, HeapFile};
use crate::page::{Rid, MAX_RECORD_SIZE};

/// Attribute types the scan layer can compare. The numeric codes are
/// what the catalog stores on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Str,
    Int,
    Float,
}

impl AttrType {
    pub(crate) fn code(self) -> u32 {
        match self {
            AttrType::Str => 0,
            AttrType::Int => 1,
            AttrType::Float => 2,
        }
    }

    pub(crate) fn from_code(code: u32) -> Result<AttrType> {
        match code {
            0 => Ok(AttrType::Str),
            1 => Ok(AttrType::Int),
            2 => Ok(AttrType::Float),
            _ => Err(DbError::BadCatalogParam(format!(
                "unknown attribute type code {code}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Lt,
    Lte,
    Eq,
    Gte,
    Gt,
    Ne,
}

/// A predicate over one attribute: compare the `length` bytes at
/// `offset` in each record against `value`.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    pub offset: usize,
    pub length: usize,
    pub attr_type: AttrType,
    pub op: CompOp,
    pub value: Vec<u8>,
}

impl ScanFilter {
    pub fn int(offset: usize, op: CompOp, value: i32) -> ScanFilter {
        ScanFilter {
            offset,
            length: 4,
            attr_type: AttrType::Int,
            op,
            value: value.to_ne_bytes().to_vec(),
        }
    }

    pub fn float(offset: usize, op: CompOp, value: f32) -> ScanFilter {
        ScanFilter {
            offset,
            length: 4,
            attr_type: AttrType::Float,
            op,
            value: value.to_ne_bytes().to_vec(),
        }
    }

    /// String filter over a fixed-width field of `length` bytes.
    pub fn string(offset: usize, length: usize, op: CompOp, value: &str) -> ScanFilter {
        ScanFilter {
            offset,
            length,
            attr_type: AttrType::Str,
            op,
            value: value.as_bytes().to_vec(),
        }
    }
}

/// A cursor over a heap file returning records that match an optional
/// filter. Dropping the scan unpins its current page and closes the
/// file.
pub struct HeapFileScan {
    file: HeapFile,
    filter: Option<ScanFilter>,
    mark: Option<(u32, Option<Rid>)>,
}

impl HeapFileScan {
    pub fn open(pool: &Arc<Mutex<BufferPool>>, name: &str) -> Result<HeapFileScan> {
        Ok(HeapFileScan {
            file: HeapFile::open(pool, name)?,
            filter: None,
            mark: None,
        })
    }

    /// Configure the scan's predicate. `None` scans unconditionally.
    /// The scan continues from the file's current position; it does not
    /// rewind.
    pub fn start_scan(&mut self, filter: Option<ScanFilter>) -> Result<()> {
        let Some(mut filter) = filter else {
            self.filter = None;
            return Ok(());
        };

        if filter.length < 1 {
            return Err(DbError::BadScanParam(
                "filter length must be at least 1".to_string(),
            ));
        }
        match filter.attr_type {
            AttrType::Int | AttrType::Float => {
                if filter.length != 4 || filter.value.len() != 4 {
                    return Err(DbError::BadScanParam(
                        "numeric filters compare exactly 4 bytes".to_string(),
                    ));
                }
            }
            AttrType::Str => {
                if filter.value.len() > filter.length {
                    return Err(DbError::BadScanParam(
                        "string filter longer than the field it matches".to_string(),
                    ));
                }
                // fixed-width fields are zero padded; pad the filter the
                // same way so the comparison covers exactly `length` bytes
                filter.value.resize(filter.length, 0);
            }
        }

        self.filter = Some(filter);
        Ok(())
    }

    /// Advance to the next matching record. `Ok(None)` means the scan
    /// has run off the end of the file.
    pub fn scan_next(&mut self) -> Result<Option<Rid>> {
        loop {
            if self.file.cur.is_none() {
                // scan was ended; nothing more to produce
                return Ok(None);
            }

            // advance one record on the current page
            let mut next = {
                let cur = self.file.cur.as_ref().unwrap();
                let page = cur.page.read().unwrap();
                match self.file.cur_rec {
                    None => page.first_record(),
                    Some(rid) => page.next_record(rid),
                }
            };

            // crossed the end of the page: move along the chain until a
            // page yields a record (freshly inserted pages may be empty)
            while next.is_none() {
                let cur = self.file.cur.as_ref().unwrap();
                if self.file.last_data_page() == cur.page_no {
                    return Ok(None);
                }
                let next_page_no = cur.page.read().unwrap().next_page();
                match self.file.release_current() {
                    Ok(()) | Err(DbError::PageNotPinned { .. }) => {}
                    Err(err) => return Err(err),
                }
                self.file.pin_current(next_page_no)?;
                self.file.cur_rec = None;
                next = {
                    let cur = self.file.cur.as_ref().unwrap();
                    let page = cur.page.read().unwrap();
                    page.first_record()
                };
            }

            let rid = next.unwrap();
            self.file.cur_rec = Some(rid);
            let rec = {
                let cur = self.file.cur.as_ref().unwrap();
                let page = cur.page.read().unwrap();
                page.get_record(rid)?.to_vec()
            };
            if self.matches(&rec) {
                return Ok(Some(rid));
            }
        }
    }

    fn matches(&self, rec: &[u8]) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        if filter.offset + filter.length > rec.len() {
            return false;
        }
        let attr = &rec[filter.offset..filter.offset + filter.length];

        let ord = match filter.attr_type {
            AttrType::Str => attr.cmp(&filter.value[..]),
            AttrType::Int => {
                let attr = i32::from_ne_bytes(attr.try_into().unwrap());
                let value = i32::from_ne_bytes(filter.value[..4].try_into().unwrap());
                attr.cmp(&value)
            }
            AttrType::Float => {
                let attr = f32::from_ne_bytes(attr.try_into().unwrap());
                let value = f32::from_ne_bytes(filter.value[..4].try_into().unwrap());
                match attr.partial_cmp(&value) {
                    Some(ord) => ord,
                    // NaN compares with nothing, not even via Ne
                    None => return false,
                }
            }
        };

        match filter.op {
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Lte => ord != Ordering::Greater,
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Gte => ord != Ordering::Less,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Ne => ord != Ordering::Equal,
        }
    }

    /// The record the scan is positioned on (the one the last
    /// `scan_next` returned). Fails with `InvalidSlot` when the scan is
    /// not positioned on a record, including after `end_scan`.
    pub fn current_record(&self) -> Result<Vec<u8>> {
        let Some(cur) = self.file.cur.as_ref() else {
            // scan was ended; nothing is positioned
            return Err(DbError::InvalidSlot {
                page_no: 0,
                slot_no: 0,
            });
        };
        match self.file.cur_rec {
            Some(rid) => Ok(cur.page.read().unwrap().get_record(rid)?.to_vec()),
            None => Err(DbError::InvalidSlot {
                page_no: cur.page_no,
                slot_no: 0,
            }),
        }
    }

    /// Delete the record the scan is positioned on. The cursor stays
    /// put; the next `scan_next` continues with the record after it.
    /// Fails with `InvalidSlot` when the scan is not positioned on a
    /// record, including after `end_scan`.
    pub fn delete_record(&mut self) -> Result<()> {
        let Some(cur) = self.file.cur.as_mut() else {
            // scan was ended; nothing is positioned
            return Err(DbError::InvalidSlot {
                page_no: 0,
                slot_no: 0,
            });
        };
        let Some(rid) = self.file.cur_rec else {
            return Err(DbError::InvalidSlot {
                page_no: cur.page_no,
                slot_no: 0,
            });
        };
        cur.page.write().unwrap().delete_record(rid)?;
        cur.dirty = true;
        // only decremented once the page-level delete has succeeded
        self.file.record_removed();
        Ok(())
    }

    /// Snapshot the scan position for a later `reset_scan`. Once the
    /// scan has ended there is no position to snapshot; the call is a
    /// no-op and any earlier mark is kept.
    pub fn mark_scan(&mut self) {
        if let Some(cur) = self.file.cur.as_ref() {
            self.mark = Some((cur.page_no, self.file.cur_rec));
        }
    }

    /// Return to the last marked position. Without a mark this is a
    /// no-op.
    pub fn reset_scan(&mut self) -> Result<()> {
        let Some((page_no, rec)) = self.mark else {
            return Ok(());
        };
        let on_page = self
            .file
            .cur
            .as_ref()
            .is_some_and(|cur| cur.page_no == page_no);
        if !on_page {
            self.file.release_current()?;
            self.file.pin_current(page_no)?;
        }
        self.file.cur_rec = rec;
        Ok(())
    }

    /// Mark the scan's current page as modified.
    pub fn mark_dirty(&mut self) {
        if let Some(cur) = self.file.cur.as_mut() {
            cur.dirty = true;
        }
    }

    /// Unpin the scan's current page. Called automatically on drop.
    pub fn end_scan(&mut self) -> Result<()> {
        self.file.release_current()
    }

    pub fn rec_cnt(&self) -> u32 {
        self.file.rec_cnt()
    }
}

/// Append-only cursor over a heap file. Records always go to the tail
/// page; a fresh page is chained on when the tail fills up.
pub struct InsertFileScan {
    file: HeapFile,
}

impl InsertFileScan {
    pub fn open(pool: &Arc<Mutex<BufferPool>>, name: &str) -> Result<InsertFileScan> {
        Ok(InsertFileScan {
            file: HeapFile::open(pool, name)?,
        })
    }

    pub fn insert_record(&mut self, rec: &[u8]) -> Result<Rid> {
        if rec.len() > MAX_RECORD_SIZE {
            return Err(DbError::RecordTooLong {
                len: rec.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        // reposition onto the tail page
        match self.file.release_current() {
            Ok(()) | Err(DbError::PageNotPinned { .. }) => {}
            Err(err) => return Err(err),
        }
        let last = self.file.last_data_page();
        self.file.pin_current(last)?;

        let attempt = {
            let cur = self.file.cur.as_ref().expect("tail page is pinned");
            let mut page = cur.page.write().unwrap();
            page.insert_record(rec)
        };
        let rid = match attempt {
            Ok(rid) => rid,
            Err(DbError::PageFull) => self.extend_and_insert(rec)?,
            Err(err) => return Err(err),
        };

        self.file.cur.as_mut().expect("tail page is pinned").dirty = true;
        self.file.record_added();
        self.file.cur_rec = Some(rid);
        Ok(rid)
    }

    /// Chain a fresh page onto the tail and insert there. The size check
    /// in `insert_record` guarantees the record fits on an empty page.
    fn extend_and_insert(&mut self, rec: &[u8]) -> Result<Rid> {
        let (new_page_no, new_page) = self
            .file
            .pool
            .lock()
            .unwrap()
            .alloc_page(self.file.file_id)?;
        new_page.write().unwrap().init(new_page_no);

        {
            let cur = self.file.cur.as_mut().expect("tail page is pinned");
            cur.page.write().unwrap().set_next_page(new_page_no);
            // the link changed; the old tail must go back dirty
            cur.dirty = true;
        }
        self.file.release_current()?;
        self.file.cur = Some(CurrentPage {
            page_no: new_page_no,
            page: new_page,
            dirty: false,
        });

        let rid = {
            let cur = self.file.cur.as_ref().unwrap();
            let mut page = cur.page.write().unwrap();
            page.insert_record(rec)?
        };
        self.file.tail_extended(new_page_no);
        debug!(
            "extended heap file {} with page {new_page_no}",
            self.file.name
        );
        Ok(rid)
    }

    pub fn rec_cnt(&self) -> u32 {
        self.file.rec_cnt()
    }
}
