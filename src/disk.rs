use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::debug;

use crate::error::{DbError, Result};
use crate::page::PAGE_SIZE;

/// Stable identity of an open file. All opens of the same file share one
/// id (and one refcounted handle), so the buffer pool can key frames on
/// `(FileId, page_no)`.
pub type FileId = u64;

struct OpenFile {
    name: String,
    file: File,
    page_count: u32,
    ref_count: u32,
}

/// Paged files under a base directory, one file per heap file.
///
/// Pages are `PAGE_SIZE` blocks numbered from 0; `allocate_page` extends
/// the file by one zeroed page. Disposed pages are not reclaimed.
pub struct FileManager {
    base: PathBuf,
    open: IndexMap<FileId, OpenFile>,
    ids: HashMap<String, FileId>,
    next_id: FileId,
}

impl FileManager {
    pub fn new(base: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(base.as_ref())?;
        Ok(FileManager {
            base: base.as_ref().to_path_buf(),
            open: IndexMap::new(),
            ids: HashMap::new(),
            next_id: 0,
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }

    fn entry_mut(&mut self, file_id: FileId) -> Result<&mut OpenFile> {
        self.open
            .get_mut(&file_id)
            .ok_or_else(|| DbError::FileNotFound(format!("file id {file_id}")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    /// Number of outstanding opens of this file.
    pub fn ref_count(&self, file_id: FileId) -> u32 {
        self.open.get(&file_id).map_or(0, |f| f.ref_count)
    }

    pub fn create_file(&mut self, name: &str) -> Result<()> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path(name))
        {
            Ok(_) => {
                debug!("created file {name}");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(DbError::FileExists(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn open_file(&mut self, name: &str) -> Result<FileId> {
        if let Some(&file_id) = self.ids.get(name) {
            self.entry_mut(file_id)?.ref_count += 1;
            return Ok(file_id);
        }

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.path(name))
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(DbError::FileNotFound(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        let page_count = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        let file_id = self.next_id;
        self.next_id += 1;
        self.open.insert(
            file_id,
            OpenFile {
                name: name.to_string(),
                file,
                page_count,
                ref_count: 1,
            },
        );
        self.ids.insert(name.to_string(), file_id);
        debug!("opened file {name} as id {file_id} ({page_count} pages)");
        Ok(file_id)
    }

    pub fn close_file(&mut self, file_id: FileId) -> Result<()> {
        let entry = self.entry_mut(file_id)?;
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            let entry = self.open.swap_remove(&file_id).unwrap();
            self.ids.remove(&entry.name);
            debug!("closed file {} (id {file_id})", entry.name);
        }
        Ok(())
    }

    pub fn destroy_file(&mut self, name: &str) -> Result<()> {
        if self.is_open(name) {
            return Err(DbError::FileOpen(name.to_string()));
        }
        match fs::remove_file(self.path(name)) {
            Ok(()) => {
                debug!("destroyed file {name}");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(DbError::FileNotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Extend the file by one zeroed page and return its number.
    pub fn allocate_page(&mut self, file_id: FileId) -> Result<u32> {
        let entry = self.entry_mut(file_id)?;
        let page_no = entry.page_count;
        entry.page_count += 1;
        let zero = [0u8; PAGE_SIZE];
        Self::write_at(&mut entry.file, page_no, &zero)?;
        Ok(page_no)
    }

    pub fn read_page(&mut self, file_id: FileId, page_no: u32, buf: &mut [u8]) -> Result<()> {
        let entry = self.entry_mut(file_id)?;
        if page_no >= entry.page_count {
            return Err(out_of_range(&entry.name, page_no).into());
        }
        entry
            .file
            .seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))?;
        entry.file.read_exact(&mut buf[..PAGE_SIZE])?;
        Ok(())
    }

    pub fn write_page(&mut self, file_id: FileId, page_no: u32, buf: &[u8]) -> Result<()> {
        let entry = self.entry_mut(file_id)?;
        if page_no >= entry.page_count {
            return Err(out_of_range(&entry.name, page_no).into());
        }
        Self::write_at(&mut entry.file, page_no, buf)
    }

    /// Drop a page from the file's logical contents. The space is not
    /// reclaimed; the page simply becomes unreachable garbage.
    pub fn dispose_page(&mut self, file_id: FileId, page_no: u32) -> Result<()> {
        let entry = self.entry_mut(file_id)?;
        if page_no >= entry.page_count {
            return Err(out_of_range(&entry.name, page_no).into());
        }
        Ok(())
    }

    /// The first page ever allocated in the file (its header page).
    pub fn first_page(&self, file_id: FileId) -> Result<u32> {
        let entry = self
            .open
            .get(&file_id)
            .ok_or_else(|| DbError::FileNotFound(format!("file id {file_id}")))?;
        if entry.page_count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file {} has no pages", entry.name),
            )
            .into());
        }
        Ok(0)
    }

    fn write_at(file: &mut File, page_no: u32, buf: &[u8]) -> Result<()> {
        file.seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))?;
        file.write_all(&buf[..PAGE_SIZE])?;
        file.sync_all()?;
        Ok(())
    }
}

fn out_of_range(name: &str, page_no: u32) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("page {page_no} is beyond the end of file {name}"),
    )
}
