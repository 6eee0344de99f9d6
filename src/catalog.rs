use std::sync::{Arc, Mutex};

use log::info;

use crate::buffer::BufferPool;
use crate::error::{DbError, Result};
use crate::heap::{create_heap_file, destroy_heap_file, HeapFile};
use crate::scan::{AttrType, CompOp, HeapFileScan, InsertFileScan, ScanFilter};

pub const MAX_NAME: usize = 32;

pub const RELCAT_NAME: &str = "relcat";
pub const ATTRCAT_NAME: &str = "attrcat";

const REL_DESC_SIZE: usize = MAX_NAME + 4;
const ATTR_DESC_SIZE: usize = 2 * MAX_NAME + 12;

/// A relcat row: one per relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelDesc {
    pub rel_name: String,
    pub attr_cnt: u32,
}

// relcat record layout: relname[32] | attrcnt u32
impl RelDesc {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; REL_DESC_SIZE];
        pack_name(&mut buf[..MAX_NAME], &self.rel_name);
        buf[32..36].copy_from_slice(&self.attr_cnt.to_ne_bytes());
        buf
    }

    fn from_bytes(rec: &[u8]) -> Result<RelDesc> {
        if rec.len() != REL_DESC_SIZE {
            return Err(DbError::BadCatalogParam(format!(
                "malformed relcat record of {} bytes",
                rec.len()
            )));
        }
        Ok(RelDesc {
            rel_name: unpack_name(&rec[..MAX_NAME]),
            attr_cnt: u32::from_ne_bytes(rec[32..36].try_into().unwrap()),
        })
    }
}

/// An attrcat row: one per attribute of every relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrDesc {
    pub rel_name: String,
    pub attr_name: String,
    pub attr_offset: u32,
    pub attr_type: AttrType,
    pub attr_len: u32,
}

// attrcat record layout: relname[32] | attrname[32] | attroffset u32 |
// attrtype u32 | attrlen u32
impl AttrDesc {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; ATTR_DESC_SIZE];
        pack_name(&mut buf[..MAX_NAME], &self.rel_name);
        pack_name(&mut buf[32..64], &self.attr_name);
        buf[64..68].copy_from_slice(&self.attr_offset.to_ne_bytes());
        buf[68..72].copy_from_slice(&self.attr_type.code().to_ne_bytes());
        buf[72..76].copy_from_slice(&self.attr_len.to_ne_bytes());
        buf
    }

    fn from_bytes(rec: &[u8]) -> Result<AttrDesc> {
        if rec.len() != ATTR_DESC_SIZE {
            return Err(DbError::BadCatalogParam(format!(
                "malformed attrcat record of {} bytes",
                rec.len()
            )));
        }
        Ok(AttrDesc {
            rel_name: unpack_name(&rec[..MAX_NAME]),
            attr_name: unpack_name(&rec[32..64]),
            attr_offset: u32::from_ne_bytes(rec[64..68].try_into().unwrap()),
            attr_type: AttrType::from_code(u32::from_ne_bytes(rec[68..72].try_into().unwrap()))?,
            attr_len: u32::from_ne_bytes(rec[72..76].try_into().unwrap()),
        })
    }
}

/// Attribute definition supplied to `create_rel`.
#[derive(Debug, Clone)]
pub struct AttrDef {
    pub name: String,
    pub attr_type: AttrType,
    pub len: usize,
}

impl AttrDef {
    pub fn string(name: &str, len: usize) -> AttrDef {
        AttrDef {
            name: name.to_string(),
            attr_type: AttrType::Str,
            len,
        }
    }

    pub fn int(name: &str) -> AttrDef {
        AttrDef {
            name: name.to_string(),
            attr_type: AttrType::Int,
            len: 4,
        }
    }

    pub fn float(name: &str) -> AttrDef {
        AttrDef {
            name: name.to_string(),
            attr_type: AttrType::Float,
            len: 4,
        }
    }
}

fn pack_name(dst: &mut [u8], name: &str) {
    let bytes = name.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

fn unpack_name(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

/// The system catalog: two heap files, `relcat` and `attrcat`, each
/// described by its own rows. Both stay open for the lifetime of the
/// catalog handle (the attach lifetime).
pub struct Catalog {
    pool: Arc<Mutex<BufferPool>>,
    #[allow(dead_code)]
    relcat: HeapFile,
    #[allow(dead_code)]
    attrcat: HeapFile,
}

impl Catalog {
    /// Open the catalog, bootstrapping it on first attach.
    pub fn open(pool: &Arc<Mutex<BufferPool>>) -> Result<Catalog> {
        if !pool.lock().unwrap().file_exists(RELCAT_NAME) {
            Self::bootstrap(pool)?;
        }
        Ok(Catalog {
            pool: Arc::clone(pool),
            relcat: HeapFile::open(pool, RELCAT_NAME)?,
            attrcat: HeapFile::open(pool, ATTRCAT_NAME)?,
        })
    }

    /// Create both catalog files and self-install their schema rows.
    /// The layouts are hard coded; this is the only place schema
    /// knowledge exists outside the catalog itself.
    fn bootstrap(pool: &Arc<Mutex<BufferPool>>) -> Result<()> {
        info!("bootstrapping system catalog");
        create_heap_file(pool, RELCAT_NAME)?;
        create_heap_file(pool, ATTRCAT_NAME)?;

        let mut rels = InsertFileScan::open(pool, RELCAT_NAME)?;
        for (rel_name, attr_cnt) in [(RELCAT_NAME, 2), (ATTRCAT_NAME, 5)] {
            let desc = RelDesc {
                rel_name: rel_name.to_string(),
                attr_cnt,
            };
            rels.insert_record(&desc.to_bytes())?;
        }
        drop(rels);

        let mut attrs = InsertFileScan::open(pool, ATTRCAT_NAME)?;
        let schema = [
            (RELCAT_NAME, "relname", 0, AttrType::Str, MAX_NAME as u32),
            (RELCAT_NAME, "attrcnt", 32, AttrType::Int, 4),
            (ATTRCAT_NAME, "relname", 0, AttrType::Str, MAX_NAME as u32),
            (ATTRCAT_NAME, "attrname", 32, AttrType::Str, MAX_NAME as u32),
            (ATTRCAT_NAME, "attroffset", 64, AttrType::Int, 4),
            (ATTRCAT_NAME, "attrtype", 68, AttrType::Int, 4),
            (ATTRCAT_NAME, "attrlen", 72, AttrType::Int, 4),
        ];
        for (rel_name, attr_name, attr_offset, attr_type, attr_len) in schema {
            let desc = AttrDesc {
                rel_name: rel_name.to_string(),
                attr_name: attr_name.to_string(),
                attr_offset,
                attr_type,
                attr_len,
            };
            attrs.insert_record(&desc.to_bytes())?;
        }

        info!("system catalog ready ({RELCAT_NAME}, {ATTRCAT_NAME})");
        Ok(())
    }

    /// Look up a relation's relcat row.
    pub fn get_rel(&self, rel: &str) -> Result<RelDesc> {
        if rel.is_empty() {
            return Err(DbError::BadCatalogParam(
                "relation name is empty".to_string(),
            ));
        }
        if rel.len() >= MAX_NAME {
            // cannot be cataloged at all
            return Err(DbError::RelationNotFound(rel.to_string()));
        }

        let mut scan = HeapFileScan::open(&self.pool, RELCAT_NAME)?;
        scan.start_scan(Some(ScanFilter::string(0, MAX_NAME, CompOp::Eq, rel)))?;
        match scan.scan_next()? {
            Some(_rid) => RelDesc::from_bytes(&scan.current_record()?),
            None => Err(DbError::RelationNotFound(rel.to_string())),
        }
    }

    /// Insert a relcat row. Uniqueness is the caller's problem; see
    /// `create_rel`.
    fn add_rel(&self, desc: &RelDesc) -> Result<()> {
        let mut ifs = InsertFileScan::open(&self.pool, RELCAT_NAME)?;
        ifs.insert_record(&desc.to_bytes())?;
        Ok(())
    }

    /// Delete a relation's relcat row.
    fn remove_rel(&self, rel: &str) -> Result<()> {
        let mut scan = HeapFileScan::open(&self.pool, RELCAT_NAME)?;
        scan.start_scan(Some(ScanFilter::string(0, MAX_NAME, CompOp::Eq, rel)))?;
        match scan.scan_next()? {
            Some(_rid) => scan.delete_record(),
            None => Err(DbError::RelationNotFound(rel.to_string())),
        }
    }

    /// Look up one attribute of a relation.
    pub fn get_attr(&self, rel: &str, attr: &str) -> Result<AttrDesc> {
        if rel.is_empty() || attr.is_empty() {
            return Err(DbError::BadCatalogParam("empty name".to_string()));
        }

        let mut scan = HeapFileScan::open(&self.pool, ATTRCAT_NAME)?;
        scan.start_scan(Some(ScanFilter::string(0, MAX_NAME, CompOp::Eq, rel)))?;
        while scan.scan_next()?.is_some() {
            let desc = AttrDesc::from_bytes(&scan.current_record()?)?;
            if desc.attr_name == attr {
                return Ok(desc);
            }
        }
        Err(DbError::AttributeNotFound {
            rel: rel.to_string(),
            attr: attr.to_string(),
        })
    }

    fn add_attr(&self, desc: &AttrDesc) -> Result<()> {
        let mut ifs = InsertFileScan::open(&self.pool, ATTRCAT_NAME)?;
        ifs.insert_record(&desc.to_bytes())?;
        Ok(())
    }

    fn remove_attr(&self, rel: &str, attr: &str) -> Result<()> {
        let mut scan = HeapFileScan::open(&self.pool, ATTRCAT_NAME)?;
        scan.start_scan(Some(ScanFilter::string(0, MAX_NAME, CompOp::Eq, rel)))?;
        while scan.scan_next()?.is_some() {
            let desc = AttrDesc::from_bytes(&scan.current_record()?)?;
            if desc.attr_name == attr {
                return scan.delete_record();
            }
        }
        Err(DbError::AttributeNotFound {
            rel: rel.to_string(),
            attr: attr.to_string(),
        })
    }

    /// All attributes of a relation, in attrcat scan order (not
    /// necessarily schema order; consumers go by `attr_offset`).
    pub fn get_rel_attrs(&self, rel: &str) -> Result<Vec<AttrDesc>> {
        let rd = self.get_rel(rel)?;
        let mut attrs = Vec::with_capacity(rd.attr_cnt as usize);

        let mut scan = HeapFileScan::open(&self.pool, ATTRCAT_NAME)?;
        scan.start_scan(Some(ScanFilter::string(0, MAX_NAME, CompOp::Eq, rel)))?;
        while scan.scan_next()?.is_some() {
            attrs.push(AttrDesc::from_bytes(&scan.current_record()?)?);
        }
        Ok(attrs)
    }

    /// Create a relation: its relcat row, one attrcat row per attribute
    /// with cumulative offsets, and its heap file.
    pub fn create_rel(&self, rel: &str, attrs: &[AttrDef]) -> Result<()> {
        if rel.is_empty() || attrs.is_empty() {
            return Err(DbError::BadCatalogParam(
                "relation needs a name and at least one attribute".to_string(),
            ));
        }
        if rel.len() >= MAX_NAME {
            return Err(DbError::NameTooLong(rel.to_string()));
        }
        for (i, def) in attrs.iter().enumerate() {
            if def.name.is_empty() {
                return Err(DbError::BadCatalogParam(
                    "attribute name is empty".to_string(),
                ));
            }
            if def.name.len() >= MAX_NAME {
                return Err(DbError::NameTooLong(def.name.clone()));
            }
            if attrs[..i].iter().any(|other| other.name == def.name) {
                return Err(DbError::BadCatalogParam(format!(
                    "duplicate attribute {}",
                    def.name
                )));
            }
            match def.attr_type {
                AttrType::Int | AttrType::Float if def.len != 4 => {
                    return Err(DbError::BadCatalogParam(format!(
                        "numeric attribute {} must be 4 bytes",
                        def.name
                    )));
                }
                AttrType::Str if def.len < 1 => {
                    return Err(DbError::BadCatalogParam(format!(
                        "string attribute {} needs a length",
                        def.name
                    )));
                }
                _ => {}
            }
        }

        match self.get_rel(rel) {
            Ok(_) => return Err(DbError::RelationExists(rel.to_string())),
            Err(DbError::RelationNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        self.add_rel(&RelDesc {
            rel_name: rel.to_string(),
            attr_cnt: attrs.len() as u32,
        })?;

        let mut offset = 0u32;
        for def in attrs {
            self.add_attr(&AttrDesc {
                rel_name: rel.to_string(),
                attr_name: def.name.clone(),
                attr_offset: offset,
                attr_type: def.attr_type,
                attr_len: def.len as u32,
            })?;
            offset += def.len as u32;
        }

        create_heap_file(&self.pool, rel)?;
        info!("created relation {rel} with {} attributes", attrs.len());
        Ok(())
    }

    /// Drop a relation: its attrcat rows, its relcat row, and its heap
    /// file. The catalog relations themselves cannot be dropped.
    pub fn destroy_rel(&self, rel: &str) -> Result<()> {
        if rel.is_empty() || rel == RELCAT_NAME || rel == ATTRCAT_NAME {
            return Err(DbError::BadCatalogParam(format!("cannot destroy {rel:?}")));
        }

        let attrs = self.get_rel_attrs(rel)?;
        for desc in &attrs {
            self.remove_attr(rel, &desc.attr_name)?;
        }
        self.remove_rel(rel)?;
        destroy_heap_file(&self.pool, rel)?;
        info!("destroyed relation {rel}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FileManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Mutex<BufferPool>>, Catalog) {
        let dir = TempDir::new().unwrap();
        let files = FileManager::new(dir.path()).unwrap();
        let pool = Arc::new(Mutex::new(BufferPool::new(files, 16)));
        let catalog = Catalog::open(&pool).unwrap();
        (dir, pool, catalog)
    }

    fn emp_schema() -> Vec<AttrDef> {
        vec![AttrDef::string("name", 20), AttrDef::int("age")]
    }

    #[test]
    fn bootstrap_describes_itself() {
        let (_dir, _pool, catalog) = setup();

        assert_eq!(catalog.get_rel(RELCAT_NAME).unwrap().attr_cnt, 2);
        assert_eq!(catalog.get_rel(ATTRCAT_NAME).unwrap().attr_cnt, 5);

        let attr = catalog.get_attr(ATTRCAT_NAME, "attrtype").unwrap();
        assert_eq!(attr.attr_offset, 68);
        assert_eq!(attr.attr_type, AttrType::Int);
        assert_eq!(attr.attr_len, 4);
    }

    #[test]
    fn create_rel_catalogs_offsets_and_file() {
        let (_dir, pool, catalog) = setup();
        catalog.create_rel("emp", &emp_schema()).unwrap();

        assert_eq!(catalog.get_rel("emp").unwrap().attr_cnt, 2);

        let name = catalog.get_attr("emp", "name").unwrap();
        assert_eq!((name.attr_offset, name.attr_len), (0, 20));
        assert_eq!(name.attr_type, AttrType::Str);

        let age = catalog.get_attr("emp", "age").unwrap();
        assert_eq!((age.attr_offset, age.attr_len), (20, 4));
        assert_eq!(age.attr_type, AttrType::Int);

        let attrs = catalog.get_rel_attrs("emp").unwrap();
        assert_eq!(attrs.len(), 2);

        assert!(pool.lock().unwrap().file_exists("emp"));
    }

    #[test]
    fn duplicate_create_is_rejected_until_destroyed() {
        let (_dir, _pool, catalog) = setup();

        catalog.create_rel("emp", &emp_schema()).unwrap();
        assert!(matches!(
            catalog.create_rel("emp", &emp_schema()),
            Err(DbError::RelationExists(_))
        ));

        catalog.destroy_rel("emp").unwrap();
        catalog.create_rel("emp", &emp_schema()).unwrap();
    }

    #[test]
    fn destroy_rel_removes_every_trace() {
        let (_dir, pool, catalog) = setup();

        catalog.create_rel("emp", &emp_schema()).unwrap();
        catalog.destroy_rel("emp").unwrap();

        assert!(matches!(
            catalog.get_rel("emp"),
            Err(DbError::RelationNotFound(_))
        ));
        assert!(matches!(
            catalog.get_rel_attrs("emp"),
            Err(DbError::RelationNotFound(_))
        ));
        assert!(matches!(
            catalog.get_attr("emp", "age"),
            Err(DbError::AttributeNotFound { .. })
        ));
        assert!(!pool.lock().unwrap().file_exists("emp"));
    }

    #[test]
    fn catalog_relations_are_protected() {
        let (_dir, _pool, catalog) = setup();
        assert!(matches!(
            catalog.destroy_rel(RELCAT_NAME),
            Err(DbError::BadCatalogParam(_))
        ));
        assert!(matches!(
            catalog.destroy_rel(ATTRCAT_NAME),
            Err(DbError::BadCatalogParam(_))
        ));
    }

    #[test]
    fn create_rel_validates_its_input() {
        let (_dir, _pool, catalog) = setup();

        assert!(matches!(
            catalog.create_rel("", &emp_schema()),
            Err(DbError::BadCatalogParam(_))
        ));
        assert!(matches!(
            catalog.create_rel("emp", &[]),
            Err(DbError::BadCatalogParam(_))
        ));

        let long = "x".repeat(MAX_NAME);
        assert!(matches!(
            catalog.create_rel(&long, &emp_schema()),
            Err(DbError::NameTooLong(_))
        ));

        let bad_int = vec![AttrDef {
            name: "age".to_string(),
            attr_type: AttrType::Int,
            len: 2,
        }];
        assert!(matches!(
            catalog.create_rel("emp", &bad_int),
            Err(DbError::BadCatalogParam(_))
        ));

        let dup = vec![AttrDef::int("a"), AttrDef::int("a")];
        assert!(matches!(
            catalog.create_rel("emp", &dup),
            Err(DbError::BadCatalogParam(_))
        ));
    }

    #[test]
    fn catalog_survives_reattach() {
        let dir = TempDir::new().unwrap();
        {
            let files = FileManager::new(dir.path()).unwrap();
            let pool = Arc::new(Mutex::new(BufferPool::new(files, 16)));
            let catalog = Catalog::open(&pool).unwrap();
            catalog.create_rel("emp", &emp_schema()).unwrap();
        }

        let files = FileManager::new(dir.path()).unwrap();
        let pool = Arc::new(Mutex::new(BufferPool::new(files, 16)));
        let catalog = Catalog::open(&pool).unwrap();
        assert_eq!(catalog.get_rel("emp").unwrap().attr_cnt, 2);
        assert_eq!(catalog.get_attr("emp", "age").unwrap().attr_offset, 20);
    }
}
