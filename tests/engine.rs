//! End-to-end scenarios exercising the engine through its public
//! surface: pool, heap files, scans, catalog, and query operations.

use std::sync::{Arc, Mutex};

use heapdb::{
    create_heap_file, AttrDef, BufferPool, CompOp, Database, DbError, FileManager, Filter,
    HeapFile, HeapFileScan, InsertFileScan, MAX_RECORD_SIZE,
};
use tempfile::TempDir;

fn raw_pool(pool_size: usize) -> (TempDir, Arc<Mutex<BufferPool>>) {
    let dir = TempDir::new().unwrap();
    let files = FileManager::new(dir.path()).unwrap();
    let pool = Arc::new(Mutex::new(BufferPool::new(files, pool_size)));
    (dir, pool)
}

fn keyed(key: i32) -> Vec<u8> {
    key.to_ne_bytes().to_vec()
}

fn key_of(rec: &[u8]) -> i32 {
    i32::from_ne_bytes(rec[..4].try_into().unwrap())
}

// Scenario: a pool of three frames accepts three pinned pages, refuses a
// fourth, and recovers as soon as one page is unpinned.
#[test]
fn pool_exhaustion_and_recovery() {
    let (_dir, pool) = raw_pool(3);
    let mut pool = pool.lock().unwrap();
    pool.create_file("t").unwrap();
    let f = pool.open_file("t").unwrap();

    let first = pool.alloc_page(f).unwrap().0;
    let _second = pool.alloc_page(f).unwrap().0;
    let _third = pool.alloc_page(f).unwrap().0;

    assert!(matches!(pool.alloc_page(f), Err(DbError::BufferExceeded)));

    pool.unpin_page(f, first, false).unwrap();
    pool.alloc_page(f).unwrap();

    // the unpinned page was the one evicted
    assert_eq!(pool.pin_count(f, first), None);
}

// Scenario: create a relation, insert a tuple through the textual query
// surface, select it into a result relation, and read it back.
#[test]
fn insert_then_select_into_result_relation() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path(), 16).unwrap();

    let schema = vec![AttrDef::string("name", 20), AttrDef::int("age")];
    db.create_relation("emp", &schema).unwrap();
    db.create_relation("out", &schema).unwrap();

    db.insert("emp", &[("name", "Ada"), ("age", "36")]).unwrap();

    let n = db
        .select(
            "out",
            "emp",
            &["name", "age"],
            Some(Filter {
                attr: "age",
                op: CompOp::Gt,
                value: "30",
            }),
        )
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(db.record_count("out").unwrap(), 1);

    // the single result tuple renders back as ("Ada", "36")
    let db_pool = db.pool();
    let mut scan = HeapFileScan::open(db_pool, "out").unwrap();
    scan.start_scan(None).unwrap();
    assert!(scan.scan_next().unwrap().is_some());
    let rec = scan.current_record().unwrap();
    assert_eq!(&rec[..3], b"Ada");
    assert_eq!(i32::from_ne_bytes(rec[20..24].try_into().unwrap()), 36);
    assert!(scan.scan_next().unwrap().is_none());
}

// Scenario: ten thousand tuples, a mark placed mid-scan, the scan run
// ahead, and the reset resuming exactly after the marked tuple.
#[test]
fn mark_and_reset_across_a_large_scan() {
    let (_dir, pool) = raw_pool(16);
    create_heap_file(&pool, "t").unwrap();

    let mut ifs = InsertFileScan::open(&pool, "t").unwrap();
    for key in 1..=10_000 {
        ifs.insert_record(&keyed(key)).unwrap();
    }
    assert_eq!(ifs.rec_cnt(), 10_000);
    drop(ifs);

    let mut scan = HeapFileScan::open(&pool, "t").unwrap();
    scan.start_scan(None).unwrap();

    for _ in 0..5_000 {
        scan.scan_next().unwrap().unwrap();
    }
    assert_eq!(key_of(&scan.current_record().unwrap()), 5_000);
    scan.mark_scan();

    for _ in 0..2_500 {
        scan.scan_next().unwrap().unwrap();
    }
    assert_eq!(key_of(&scan.current_record().unwrap()), 7_500);

    scan.reset_scan().unwrap();
    scan.scan_next().unwrap().unwrap();
    assert_eq!(key_of(&scan.current_record().unwrap()), 5_001);
}

// Scenario: re-creating an existing relation fails until it has been
// destroyed.
#[test]
fn create_destroy_create_cycle() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path(), 16).unwrap();
    let schema = vec![AttrDef::string("name", 20), AttrDef::int("age")];

    db.create_relation("emp", &schema).unwrap();
    assert!(matches!(
        db.create_relation("emp", &schema),
        Err(DbError::RelationExists(_))
    ));

    db.destroy_relation("emp").unwrap();
    db.create_relation("emp", &schema).unwrap();
}

// Scenario: with a two-frame pool, two dirty unpinned pages must both be
// written back when eviction claims their frames.
#[test]
fn dirty_writeback_under_eviction_pressure() {
    let (_dir, pool) = raw_pool(2);
    let mut pool = pool.lock().unwrap();
    pool.create_file("t").unwrap();
    let f = pool.open_file("t").unwrap();

    // four pages on disk, nothing pinned
    for _ in 0..4 {
        let (page_no, _page) = pool.alloc_page(f).unwrap();
        pool.unpin_page(f, page_no, false).unwrap();
    }

    // dirty pages 0 and 1 in the pool
    for page_no in [0u32, 1] {
        let page = pool.read_page(f, page_no).unwrap();
        page.write().unwrap().data[..4].copy_from_slice(&(page_no + 100).to_ne_bytes());
        pool.unpin_page(f, page_no, true).unwrap();
    }

    // reading two unrelated pages forces both dirty pages out
    for page_no in [2u32, 3] {
        let _page = pool.read_page(f, page_no).unwrap();
        pool.unpin_page(f, page_no, false).unwrap();
    }
    assert_eq!(pool.pin_count(f, 0), None);
    assert_eq!(pool.pin_count(f, 1), None);

    // both images must have reached disk
    for page_no in [0u32, 1] {
        let page = pool.read_page(f, page_no).unwrap();
        let got = u32::from_ne_bytes(page.read().unwrap().data[..4].try_into().unwrap());
        assert_eq!(got, page_no + 100);
        pool.unpin_page(f, page_no, false).unwrap();
    }
}

// Scenario: a predicate delete removes exactly the matching tuples, the
// record count drops accordingly, and a follow-up select finds none.
#[test]
fn predicate_delete_then_verify_empty() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path(), 16).unwrap();
    let schema = vec![AttrDef::string("name", 20), AttrDef::int("age")];
    db.create_relation("emp", &schema).unwrap();

    let ages = [12, 25, 17, 40, 9, 33];
    for (i, age) in ages.iter().enumerate() {
        let name = format!("p{i}");
        let age = age.to_string();
        db.insert("emp", &[("name", &name), ("age", &age)]).unwrap();
    }

    let minors = Filter {
        attr: "age",
        op: CompOp::Lt,
        value: "18",
    };
    let removed = db.delete("emp", Some(minors)).unwrap();
    assert_eq!(removed, 3);
    assert_eq!(db.record_count("emp").unwrap(), 3);

    db.create_relation("check", &schema).unwrap();
    let still_minor = db
        .select("check", "emp", &["name", "age"], Some(minors))
        .unwrap();
    assert_eq!(still_minor, 0);
    assert_eq!(db.record_count("check").unwrap(), 0);
}

// Byte-identical round trip: what goes in through a heap file comes back
// out through the buffer pool, eviction or not.
#[test]
fn record_round_trip_is_byte_identical() {
    let (_dir, pool) = raw_pool(4);
    create_heap_file(&pool, "t").unwrap();

    let payload: Vec<u8> = (0..200u32).map(|i| (i * 7 % 251) as u8).collect();
    let rid = {
        let mut ifs = InsertFileScan::open(&pool, "t").unwrap();
        ifs.insert_record(&payload).unwrap()
    };

    let mut file = HeapFile::open(&pool, "t").unwrap();
    assert_eq!(file.get_record(rid).unwrap(), payload);
    assert_eq!(file.rec_cnt(), 1);
}

// A record sized exactly to the page's capacity fits; one byte more is
// rejected before touching any page.
#[test]
fn max_record_boundary() {
    let (_dir, pool) = raw_pool(4);
    create_heap_file(&pool, "t").unwrap();

    let mut ifs = InsertFileScan::open(&pool, "t").unwrap();
    ifs.insert_record(&vec![0x11u8; MAX_RECORD_SIZE]).unwrap();
    assert!(matches!(
        ifs.insert_record(&vec![0x11u8; MAX_RECORD_SIZE + 1]),
        Err(DbError::RecordTooLong { .. })
    ));
    assert_eq!(ifs.rec_cnt(), 1);
}
