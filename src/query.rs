use std::sync::{Arc, Mutex};

use log::debug;

use crate::buffer::BufferPool;
use crate::catalog::{AttrDesc, Catalog};
use crate::error::{DbError, Result};
use crate::page::Rid;
use crate::scan::{AttrType, CompOp, HeapFileScan, InsertFileScan, ScanFilter};

/// A textual predicate on one attribute, as a query front end would
/// produce it. The attribute's type and location come from the catalog.
#[derive(Debug, Clone, Copy)]
pub struct Filter<'a> {
    pub attr: &'a str,
    pub op: CompOp,
    pub value: &'a str,
}

/// Insert one record built from `(attribute, value)` pairs. Values are
/// textual; numeric attributes are parsed. Every schema attribute must
/// be supplied exactly once; placement is by catalog offset, so the
/// pairs may come in any order.
pub fn insert(
    pool: &Arc<Mutex<BufferPool>>,
    catalog: &Catalog,
    rel: &str,
    values: &[(&str, &str)],
) -> Result<Rid> {
    let attrs = catalog.get_rel_attrs(rel)?;
    if attrs.len() != values.len() {
        return Err(DbError::SchemaMismatch {
            expected: attrs.len(),
            given: values.len(),
        });
    }

    let rec_len: usize = attrs.iter().map(|desc| desc.attr_len as usize).sum();
    let mut rec = vec![0u8; rec_len];
    for desc in &attrs {
        let (_, text) = values
            .iter()
            .find(|(name, _)| *name == desc.attr_name)
            .ok_or_else(|| DbError::AttributeNotFound {
                rel: rel.to_string(),
                attr: desc.attr_name.clone(),
            })?;
        let start = desc.attr_offset as usize;
        let end = start + desc.attr_len as usize;
        encode_value(desc, text, &mut rec[start..end])?;
    }

    let mut ifs = InsertFileScan::open(pool, rel)?;
    ifs.insert_record(&rec)
}

/// Delete every record matching the filter (all records if `None`).
/// Returns how many were removed.
pub fn delete(
    pool: &Arc<Mutex<BufferPool>>,
    catalog: &Catalog,
    rel: &str,
    filter: Option<Filter<'_>>,
) -> Result<usize> {
    let scan_filter = match filter {
        Some(filter) => Some(build_filter(catalog, rel, filter)?),
        None => None,
    };

    let mut scan = HeapFileScan::open(pool, rel)?;
    scan.start_scan(scan_filter)?;

    let mut deleted = 0;
    while scan.scan_next()?.is_some() {
        scan.delete_record()?;
        deleted += 1;
    }
    debug!("deleted {deleted} records from {rel}");
    Ok(deleted)
}

/// Project matching records of `rel` into the existing relation
/// `result`, rendering each attribute back to text and re-inserting.
/// Returns how many records were selected.
pub fn select(
    pool: &Arc<Mutex<BufferPool>>,
    catalog: &Catalog,
    result: &str,
    rel: &str,
    projections: &[&str],
    filter: Option<Filter<'_>>,
) -> Result<usize> {
    if projections.is_empty() {
        return Err(DbError::BadCatalogParam(
            "select needs at least one projection".to_string(),
        ));
    }
    let mut proj_descs = Vec::with_capacity(projections.len());
    for name in projections {
        proj_descs.push(catalog.get_attr(rel, name)?);
    }
    let scan_filter = match filter {
        Some(filter) => Some(build_filter(catalog, rel, filter)?),
        None => None,
    };

    let mut scan = HeapFileScan::open(pool, rel)?;
    scan.start_scan(scan_filter)?;

    let mut selected = 0;
    while scan.scan_next()?.is_some() {
        let rec = scan.current_record()?;
        let rendered: Vec<(String, String)> = proj_descs
            .iter()
            .map(|desc| Ok((desc.attr_name.clone(), render_value(desc, &rec)?)))
            .collect::<Result<_>>()?;
        let values: Vec<(&str, &str)> = rendered
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        insert(pool, catalog, result, &values)?;
        selected += 1;
    }
    debug!("selected {selected} records from {rel} into {result}");
    Ok(selected)
}

/// Resolve a textual filter against the catalog into a binary scan
/// predicate.
fn build_filter(catalog: &Catalog, rel: &str, filter: Filter<'_>) -> Result<ScanFilter> {
    let desc = catalog.get_attr(rel, filter.attr)?;
    let offset = desc.attr_offset as usize;
    Ok(match desc.attr_type {
        AttrType::Str => ScanFilter::string(offset, desc.attr_len as usize, filter.op, filter.value),
        AttrType::Int => ScanFilter::int(offset, filter.op, parse_int(filter.value)?),
        AttrType::Float => ScanFilter::float(offset, filter.op, parse_float(filter.value)?),
    })
}

fn parse_int(text: &str) -> Result<i32> {
    text.trim()
        .parse()
        .map_err(|_| DbError::BadValue(format!("{text:?} is not an integer")))
}

fn parse_float(text: &str) -> Result<f32> {
    text.trim()
        .parse()
        .map_err(|_| DbError::BadValue(format!("{text:?} is not a number")))
}

/// Write one attribute value into its slot of a record buffer. String
/// values are truncated to the attribute width; the buffer's zero fill
/// provides the padding.
fn encode_value(desc: &AttrDesc, text: &str, dst: &mut [u8]) -> Result<()> {
    match desc.attr_type {
        AttrType::Str => {
            let bytes = text.as_bytes();
            let n = bytes.len().min(dst.len());
            dst[..n].copy_from_slice(&bytes[..n]);
        }
        AttrType::Int => dst.copy_from_slice(&parse_int(text)?.to_ne_bytes()),
        AttrType::Float => dst.copy_from_slice(&parse_float(text)?.to_ne_bytes()),
    }
    Ok(())
}

/// Render one attribute of a record back to text.
fn render_value(desc: &AttrDesc, rec: &[u8]) -> Result<String> {
    let start = desc.attr_offset as usize;
    let end = start + desc.attr_len as usize;
    if end > rec.len() {
        return Err(DbError::BadValue(format!(
            "record of {} bytes is shorter than attribute {}",
            rec.len(),
            desc.attr_name
        )));
    }
    let attr = &rec[start..end];

    Ok(match desc.attr_type {
        AttrType::Str => {
            let len = attr.iter().position(|&b| b == 0).unwrap_or(attr.len());
            String::from_utf8_lossy(&attr[..len]).into_owned()
        }
        AttrType::Int => i32::from_ne_bytes(attr.try_into().unwrap()).to_string(),
        AttrType::Float => f32::from_ne_bytes(attr.try_into().unwrap()).to_string(),
    })
}
