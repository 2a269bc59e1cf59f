//! Bidirectional mapping between the CRDT tree and the plain form schema.
//!
//! `from_schema` seeds the tree for a brand-new or duplicated document;
//! `to_schema` reconstructs the plain value and never fails: legacy or
//! partial node shapes get defaults substituted so a partial schema view is
//! returned instead of an error.

use crate::replica::FormReplica;
use crate::schema::{Field, FormSchema, Layout, Page, RawField};
use loro::{Container, LoroMap, LoroMovableList, LoroValue, ValueOrContainer};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Loro error: {0}")]
    Loro(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Title given to the page seeded into a never-initialized document.
pub const FIRST_PAGE_TITLE: &str = "Page 1";

/// Build the initial tree contents for a brand-new or duplicated document.
pub fn from_schema(schema: &FormSchema) -> Result<FormReplica> {
    let replica = FormReplica::new();

    let pages = replica.pages();
    for (index, page) in schema.pages.iter().enumerate() {
        write_page(&pages, index, page)?;
    }

    let layout = replica.layout();
    write_layout(&layout, &schema.layout)?;

    replica
        .settings()
        .insert("isShuffleEnabled", schema.is_shuffle_enabled)
        .map_err(|e| CodecError::Loro(e.to_string()))?;

    replica.commit();
    Ok(replica)
}

/// Seed the tree for a document with no prior state.
///
/// A single empty page with a generated id is created rather than an empty
/// page list, so the editor always has a writable starting point.
pub fn seed_empty() -> Result<FormReplica> {
    from_schema(&FormSchema {
        pages: vec![Page {
            id: Uuid::new_v4().to_string(),
            title: FIRST_PAGE_TITLE.to_string(),
            order: 0,
            fields: Vec::new(),
        }],
        ..FormSchema::default()
    })
}

/// Reconstruct the plain schema value from the live tree.
///
/// Malformed page or field nodes are skipped, missing optional properties
/// default; this function does not fail on legacy shapes.
pub fn to_schema(replica: &FormReplica) -> FormSchema {
    let root = loro_value_to_json(&replica.deep_value());

    let pages = root
        .get("pages")
        .and_then(|v| v.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| match serde_json::from_value::<Page>(entry.clone()) {
                    Ok(page) => Some(page),
                    Err(e) => {
                        debug!("Skipping malformed page node: {}", e);
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let layout = root
        .get("layout")
        .and_then(|v| serde_json::from_value::<Layout>(v.clone()).ok())
        .unwrap_or_default();

    let is_shuffle_enabled = root
        .get("settings")
        .and_then(|s| s.get("isShuffleEnabled"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    FormSchema {
        pages,
        layout,
        is_shuffle_enabled,
    }
}

/// Append a page to the end of the page list.
pub fn append_page(replica: &FormReplica, page: &Page) -> Result<()> {
    let pages = replica.pages();
    write_page(&pages, pages.len(), page)?;
    replica.commit();
    Ok(())
}

/// Append a field to the page with the given id.
///
/// Returns false if no such page exists.
pub fn append_field(replica: &FormReplica, page_id: &str, field: &Field) -> Result<bool> {
    let pages = replica.pages();
    let Some(page) = find_page(&pages, page_id) else {
        return Ok(false);
    };
    let fields = fields_list(&page)?;
    let slot = fields
        .insert_container(fields.len(), LoroMap::new())
        .map_err(|e| CodecError::Loro(e.to_string()))?;
    write_field(&slot, field)?;
    replica.commit();
    Ok(true)
}

/// Overwrite the label of the field with the given id.
///
/// Returns false if no such field exists.
pub fn set_field_label(replica: &FormReplica, field_id: &str, label: &str) -> Result<bool> {
    let Some((_, _, field)) = find_field(&replica.pages(), field_id)? else {
        return Ok(false);
    };
    field
        .insert("label", label)
        .map_err(|e| CodecError::Loro(e.to_string()))?;
    replica.commit();
    Ok(true)
}

/// Remove the field with the given id from its page.
///
/// Returns false if no such field exists.
pub fn remove_field(replica: &FormReplica, field_id: &str) -> Result<bool> {
    let Some((fields, index, _)) = find_field(&replica.pages(), field_id)? else {
        return Ok(false);
    };
    fields
        .delete(index, 1)
        .map_err(|e| CodecError::Loro(e.to_string()))?;
    replica.commit();
    Ok(true)
}

fn write_page(pages: &LoroMovableList, index: usize, page: &Page) -> Result<()> {
    let map = pages
        .insert_container(index, LoroMap::new())
        .map_err(|e| CodecError::Loro(e.to_string()))?;
    map.insert("id", page.id.as_str())
        .map_err(|e| CodecError::Loro(e.to_string()))?;
    map.insert("title", page.title.as_str())
        .map_err(|e| CodecError::Loro(e.to_string()))?;
    map.insert("order", page.order)
        .map_err(|e| CodecError::Loro(e.to_string()))?;

    let fields = map
        .insert_container("fields", LoroMovableList::new())
        .map_err(|e| CodecError::Loro(e.to_string()))?;
    for (field_index, field) in page.fields.iter().enumerate() {
        let slot = fields
            .insert_container(field_index, LoroMap::new())
            .map_err(|e| CodecError::Loro(e.to_string()))?;
        write_field(&slot, field)?;
    }
    Ok(())
}

/// Write one field into its map node.
///
/// This is the single match point over field kinds: a new field variant must
/// be handled here and nowhere else.
fn write_field(map: &LoroMap, field: &Field) -> Result<()> {
    let raw = RawField::from(field.clone());
    let value =
        serde_json::to_value(&raw).map_err(|e| CodecError::Serialization(e.to_string()))?;
    let Some(entries) = value.as_object() else {
        return Ok(());
    };
    for (key, entry) in entries {
        map.insert(key, entry.clone())
            .map_err(|e| CodecError::Loro(e.to_string()))?;
    }
    Ok(())
}

fn write_layout(map: &LoroMap, layout: &Layout) -> Result<()> {
    let value =
        serde_json::to_value(layout).map_err(|e| CodecError::Serialization(e.to_string()))?;
    let Some(entries) = value.as_object() else {
        return Ok(());
    };
    for (key, entry) in entries {
        map.insert(key, entry.clone())
            .map_err(|e| CodecError::Loro(e.to_string()))?;
    }
    Ok(())
}

fn find_page(pages: &LoroMovableList, page_id: &str) -> Option<LoroMap> {
    for index in 0..pages.len() {
        if let Some(ValueOrContainer::Container(Container::Map(page))) = pages.get(index) {
            if map_string(&page, "id").as_deref() == Some(page_id) {
                return Some(page);
            }
        }
    }
    None
}

fn find_field(
    pages: &LoroMovableList,
    field_id: &str,
) -> Result<Option<(LoroMovableList, usize, LoroMap)>> {
    for page_index in 0..pages.len() {
        let Some(ValueOrContainer::Container(Container::Map(page))) = pages.get(page_index)
        else {
            continue;
        };
        let fields = fields_list(&page)?;
        for index in 0..fields.len() {
            if let Some(ValueOrContainer::Container(Container::Map(field))) = fields.get(index) {
                if map_string(&field, "id").as_deref() == Some(field_id) {
                    return Ok(Some((fields, index, field)));
                }
            }
        }
    }
    Ok(None)
}

fn fields_list(page: &LoroMap) -> Result<LoroMovableList> {
    match page.get("fields") {
        Some(ValueOrContainer::Container(Container::MovableList(list))) => Ok(list),
        // Legacy page without a fields container: create one
        _ => page
            .insert_container("fields", LoroMovableList::new())
            .map_err(|e| CodecError::Loro(e.to_string())),
    }
}

fn map_string(map: &LoroMap, key: &str) -> Option<String> {
    match map.get(key) {
        Some(ValueOrContainer::Value(LoroValue::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

/// Convert a LoroValue to serde_json::Value for decoding and comparison.
fn loro_value_to_json(value: &LoroValue) -> serde_json::Value {
    match value {
        LoroValue::Null => serde_json::Value::Null,
        LoroValue::Bool(b) => serde_json::Value::Bool(*b),
        LoroValue::I64(n) => serde_json::json!(*n),
        LoroValue::Double(n) => serde_json::json!(*n),
        LoroValue::String(s) => serde_json::Value::String(s.to_string()),
        LoroValue::List(arr) => {
            serde_json::Value::Array(arr.iter().map(loro_value_to_json).collect())
        }
        LoroValue::Map(map) => {
            let obj: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), loro_value_to_json(v)))
                .collect();
            serde_json::Value::Object(obj)
        }
        // Binary and unresolved container references have no schema meaning
        _ => serde_json::Value::Null,
    }
}
