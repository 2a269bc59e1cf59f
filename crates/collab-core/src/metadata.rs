//! Cheap aggregate metadata derived from a form's live tree.
//!
//! Derived, rebuilt from the replica after a quiet period; never the source
//! of truth. Exposed to listing/dashboard reads.

use crate::schema::FormSchema;
use serde::{Deserialize, Serialize};

/// Aggregate summary of one document's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormMetadata {
    pub form_id: String,
    pub page_count: usize,
    pub field_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_image_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_image_url: Option<String>,
    /// Milliseconds since Unix epoch.
    pub last_updated: u64,
}

impl FormMetadata {
    /// Extract the summary from a decoded schema value.
    ///
    /// `background_image_url` is derived by joining the asset base URL with
    /// the stored key when both are present.
    pub fn extract(
        form_id: &str,
        schema: &FormSchema,
        asset_base_url: Option<&str>,
        now_ms: u64,
    ) -> Self {
        let background_image_key = schema.layout.background_image_key.clone();
        let background_image_url = match (&background_image_key, asset_base_url) {
            (Some(key), Some(base)) => Some(format!("{}/{}", base.trim_end_matches('/'), key)),
            _ => None,
        };

        Self {
            form_id: form_id.to_string(),
            page_count: schema.pages.len(),
            field_count: schema.pages.iter().map(|p| p.fields.len()).sum(),
            background_image_key,
            background_image_url,
            last_updated: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FillableField, Layout, Page};

    fn page_with_fields(id: &str, count: usize) -> Page {
        Page {
            id: id.into(),
            title: id.into(),
            order: 0,
            fields: (0..count)
                .map(|i| {
                    Field::Fillable(FillableField {
                        id: format!("{id}-f{i}"),
                        kind: "SHORT_TEXT".into(),
                        ..FillableField::default()
                    })
                })
                .collect(),
        }
    }

    #[test]
    fn test_extract_counts() {
        let schema = FormSchema {
            pages: vec![
                page_with_fields("p1", 2),
                page_with_fields("p2", 4),
                page_with_fields("p3", 1),
            ],
            ..FormSchema::default()
        };

        let meta = FormMetadata::extract("form-1", &schema, None, 1234);
        assert_eq!(meta.page_count, 3);
        assert_eq!(meta.field_count, 7);
        assert_eq!(meta.last_updated, 1234);
        assert!(meta.background_image_key.is_none());
        assert!(meta.background_image_url.is_none());
    }

    #[test]
    fn test_extract_derives_background_url() {
        let schema = FormSchema {
            layout: Layout {
                background_image_key: Some("bg/42.png".into()),
                ..Layout::default()
            },
            ..FormSchema::default()
        };

        let meta = FormMetadata::extract("form-1", &schema, Some("https://assets.test/"), 0);
        assert_eq!(meta.background_image_key.as_deref(), Some("bg/42.png"));
        assert_eq!(
            meta.background_image_url.as_deref(),
            Some("https://assets.test/bg/42.png")
        );
    }

    #[test]
    fn test_extract_without_base_url_omits_url() {
        let schema = FormSchema {
            layout: Layout {
                background_image_key: Some("bg/42.png".into()),
                ..Layout::default()
            },
            ..FormSchema::default()
        };

        let meta = FormMetadata::extract("form-1", &schema, None, 0);
        assert!(meta.background_image_url.is_none());
    }
}
