//! Plain form-schema value exchanged with external collaborators.
//!
//! This is the domain boundary: form creation, duplication, export and
//! response-field-change detection all consume `FormSchema`. The CRDT tree is
//! an implementation detail behind [`crate::codec`].
//!
//! Parsing is tolerant by design: legacy and partial field shapes deserialize
//! with defaults substituted instead of failing, since a partial schema view
//! is safer than a crashed caller.

use serde::{Deserialize, Serialize};

/// Wire value of the rich-text field discriminator.
pub const RICH_TEXT_KIND: &str = "RICH_TEXT";

/// A complete form definition: ordered pages plus scalar layout properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSchema {
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub is_shuffle_enabled: bool,
}

/// One page of a form.
///
/// `order` is a rendering hint; the position inside `FormSchema::pages` is
/// authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// A form field: either static rich-text content or a fillable input.
///
/// The discriminator is the wire `type` property; `RICH_TEXT` selects the
/// rich-text variant, every other kind is fillable. The conversion goes
/// through [`RawField`] so that partial shapes never fail to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawField", into = "RawField")]
pub enum Field {
    RichText { id: String, content: String },
    Fillable(FillableField),
}

impl Field {
    /// The field's unique id within the document.
    pub fn id(&self) -> &str {
        match self {
            Field::RichText { id, .. } => id,
            Field::Fillable(f) => &f.id,
        }
    }

    /// The wire `type` discriminator.
    pub fn kind(&self) -> &str {
        match self {
            Field::RichText { .. } => RICH_TEXT_KIND,
            Field::Fillable(f) => &f.kind,
        }
    }
}

/// A fillable input field (short text, choice, date, number, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillableField {
    pub id: String,
    /// Wire `type`, e.g. `SHORT_TEXT`, `MULTIPLE_CHOICE`, `DATE`.
    pub kind: String,
    pub label: String,
    pub default_value: Option<String>,
    pub prefix: Option<String>,
    pub hint: Option<String>,
    pub validation: Validation,
    pub options: Vec<FieldOption>,
    pub multiple: Option<bool>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_date: Option<String>,
    pub max_date: Option<String>,
}

/// Validation constraints attached to a fillable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_selections: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_selections: Option<u32>,
}

/// One selectable option of a choice field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOption {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

/// Scalar layout properties of a form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spacing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_background_color: Option<String>,
    #[serde(
        rename = "customCTAButtonName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_cta_button_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_image_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_mode: Option<String>,
    #[serde(default)]
    pub is_custom_background_color_enabled: bool,
}

/// Loosely-typed field shape used on the wire.
///
/// Every property is optional so legacy documents parse; `From<RawField>`
/// is the single place field kinds are told apart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawField {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_date: Option<String>,
}

impl From<RawField> for Field {
    fn from(raw: RawField) -> Self {
        if raw.kind == RICH_TEXT_KIND {
            Field::RichText {
                id: raw.id,
                content: raw.content.unwrap_or_default(),
            }
        } else {
            Field::Fillable(FillableField {
                id: raw.id,
                kind: raw.kind,
                label: raw.label.unwrap_or_default(),
                default_value: raw.default_value,
                prefix: raw.prefix,
                hint: raw.hint,
                validation: raw.validation.unwrap_or_default(),
                options: raw.options.unwrap_or_default(),
                multiple: raw.multiple,
                min: raw.min,
                max: raw.max,
                min_date: raw.min_date,
                max_date: raw.max_date,
            })
        }
    }
}

impl From<Field> for RawField {
    fn from(field: Field) -> Self {
        match field {
            Field::RichText { id, content } => RawField {
                id,
                kind: RICH_TEXT_KIND.to_string(),
                content: Some(content),
                ..RawField::default()
            },
            Field::Fillable(f) => RawField {
                id: f.id,
                kind: f.kind,
                content: None,
                label: Some(f.label),
                default_value: f.default_value,
                prefix: f.prefix,
                hint: f.hint,
                validation: Some(f.validation),
                options: Some(f.options),
                multiple: f.multiple,
                min: f.min,
                max: f.max,
                min_date: f.min_date,
                max_date: f.max_date,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rich_text_field_roundtrip() {
        let field = Field::RichText {
            id: "f1".into(),
            content: "<p>Welcome</p>".into(),
        };
        let json = serde_json::to_string(&field).unwrap();
        assert!(json.contains("\"type\":\"RICH_TEXT\""));

        let parsed: Field = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, field);
    }

    #[test]
    fn test_fillable_field_roundtrip() {
        let field = Field::Fillable(FillableField {
            id: "f2".into(),
            kind: "SHORT_TEXT".into(),
            label: "Your name".into(),
            validation: Validation {
                required: true,
                max_length: Some(80),
                ..Validation::default()
            },
            ..FillableField::default()
        });
        let json = serde_json::to_string(&field).unwrap();
        let parsed: Field = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, field);
    }

    #[test]
    fn test_partial_field_gets_defaults() {
        // Legacy shape: only id and type, nothing else
        let json = r#"{"id":"f3","type":"EMAIL"}"#;
        let parsed: Field = serde_json::from_str(json).unwrap();

        match parsed {
            Field::Fillable(f) => {
                assert_eq!(f.kind, "EMAIL");
                assert_eq!(f.label, "");
                assert!(!f.validation.required);
                assert!(f.options.is_empty());
            }
            other => panic!("Expected fillable field, got {:?}", other),
        }
    }

    #[test]
    fn test_rich_text_without_content_defaults_empty() {
        let json = r#"{"id":"f4","type":"RICH_TEXT"}"#;
        let parsed: Field = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed,
            Field::RichText {
                id: "f4".into(),
                content: String::new()
            }
        );
    }

    #[test]
    fn test_layout_cta_wire_name() {
        let layout = Layout {
            custom_cta_button_name: Some("Send".into()),
            ..Layout::default()
        };
        let json = serde_json::to_string(&layout).unwrap();
        assert!(json.contains("\"customCTAButtonName\":\"Send\""));
    }

    #[test]
    fn test_schema_defaults_from_empty_object() {
        let schema: FormSchema = serde_json::from_str("{}").unwrap();
        assert!(schema.pages.is_empty());
        assert!(!schema.is_shuffle_enabled);
        assert_eq!(schema.layout, Layout::default());
    }
}
