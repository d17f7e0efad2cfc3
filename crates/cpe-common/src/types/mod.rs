//! Row types shared by the pipeline and every storage backend

use serde::{Deserialize, Serialize};

use crate::cpe::{Attribute, WellFormedName};
use crate::error::Result;

/// Schema version tag written into every row
pub const SCHEMA_VERSION: &str = "2.3";

/// Name of the table every backend writes to
pub const TABLE_NAME: &str = "items";

/// Column order shared by all backends
pub const COLUMNS: [&str; 14] = [
    "schema_version",
    "title",
    "category",
    "vendor",
    "product",
    "version",
    "update",
    "edition",
    "language",
    "sw_edition",
    "target_sw",
    "target_hw",
    "other",
    "references",
];

/// A (kind, link) annotation attached to a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Free-text description, e.g. "Vendor" or "Change Log"
    pub kind: String,
    /// Target URL, stored as found
    pub link: String,
}

impl Reference {
    pub fn new(kind: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            link: link.into(),
        }
    }
}

/// Storage-ready row for one catalog entry
///
/// Built once from a decoded name and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub schema_version: String,
    pub title: String,
    pub category: String,
    pub vendor: String,
    pub product: String,
    pub version: String,
    pub update: String,
    pub edition: String,
    pub language: String,
    pub sw_edition: String,
    pub target_sw: String,
    pub target_hw: String,
    pub other: String,
    pub references: Vec<Reference>,
}

impl NormalizedRow {
    pub fn new(title: String, name: &WellFormedName, references: Vec<Reference>) -> Self {
        let attr = |a: Attribute| name.get_string(a).to_string();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            title,
            category: attr(Attribute::Part),
            vendor: attr(Attribute::Vendor),
            product: attr(Attribute::Product),
            version: attr(Attribute::Version),
            update: attr(Attribute::Update),
            edition: attr(Attribute::Edition),
            language: attr(Attribute::Language),
            sw_edition: attr(Attribute::SwEdition),
            target_sw: attr(Attribute::TargetSw),
            target_hw: attr(Attribute::TargetHw),
            other: attr(Attribute::Other),
            references,
        }
    }

    /// The eleven decoded attributes in column order
    pub fn attributes(&self) -> [&str; 11] {
        [
            self.category.as_str(),
            self.vendor.as_str(),
            self.product.as_str(),
            self.version.as_str(),
            self.update.as_str(),
            self.edition.as_str(),
            self.language.as_str(),
            self.sw_edition.as_str(),
            self.target_sw.as_str(),
            self.target_hw.as_str(),
            self.other.as_str(),
        ]
    }

    /// Serialized form of the `references` column
    pub fn references_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.references)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cpe::ANY;

    #[test]
    fn test_row_from_name() {
        let name: WellFormedName = "cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*".parse().unwrap();
        let row = NormalizedRow::new(
            "Acme Widget 1.0".to_string(),
            &name,
            vec![Reference::new("Vendor", "https://acme.example")],
        );

        assert_eq!(row.schema_version, SCHEMA_VERSION);
        assert_eq!(row.category, "a");
        assert_eq!(row.vendor, "acme");
        assert_eq!(row.product, "widget");
        assert_eq!(row.version, "1.0");
        assert!(row.attributes()[4..].iter().all(|v| *v == ANY));
    }

    #[test]
    fn test_references_json_shape() {
        let name: WellFormedName = "cpe:2.3:o:acme:os".parse().unwrap();
        let row = NormalizedRow::new(
            "Acme OS".to_string(),
            &name,
            vec![
                Reference::new("Vendor", "https://acme.example"),
                Reference::new("Change Log", "https://acme.example/changes"),
            ],
        );

        assert_eq!(
            row.references_json().unwrap(),
            r#"[{"kind":"Vendor","link":"https://acme.example"},{"kind":"Change Log","link":"https://acme.example/changes"}]"#
        );
    }

    #[test]
    fn test_empty_references_serialize_as_array() {
        let name: WellFormedName = "cpe:2.3:h:acme".parse().unwrap();
        let row = NormalizedRow::new(String::new(), &name, Vec::new());
        assert_eq!(row.references_json().unwrap(), "[]");
    }
}
