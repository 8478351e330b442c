//! Index schema: key columns and INCLUDE payload columns.
//!
//! A schema describes the shape of every tuple the index stores: one or two
//! key columns (fixed-width, or right-padded binary-collation text) and up
//! to sixteen INCLUDE payload columns. Widths are validated here once so the
//! codec and the build pipeline can trust them.

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::types::{
    FIXED_WIDTHS, MAX_INCLUDE_COLUMNS, MAX_KEY_COLUMNS, MAX_TEXT_KEY_WIDTH, TEXT_KEY_WIDTHS,
};

/// Collation for text key columns. Only byte-order compare is supported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collation {
    /// Plain byte-order comparison
    Binary,
    /// A locale-aware collation, named. Rejected at schema creation.
    Locale(String),
}

/// Kind of a key column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyKind {
    /// Fixed-width byte value (byval integers, MAC-like IDs, timestamps, UUIDs)
    Fixed,
    /// Right-padded text, compared byte-wise
    Text,
}

/// A single key column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyColumn {
    /// Storage width in bytes
    pub width: usize,
    /// Fixed-width or padded text
    pub kind: KeyKind,
}

impl KeyColumn {
    /// A fixed-width key column; width must be one of {1, 2, 4, 6, 8, 16}
    pub fn fixed(width: usize) -> Result<Self> {
        if !FIXED_WIDTHS.contains(&width) {
            return Err(IndexError::unsupported(format!(
                "fixed key width {} (allowed: {:?})",
                width, FIXED_WIDTHS
            )));
        }
        Ok(Self {
            width,
            kind: KeyKind::Fixed,
        })
    }

    /// A text key column; width must be one of {8, 16, 32}
    pub fn text(width: usize, collation: Collation) -> Result<Self> {
        if let Collation::Locale(name) = collation {
            return Err(IndexError::NonBinaryCollation(name));
        }
        if width > MAX_TEXT_KEY_WIDTH {
            return Err(IndexError::KeyTooWide {
                width,
                max: MAX_TEXT_KEY_WIDTH,
            });
        }
        if !TEXT_KEY_WIDTHS.contains(&width) {
            return Err(IndexError::unsupported(format!(
                "text key width {} (allowed: {:?})",
                width, TEXT_KEY_WIDTHS
            )));
        }
        Ok(Self {
            width,
            kind: KeyKind::Text,
        })
    }
}

/// An INCLUDE payload column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludeColumn {
    /// Fixed storage width, or `None` for variable-length text
    pub width: Option<usize>,
}

impl IncludeColumn {
    /// A fixed-width payload column; width must be one of {1, 2, 4, 6, 8, 16}
    pub fn fixed(width: usize) -> Result<Self> {
        if !FIXED_WIDTHS.contains(&width) {
            return Err(IndexError::unsupported(format!(
                "INCLUDE column width {} (allowed: {:?})",
                width, FIXED_WIDTHS
            )));
        }
        Ok(Self { width: Some(width) })
    }

    /// A variable-length text payload column
    pub fn text() -> Self {
        Self { width: None }
    }

    /// Whether this column is variable-length
    pub fn is_varlen(&self) -> bool {
        self.width.is_none()
    }
}

/// Full tuple schema for one index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    key_columns: Vec<KeyColumn>,
    include_columns: Vec<IncludeColumn>,
}

impl Schema {
    /// Create a schema, validating column counts and widths
    pub fn new(key_columns: Vec<KeyColumn>, include_columns: Vec<IncludeColumn>) -> Result<Self> {
        if key_columns.is_empty() || key_columns.len() > MAX_KEY_COLUMNS {
            return Err(IndexError::TooManyKeyColumns {
                count: key_columns.len(),
                max: MAX_KEY_COLUMNS,
            });
        }
        if include_columns.len() > MAX_INCLUDE_COLUMNS {
            return Err(IndexError::TooManyIncludeColumns {
                count: include_columns.len(),
                max: MAX_INCLUDE_COLUMNS,
            });
        }
        Ok(Self {
            key_columns,
            include_columns,
        })
    }

    /// Single fixed-width key, no payload
    pub fn single_key(width: usize) -> Result<Self> {
        Self::new(vec![KeyColumn::fixed(width)?], Vec::new())
    }

    /// Key columns in order
    pub fn key_columns(&self) -> &[KeyColumn] {
        &self.key_columns
    }

    /// INCLUDE columns in order
    pub fn include_columns(&self) -> &[IncludeColumn] {
        &self.include_columns
    }

    /// Total key width (two-key indexes concatenate both widths)
    pub fn key_width(&self) -> usize {
        self.key_columns.iter().map(|c| c.width).sum()
    }

    /// Number of INCLUDE columns
    pub fn include_count(&self) -> usize {
        self.include_columns.len()
    }

    /// Whether any payload column is variable-length
    pub fn has_varlen_payload(&self) -> bool {
        self.include_columns.iter().any(|c| c.is_varlen())
    }

    /// Total payload width when all columns are fixed, else `None`
    pub fn fixed_payload_width(&self) -> Option<usize> {
        self.include_columns
            .iter()
            .map(|c| c.width)
            .sum::<Option<usize>>()
    }

    /// Whether any key column is text
    pub fn has_text_key(&self) -> bool {
        self.key_columns.iter().any(|c| c.kind == KeyKind::Text)
    }

    /// Schema fingerprint stored in every page header.
    ///
    /// Derived from the canonical column encoding so a page can be checked
    /// against the schema the embedder supplies at open.
    pub fn fingerprint(&self) -> u16 {
        let mut canon = Vec::with_capacity(2 + 2 * self.key_columns.len() + self.include_columns.len());
        canon.push(self.key_columns.len() as u8);
        for k in &self.key_columns {
            canon.push(k.width as u8);
            canon.push(matches!(k.kind, KeyKind::Text) as u8);
        }
        canon.push(self.include_columns.len() as u8);
        for c in &self.include_columns {
            canon.push(c.width.map_or(0xFF, |w| w as u8));
        }
        (crc32fast::hash(&canon) & 0xFFFF) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_validation() {
        assert!(Schema::single_key(4).is_ok());
        assert!(KeyColumn::fixed(3).is_err());
        assert!(KeyColumn::text(16, Collation::Binary).is_ok());
        assert!(matches!(
            KeyColumn::text(16, Collation::Locale("en_US".into())),
            Err(IndexError::NonBinaryCollation(_))
        ));
        assert!(matches!(
            KeyColumn::text(64, Collation::Binary),
            Err(IndexError::KeyTooWide { .. })
        ));
    }

    #[test]
    fn test_column_count_limits() {
        let three_keys = vec![
            KeyColumn::fixed(4).unwrap(),
            KeyColumn::fixed(4).unwrap(),
            KeyColumn::fixed(4).unwrap(),
        ];
        assert!(matches!(
            Schema::new(three_keys, Vec::new()),
            Err(IndexError::TooManyKeyColumns { count: 3, .. })
        ));

        let includes: Vec<_> = (0..17).map(|_| IncludeColumn::fixed(4).unwrap()).collect();
        assert!(matches!(
            Schema::new(vec![KeyColumn::fixed(4).unwrap()], includes),
            Err(IndexError::TooManyIncludeColumns { count: 17, .. })
        ));
    }

    #[test]
    fn test_widths() {
        let schema = Schema::new(
            vec![KeyColumn::fixed(4).unwrap(), KeyColumn::fixed(2).unwrap()],
            vec![IncludeColumn::fixed(8).unwrap(), IncludeColumn::text()],
        )
        .unwrap();

        assert_eq!(schema.key_width(), 6);
        assert!(schema.has_varlen_payload());
        assert_eq!(schema.fixed_payload_width(), None);

        let fixed = Schema::new(
            vec![KeyColumn::fixed(4).unwrap()],
            vec![IncludeColumn::fixed(8).unwrap(), IncludeColumn::fixed(2).unwrap()],
        )
        .unwrap();
        assert_eq!(fixed.fixed_payload_width(), Some(10));
    }

    #[test]
    fn test_fingerprint_distinguishes_schemas() {
        let a = Schema::single_key(4).unwrap();
        let b = Schema::single_key(8).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), Schema::single_key(4).unwrap().fingerprint());
    }
}
