//! Canonical type system and declared-type affinity.
//!
//! Remote SQLite-family engines report column types as free-form declaration
//! strings ("INTEGER", "VARCHAR(20)", "", or nothing at all). All of the
//! stringy typing assumptions live here: declarations map onto a closed set of
//! canonical types following SQLite's type-affinity rules, and everything
//! downstream only sees [`DataType`].

use serde::{Deserialize, Serialize};

/// Canonical column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Real,
    Text,
    Boolean,
    Timestamp,
    Blob,
    /// Unconstrained; produced only for columns whose values never narrow.
    Any,
}

impl DataType {
    /// Map a declared column type to its canonical type.
    ///
    /// Keyword based, mirroring sqlite3's affinity rules: a declaration
    /// containing "INT" is integer no matter what else it says, "CHAR"/"CLOB"/
    /// "TEXT" is text, and an empty or missing declaration defaults to text
    /// (datasette databases routinely omit declarations entirely).
    pub fn from_declared(declared: &str) -> DataType {
        let decl = declared.to_ascii_uppercase();
        if decl.contains("INT") {
            DataType::Integer
        } else if decl.contains("BOOL") {
            DataType::Boolean
        } else if decl.contains("DATE") || decl.contains("TIME") {
            DataType::Timestamp
        } else if decl.contains("BLOB") {
            DataType::Blob
        } else if decl.contains("REAL")
            || decl.contains("FLOA")
            || decl.contains("DOUB")
            || decl.contains("NUMERIC")
        {
            DataType::Real
        } else {
            // CHAR/CLOB/TEXT and anything unrecognized, including "".
            DataType::Text
        }
    }

    /// Whether values of this type are numeric on the wire.
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Real | DataType::Boolean)
    }
}

/// Ordered column-name-to-type mapping for one table or query output.
///
/// Column order is significant (it must match the server's row layout), so
/// this is a vector rather than a map; lookups are linear over what is in
/// practice a handful of columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    columns: Vec<(String, DataType)>,
}

impl TableSchema {
    pub fn new(columns: Vec<(String, DataType)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<DataType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| *ty)
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn types(&self) -> Vec<DataType> {
        self.columns.iter().map(|(_, ty)| *ty).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, DataType)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_integer_wins() {
        assert_eq!(DataType::from_declared("INTEGER"), DataType::Integer);
        assert_eq!(DataType::from_declared("int"), DataType::Integer);
        assert_eq!(DataType::from_declared("BIGINT"), DataType::Integer);
        // sqlite rule: INT anywhere in the declaration wins
        assert_eq!(DataType::from_declared("POINT"), DataType::Integer);
    }

    #[test]
    fn affinity_text_default() {
        assert_eq!(DataType::from_declared("VARCHAR(20)"), DataType::Text);
        assert_eq!(DataType::from_declared("CLOB"), DataType::Text);
        assert_eq!(DataType::from_declared(""), DataType::Text);
        assert_eq!(DataType::from_declared("JSON"), DataType::Text);
    }

    #[test]
    fn affinity_real_bool_blob_temporal() {
        assert_eq!(DataType::from_declared("REAL"), DataType::Real);
        assert_eq!(DataType::from_declared("double precision"), DataType::Real);
        assert_eq!(DataType::from_declared("NUMERIC(10,2)"), DataType::Real);
        assert_eq!(DataType::from_declared("BOOLEAN"), DataType::Boolean);
        assert_eq!(DataType::from_declared("BLOB"), DataType::Blob);
        assert_eq!(DataType::from_declared("DATETIME"), DataType::Timestamp);
        assert_eq!(DataType::from_declared("date"), DataType::Timestamp);
    }

    #[test]
    fn schema_lookup_preserves_order() {
        let schema = TableSchema::new(vec![
            ("b".to_string(), DataType::Integer),
            ("a".to_string(), DataType::Text),
        ]);
        assert_eq!(schema.names(), vec!["b", "a"]);
        assert_eq!(schema.get("a"), Some(DataType::Text));
        assert_eq!(schema.get("missing"), None);
    }
}
