use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::warn;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Field – one named text value inside a record
// ---------------------------------------------------------------------------

/// A child element of a record reduced to its text content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    /// Attributes of the field element, e.g. `orcid` on an `author`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub value: String,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            attributes: BTreeMap::new(),
            value: value.into(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Record – one child element of the document root
// ---------------------------------------------------------------------------

/// A single record (one direct child of the document root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    /// Element name, e.g. `article` or `inproceedings`.
    pub kind: String,
    /// Attributes after DTD defaults were applied.
    pub attributes: BTreeMap<String, String>,
    /// Child elements in document order; a name may repeat.
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(kind: impl Into<String>, attributes: BTreeMap<String, String>) -> Self {
        Record {
            kind: kind.into(),
            attributes,
            fields: Vec::new(),
        }
    }

    /// The record's `key` attribute, if it has one.
    pub fn key(&self) -> Option<&str> {
        self.attribute("key")
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// All values of a repeated field, in document order.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields_named(name).map(|f| f.value.as_str())
    }

    /// All fields with the given name, in document order.
    pub fn fields_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.name == name)
    }

    /// First value of a field.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

// ---------------------------------------------------------------------------
// Dataset – the complete parsed document
// ---------------------------------------------------------------------------

/// The full parsed dataset with pre-computed indices.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Name of the document root element.
    pub root: String,
    records: Vec<Record>,
    /// Number of records per kind.
    pub kinds: BTreeMap<String, usize>,
    /// Every field name seen in any record.
    pub field_names: BTreeSet<String>,
    /// Element names the DTD does not declare but lenient parsing kept.
    pub undeclared: BTreeSet<String>,
    key_index: HashMap<String, usize>,
}

impl Dataset {
    /// Build indices from the parsed records. When two records share a key
    /// the first one stays addressable.
    pub fn from_records(
        root: impl Into<String>,
        records: Vec<Record>,
        undeclared: BTreeSet<String>,
    ) -> Self {
        let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
        let mut field_names = BTreeSet::new();
        let mut key_index = HashMap::with_capacity(records.len());

        for (i, rec) in records.iter().enumerate() {
            *kinds.entry(rec.kind.clone()).or_default() += 1;
            for field in &rec.fields {
                if !field_names.contains(&field.name) {
                    field_names.insert(field.name.clone());
                }
            }
            if let Some(key) = rec.key() {
                if key_index.contains_key(key) {
                    warn!("duplicate record key `{key}`; keeping the first occurrence");
                } else {
                    key_index.insert(key.to_string(), i);
                }
            }
        }

        Dataset {
            root: root.into(),
            records,
            kinds,
            field_names,
            undeclared,
            key_index,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look a record up by its `key` attribute.
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.key_index.get(key).and_then(|&i| self.records.get(i))
    }

    /// All records in document order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Give up the indices and keep the records.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Records of one kind, in document order.
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            root: self.root.clone(),
            records: self.len(),
            kinds: self.kinds.clone(),
            fields: self.field_names.iter().cloned().collect(),
            undeclared: self.undeclared.iter().cloned().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Counts describing a dataset, for display and JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub root: String,
    pub records: usize,
    pub kinds: BTreeMap<String, usize>,
    pub fields: Vec<String>,
    pub undeclared: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: &str, key: Option<&str>, fields: &[(&str, &str)]) -> Record {
        let mut attributes = BTreeMap::new();
        if let Some(k) = key {
            attributes.insert("key".to_string(), k.to_string());
        }
        let mut rec = Record::new(kind, attributes);
        rec.fields = fields
            .iter()
            .map(|(n, v)| Field::new(*n, *v))
            .collect();
        rec
    }

    #[test]
    fn test_from_records_builds_indices() {
        let ds = Dataset::from_records(
            "dblp",
            vec![
                record("article", Some("a/1"), &[("author", "A"), ("title", "T1")]),
                record("article", Some("a/2"), &[("title", "T2"), ("year", "2001")]),
                record("www", None, &[("author", "B")]),
            ],
            BTreeSet::new(),
        );

        assert_eq!(ds.len(), 3);
        assert_eq!(ds.kinds.get("article"), Some(&2));
        assert_eq!(ds.kinds.get("www"), Some(&1));
        assert_eq!(
            ds.field_names.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["author", "title", "year"]
        );
        assert_eq!(ds.get("a/2").and_then(|r| r.first("year")), Some("2001"));
        assert!(ds.get("missing").is_none());
        assert_eq!(ds.of_kind("article").count(), 2);
    }

    #[test]
    fn test_duplicate_key_keeps_first() {
        let ds = Dataset::from_records(
            "dblp",
            vec![
                record("article", Some("dup"), &[("title", "first")]),
                record("book", Some("dup"), &[("title", "second")]),
            ],
            BTreeSet::new(),
        );
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get("dup").and_then(|r| r.first("title")), Some("first"));
    }

    #[test]
    fn test_repeated_field_values_keep_order() {
        let rec = record(
            "article",
            None,
            &[("author", "X"), ("title", "T"), ("author", "Y")],
        );
        assert_eq!(rec.values("author").collect::<Vec<_>>(), vec!["X", "Y"]);
        assert_eq!(rec.first("pages"), None);
    }

    #[test]
    fn test_first_outlives_the_query_name() {
        let rec = record("article", None, &[("title", "T")]);
        let title = {
            let name = String::from("title");
            rec.first(&name)
        };
        assert_eq!(title, Some("T"));
    }

    #[test]
    fn test_records_are_only_reachable_through_accessors() {
        let ds = Dataset::from_records(
            "dblp",
            vec![
                record("article", Some("a/1"), &[("title", "one")]),
                record("www", Some("w/1"), &[("title", "two")]),
            ],
            BTreeSet::new(),
        );
        assert_eq!(ds.records().len(), 2);
        assert_eq!(ds.get("w/1"), ds.records().get(1));

        let records = ds.into_records();
        assert_eq!(records[0].key(), Some("a/1"));
        assert_eq!(records[1].first("title"), Some("two"));
    }

    #[test]
    fn test_empty_dataset_summary() {
        let ds = Dataset::from_records("dblp", Vec::new(), BTreeSet::new());
        assert!(ds.is_empty());
        let summary = ds.summary();
        assert_eq!(summary.records, 0);
        assert!(summary.kinds.is_empty());
    }
}
