use std::path::PathBuf;
use std::thread;

use rusty_dblp::{
    parse, DatasetLoader, LoadError, ParseError, ResourceLocator, ResourceName, Validation,
};

fn resources_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources")
}

fn bundled_loader() -> DatasetLoader {
    DatasetLoader::new(ResourceLocator::new([resources_dir()]))
}

#[test]
fn test_load_sample_database() {
    let ds = bundled_loader()
        .load("sample.xml", "sample.dtd")
        .expect("sample.xml should load against sample.dtd");

    assert_eq!(ds.root, "dblp");
    assert_eq!(ds.len(), 4);
    assert!(!ds.is_empty());
    assert_eq!(ds.kinds.get("inproceedings"), Some(&1));

    let paper = ds.get("conf/icse/MullerS19").expect("record by key");
    assert_eq!(
        paper.values("author").collect::<Vec<_>>(),
        vec!["Jürgen Müller", "Renée Straßer"]
    );
    assert_eq!(
        paper.first("title"),
        Some("Checking Ownership in Systems Code: A Case Study.")
    );
    assert_eq!(paper.attribute("mdate"), Some("2022-07-01"));
    assert_eq!(
        paper.fields_named("author").next().and_then(|f| f.attribute("orcid")),
        Some("0000-0000-0000-0001")
    );

    let knuth = ds.get("journals/cacm/Knuth74").unwrap();
    assert_eq!(
        knuth.fields_named("ee").next().and_then(|f| f.attribute("type")),
        Some("archive")
    );

    let proceedings = ds.get("conf/icse/2019").unwrap();
    assert_eq!(proceedings.first("editor"), Some("João Silva"));
    assert!(ds.undeclared.is_empty());
}

#[test]
fn test_rooted_resource_names() {
    let ds = bundled_loader().load("/sample.xml", "./sample.dtd").unwrap();
    assert_eq!(ds.len(), 4);
}

#[test]
fn test_missing_resource() {
    let err = bundled_loader().load("missing.xml", "sample.dtd").unwrap_err();
    match err {
        LoadError::ResourceNotFound { name, searched } => {
            assert_eq!(name, "missing.xml");
            assert_eq!(searched, vec![resources_dir()]);
        }
        other => panic!("expected ResourceNotFound, got {other:?}"),
    }
}

#[test]
fn test_incompatible_dtd_is_a_parse_failure() {
    let err = bundled_loader().load("sample.xml", "mismatch.dtd").unwrap_err();
    assert!(matches!(
        err,
        LoadError::ParseFailure {
            source: ParseError::Invalid { .. },
            ..
        }
    ));
    assert!(err.to_string().contains("does not conform"));
}

#[test]
fn test_dtd_in_place_of_xml() {
    // a DTD is not a well-formed document
    let err = bundled_loader().load("sample.dtd", "sample.dtd").unwrap_err();
    assert!(matches!(err, LoadError::ParseFailure { .. }));
}

#[test]
fn test_repeated_loads_are_independent() {
    let loader = bundled_loader();
    let first = loader.load("sample.xml", "sample.dtd").unwrap();
    let mut second = loader.load("sample.xml", "sample.dtd").unwrap().into_records();

    second.clear();
    assert_eq!(first.len(), 4);
    assert!(first.get("homepages/k/DonaldEKnuth").is_some());
    assert!(second.is_empty());
}

#[test]
fn test_concurrent_loads() {
    let loader = bundled_loader();
    let counts: Vec<usize> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| loader.load("sample.xml", "sample.dtd").map(|ds| ds.len())))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect()
    });
    assert_eq!(counts, vec![4; 4]);
}

#[test]
fn test_sample_is_strictly_valid() {
    let locator = ResourceLocator::new([resources_dir()]);
    let xml = locator.resolve(&ResourceName::from("sample.xml")).unwrap();
    let dtd = locator.resolve(&ResourceName::from("sample.dtd")).unwrap();

    let strict = parse(&xml, &dtd, Validation::Strict).unwrap();
    assert_eq!(strict.len(), 4);
}
