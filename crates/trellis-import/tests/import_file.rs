//! Importing a rows file end to end against the in-memory store.

use std::io::Write;
use std::sync::Arc;

use trellis_core::config::ImportSettings;
use trellis_graph::{GraphStore, MemoryGraphStore};
use trellis_import::{read_rows, FrameworkImporter, ImportError, ImportOptions};

#[tokio::test]
async fn imports_rows_from_a_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"[
            ["Type", "Statement", "Coding", "Parent", "Abbreviated", "Grades"],
            ["Strand", "Reading", "R", "", "Read", "3,4"],
            ["Standard", "Main idea", "R.1", "R", "", "3"],
            ["Standard", "Inference", "R.2", "R.1", "", "99"]
        ]"#
    )
    .unwrap();

    let rows = read_rows(file.path()).unwrap();
    assert_eq!(rows.len(), 3);

    let store = Arc::new(MemoryGraphStore::new());
    let importer = FrameworkImporter::new(store.clone(), ImportSettings::default());
    let summary = importer.import(&rows, ImportOptions::default()).await.unwrap();
    assert_eq!(summary.items, 3);
    assert_eq!(store.association_count().await, 3);

    let items = store.find_items(summary.document).await.unwrap();
    let main_idea = items.iter().find(|i| i.full_statement == "Main idea").unwrap();
    let under_main_idea = store
        .find_child_associations(&main_idea.identifier.to_string())
        .await
        .unwrap();
    assert_eq!(under_main_idea.len(), 1);
    assert_eq!(under_main_idea[0].sequence_number, Some(3));

    let inference = items.iter().find(|i| i.full_statement == "Inference").unwrap();
    assert_eq!(inference.educational_alignment.as_deref(), Some("OT"));
}

#[test]
fn malformed_file_is_a_json_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "not json").unwrap();
    assert!(matches!(read_rows(file.path()), Err(ImportError::Json(_))));
}
