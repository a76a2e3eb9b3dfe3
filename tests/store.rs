use std::fs;

use kira_data_import::app::Importer;
use kira_data_import::config::ImportOptions;
use kira_data_import::output::JsonOutput;
use kira_data_import::processor::FileOutcome;
use kira_data_import::store::Store;

#[test]
fn layout_paths() {
    let store = Store::at("/data/project/.kira-import").unwrap();
    assert!(store.collection_dir("genes").ends_with(".kira-import/genes"));
    assert!(store.collection_dir("data_sources").starts_with(store.root()));
}

#[test]
fn imports_survive_a_fresh_store_handle() {
    let dir = tempfile::tempdir().unwrap();
    let genes = dir.path().join("genes.csv");
    fs::write(
        &genes,
        "\"Gene ID\",\"Gene Symbol\",Description\n7157,TP53,\"tumor protein, p53\"\n",
    )
    .unwrap();
    let store_root = dir.path().join("store");

    let first = {
        let store = Store::at(&store_root).unwrap();
        let importer =
            Importer::with_defaults(store.repositories().unwrap(), ImportOptions::default())
                .unwrap();
        importer.import_file("gene", &genes, "ds1", &JsonOutput).unwrap()
    };
    assert_eq!(first.outcome, FileOutcome::Imported);
    let id = first.data_source_id.unwrap();
    assert!(store_root.join("genes").join(&id).is_dir());

    let store = Store::at(&store_root).unwrap();
    let repositories = store.repositories().unwrap();
    let gene = repositories.genes.find_by_stable_key("ds1:7157").unwrap().unwrap();
    assert_eq!(gene.name.as_deref(), Some("tumor protein, p53"));

    let importer = Importer::with_defaults(repositories.clone(), ImportOptions::default()).unwrap();
    let second = importer.import_file("gene", &genes, "ds1", &JsonOutput).unwrap();
    assert_eq!(second.outcome, FileOutcome::SkippedExisting);

    let data_set = repositories.data_sets.find_by_stable_key("ds1").unwrap().unwrap();
    assert!(data_set.data_sources.contains(&id));
}

#[test]
fn replacing_a_file_drops_its_shard() {
    let dir = tempfile::tempdir().unwrap();
    let genes = dir.path().join("genes.tsv");
    fs::write(&genes, "gene_id\tsymbol\n7157\tTP53\n3845\tKRAS\n").unwrap();
    let store = Store::at(dir.path().join("store")).unwrap();
    let repositories = store.repositories().unwrap();
    let options = ImportOptions {
        overwrite: true,
        ..ImportOptions::default()
    };
    let importer = Importer::with_defaults(repositories.clone(), options).unwrap();

    importer.import_file("gene", &genes, "ds1", &JsonOutput).unwrap();
    fs::write(&genes, "gene_id\tsymbol\n672\tBRCA1\n").unwrap();
    let report = importer.import_file("gene", &genes, "ds1", &JsonOutput).unwrap();
    assert_eq!(report.outcome, FileOutcome::Replaced);

    let stored = repositories.genes.find_all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].symbol, "BRCA1");
    assert_eq!(repositories.data_sources.find_all().unwrap().len(), 1);
}
