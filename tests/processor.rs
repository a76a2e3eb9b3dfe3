use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;

use kira_data_import::config::ImportOptions;
use kira_data_import::domain::{
    CopyNumberSegment, DataSet, DataSource, ExpressionValue, Gene, Mutation, Sample,
};
use kira_data_import::error::ImportError;
use kira_data_import::identity::checksum_bytes;
use kira_data_import::model::Model;
use kira_data_import::processor::{FileOutcome, ImportRequest, ProcessorContext, ProcessorPhase};
use kira_data_import::registry::ProcessorRegistry;
use kira_data_import::repository::{
    ForeignKeyResolver, MemoryRepository, Repositories, Repository, RepositoryResolver,
};

struct Fixture {
    registry: ProcessorRegistry,
    data_sources: Arc<MemoryRepository<DataSource>>,
    genes: Arc<MemoryRepository<Gene>>,
    samples: Arc<MemoryRepository<Sample>>,
    mutations: Arc<MemoryRepository<Mutation>>,
    expression: Arc<MemoryRepository<ExpressionValue>>,
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self::with_context(|context| context)
    }

    fn with_context(customize: impl FnOnce(ProcessorContext) -> ProcessorContext) -> Self {
        let data_sources = Arc::new(MemoryRepository::<DataSource>::new());
        let genes = Arc::new(MemoryRepository::<Gene>::new());
        let samples = Arc::new(MemoryRepository::<Sample>::new());
        let mutations = Arc::new(MemoryRepository::<Mutation>::new());
        let expression = Arc::new(MemoryRepository::<ExpressionValue>::new());
        let repositories = Repositories {
            data_sets: Arc::new(MemoryRepository::<DataSet>::new()),
            data_sources: data_sources.clone(),
            genes: genes.clone(),
            samples: samples.clone(),
            mutations: mutations.clone(),
            expression: expression.clone(),
            copy_number: Arc::new(MemoryRepository::<CopyNumberSegment>::new()),
        };
        let context = customize(ProcessorContext::new(repositories));
        let registry = ProcessorRegistry::with_defaults(context).unwrap();
        Self {
            registry,
            data_sources,
            genes,
            samples,
            mutations,
            expression,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn request(&self, data_type: &str, path: &Path) -> ImportRequest {
        ImportRequest::new(data_type, path, "ds1")
    }

    fn seed_samples(&self, count: usize) {
        for index in 1..=count {
            self.samples
                .insert(Sample {
                    sample_id: format!("S{index}"),
                    subject_id: None,
                    tissue: None,
                    sample_type: None,
                    age: None,
                    data_set: "ds1".to_string(),
                    data_source: "seed".to_string(),
                })
                .unwrap();
        }
    }

    fn seed_gene(&self, id: &str, symbol: &str) {
        self.genes
            .insert(Gene {
                gene_id: id.to_string(),
                symbol: symbol.to_string(),
                name: None,
                chromosome: None,
                biotype: None,
                data_set: "ds1".to_string(),
                data_source: "seed".to_string(),
            })
            .unwrap();
    }
}

const GENES: &str = "Gene ID\tGene Symbol\n7157\tTP53\n3845\tKRAS\n";
const GENES_CHANGED: &str = "Gene ID\tGene Symbol\n7157\tTP53\n672\tBRCA1\n675\tBRCA2\n";

fn mutation_file(unknown_line: Option<usize>) -> String {
    let mut content =
        String::from("Hugo_Symbol\tTumor_Sample_Barcode\tChromosome\tStart_Position\n");
    for index in 1..=10 {
        let sample = if Some(index) == unknown_line {
            "UNKNOWN".to_string()
        } else {
            format!("S{index}")
        };
        content.push_str(&format!("TP53\t{sample}\t17\t{}\n", 7_670_000 + index));
    }
    content
}

#[test]
fn header_aliases_normalize_to_the_same_field() {
    let descriptor = Mutation::descriptor();
    assert_eq!(descriptor.field_for_header("Gene Symbol").unwrap().name, "gene_symbol");
    assert_eq!(descriptor.field_for_header("gene_symbol").unwrap().name, "gene_symbol");
    assert_eq!(descriptor.field_for_header("geneSymbol").unwrap().name, "gene_symbol");
}

#[test]
fn unchanged_file_is_imported_once() {
    let fixture = Fixture::new();
    let path = fixture.write("genes.tsv", GENES);
    let request = fixture.request("gene", &path);

    let mut processor = fixture.registry.get("gene").unwrap();
    let first = processor.run(&request, &ImportOptions::default()).unwrap();
    assert_eq!(first.outcome, FileOutcome::Imported);
    assert_eq!(first.records_written, 2);
    assert_eq!(processor.phase(), ProcessorPhase::Done);
    assert!(!processor.is_in_failed_state());

    let inserts = fixture.genes.insert_count();
    let second = processor.run(&request, &ImportOptions::default()).unwrap();
    assert_eq!(second.outcome, FileOutcome::SkippedExisting);
    assert_eq!(fixture.genes.insert_count(), inserts);

    let overwrite = ImportOptions {
        overwrite: true,
        ..ImportOptions::default()
    };
    let third = fixture.registry.get("gene").unwrap().run(&request, &overwrite).unwrap();
    assert_eq!(third.outcome, FileOutcome::SkippedUnchanged);
    assert_eq!(fixture.genes.insert_count(), inserts);

    assert_eq!(fixture.data_sources.len(), 1);
    assert_eq!(fixture.data_sources.insert_count(), 1);
    assert_eq!(fixture.genes.len(), 2);
}

#[test]
fn changed_file_replaces_previous_import() {
    let fixture = Fixture::new();
    let path = fixture.write("genes.tsv", GENES);
    let request = fixture.request("gene", &path);
    let overwrite = ImportOptions {
        overwrite: true,
        ..ImportOptions::default()
    };

    let first = fixture.registry.get("gene").unwrap().run(&request, &overwrite).unwrap();
    let id = first.data_source_id.clone().unwrap();

    fs::write(&path, GENES_CHANGED).unwrap();
    let second = fixture.registry.get("gene").unwrap().run(&request, &overwrite).unwrap();
    assert_eq!(second.outcome, FileOutcome::Replaced);
    assert_eq!(second.data_source_id.as_deref(), Some(id.as_str()));
    assert_eq!(second.records_written, 3);

    assert_eq!(fixture.data_sources.len(), 1);
    assert!(fixture.genes.find_by_stable_key("ds1:3845").unwrap().is_none());
    assert!(fixture.genes.find_by_stable_key("ds1:675").unwrap().is_some());

    let stored = fixture.data_sources.find_by_stable_key(&id).unwrap().unwrap();
    assert_eq!(stored.record_count, 3);
    assert_eq!(stored.checksum, checksum_bytes(GENES_CHANGED.as_bytes()));
}

#[test]
fn force_overwrite_reimports_unchanged_file() {
    let fixture = Fixture::new();
    let path = fixture.write("genes.tsv", GENES);
    let request = fixture.request("gene", &path);
    fixture
        .registry
        .get("gene")
        .unwrap()
        .run(&request, &ImportOptions::default())
        .unwrap();

    let force = ImportOptions {
        force_overwrite: true,
        ..ImportOptions::default()
    };
    let report = fixture.registry.get("gene").unwrap().run(&request, &force).unwrap();
    assert_eq!(report.outcome, FileOutcome::Replaced);
    assert_eq!(fixture.genes.insert_count(), 4);
    assert_eq!(fixture.genes.len(), 2);
}

#[test]
fn unknown_sample_is_skipped_when_allowed() {
    let fixture = Fixture::new();
    fixture.seed_samples(10);
    fixture.seed_gene("7157", "TP53");
    let path = fixture.write("mutations.maf", &mutation_file(Some(5)));

    let options = ImportOptions {
        skip_invalid_samples: true,
        ..ImportOptions::default()
    };
    let mut processor = fixture.registry.get("mutation").unwrap();
    let report = processor.run(&fixture.request("mutation", &path), &options).unwrap();
    assert_eq!(report.records_written, 9);
    assert_eq!(report.records_skipped, 1);
    assert_eq!(fixture.mutations.len(), 9);

    let id = report.data_source_id.unwrap();
    let stored = fixture.data_sources.find_by_stable_key(&id).unwrap().unwrap();
    assert_eq!((stored.record_count, stored.skipped_count), (9, 1));

    let first = fixture.mutations.find_by_stable_key(&format!("{id}:0")).unwrap().unwrap();
    assert_eq!(first.sample_id.as_deref(), Some("S1"));
    assert_eq!(first.gene_id.as_deref(), Some("7157"));
    assert!(fixture.mutations.find_by_stable_key(&format!("{id}:4")).unwrap().is_none());
}

#[test]
fn unknown_sample_fails_and_leaves_nothing_behind() {
    let fixture = Fixture::new();
    fixture.seed_samples(10);
    fixture.seed_gene("7157", "TP53");
    let path = fixture.write("mutations.maf", &mutation_file(Some(5)));

    let options = ImportOptions {
        batch_size: 2,
        ..ImportOptions::default()
    };
    let mut processor = fixture.registry.get("mutation").unwrap();
    let err = processor.run(&fixture.request("mutation", &path), &options).unwrap_err();
    assert_matches!(err, ImportError::UnresolvedSample(ref sample) if sample == "UNKNOWN");
    assert!(processor.is_in_failed_state());
    assert_eq!(processor.phase(), ProcessorPhase::Done);

    assert_eq!(fixture.mutations.insert_count(), 4);
    assert!(fixture.mutations.is_empty());
    assert!(fixture.data_sources.is_empty());
}

#[test]
fn unknown_gene_uses_its_own_skip_flag() {
    let fixture = Fixture::new();
    fixture.seed_samples(2);
    fixture.seed_gene("7157", "TP53");
    let path = fixture.write(
        "mutations.tsv",
        "Hugo_Symbol\tTumor_Sample_Barcode\nTP53\tS1\nNOPE1\tS2\n",
    );
    let request = fixture.request("mutation", &path);

    let samples_only = ImportOptions {
        skip_invalid_samples: true,
        ..ImportOptions::default()
    };
    let err = fixture
        .registry
        .get("mutation")
        .unwrap()
        .run(&request, &samples_only)
        .unwrap_err();
    assert_matches!(err, ImportError::UnresolvedGene(_));

    let genes = ImportOptions {
        skip_invalid_genes: true,
        ..ImportOptions::default()
    };
    let report = fixture.registry.get("mutation").unwrap().run(&request, &genes).unwrap();
    assert_eq!((report.records_written, report.records_skipped), (1, 1));
}

#[test]
fn conversion_errors_follow_skip_invalid_records() {
    let fixture = Fixture::new();
    let path = fixture.write("samples.csv", "sample_id,age\nS1,61\nS2,sixty\nS3,\n");
    let request = fixture.request("sample", &path);

    let err = fixture
        .registry
        .get("sample")
        .unwrap()
        .run(&request, &ImportOptions::default())
        .unwrap_err();
    assert_matches!(err, ImportError::DataConversion { line: 3, .. });
    assert!(fixture.samples.is_empty());

    let options = ImportOptions {
        skip_invalid_records: true,
        ..ImportOptions::default()
    };
    let report = fixture.registry.get("sample").unwrap().run(&request, &options).unwrap();
    assert_eq!((report.records_written, report.records_skipped), (2, 1));
    assert_eq!(fixture.samples.find_by_stable_key("ds1:S3").unwrap().unwrap().age, None);
}

#[test]
fn persistence_failure_rolls_back_written_batches() {
    let fixture = Fixture::new();
    let path = fixture.write("genes.tsv", GENES_CHANGED);
    fixture.genes.fail_after_inserts(1);

    let options = ImportOptions {
        batch_size: 1,
        skip_invalid_records: true,
        ..ImportOptions::default()
    };
    let mut processor = fixture.registry.get("gene").unwrap();
    let err = processor.run(&fixture.request("gene", &path), &options).unwrap_err();
    assert_matches!(err, ImportError::Persistence(_));
    assert!(fixture.genes.is_empty());
    assert!(fixture.data_sources.is_empty());
}

#[test]
fn missing_file_creates_no_data_source() {
    let fixture = Fixture::new();
    let path = fixture.dir.path().join("absent.tsv");
    let mut processor = fixture.registry.get("gene").unwrap();
    let err = processor
        .run(&fixture.request("gene", &path), &ImportOptions::default())
        .unwrap_err();
    assert_matches!(err, ImportError::InvalidDataSource { .. });
    assert!(processor.is_in_failed_state());
    assert_eq!(fixture.data_sources.insert_count(), 0);
}

#[test]
fn failed_replacement_removes_previous_import() {
    let fixture = Fixture::new();
    let path = fixture.write("genes.tsv", GENES);
    let request = fixture.request("gene", &path);
    let force = ImportOptions {
        force_overwrite: true,
        ..ImportOptions::default()
    };
    fixture.registry.get("gene").unwrap().run(&request, &force).unwrap();

    fs::write(&path, "symbol\nTP53\n").unwrap();
    let err = fixture.registry.get("gene").unwrap().run(&request, &force).unwrap_err();
    assert_matches!(err, ImportError::MissingColumn { .. });
    assert!(fixture.genes.is_empty());
    assert!(fixture.data_sources.is_empty());
}

#[test]
fn mismatched_request_type_is_a_configuration_error() {
    let fixture = Fixture::new();
    let path = fixture.write("genes.tsv", GENES);
    let mut processor = fixture.registry.get("gene").unwrap();
    let err = processor
        .run(&fixture.request("sample", &path), &ImportOptions::default())
        .unwrap_err();
    assert_matches!(err, ImportError::UnsupportedDataType(_));
}

#[test]
fn gzipped_gct_expression_matrix() {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    let fixture = Fixture::new();
    fixture.seed_samples(2);
    fixture.seed_gene("7157", "TP53");
    fixture.seed_gene("3845", "KRAS");

    let path = fixture.dir.path().join("expression.gct.gz");
    let mut encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
    encoder
        .write_all(b"#1.2\n2\t2\nName\tDescription\tS1\tS2\n")
        .unwrap();
    encoder
        .write_all(b"TP53\tp53\t5.5\t1.5\nKRAS\t\tNA\t0.25\n")
        .unwrap();
    encoder.finish().unwrap();

    let report = fixture
        .registry
        .get("gene_expression")
        .unwrap()
        .run(&fixture.request("gene_expression", &path), &ImportOptions::default())
        .unwrap();
    assert_eq!(report.records_written, 3);

    let id = report.data_source_id.unwrap();
    let last = fixture.expression.find_by_stable_key(&format!("{id}:2")).unwrap().unwrap();
    assert_eq!(last.gene_id.as_deref(), Some("3845"));
    assert_eq!(last.sample_id.as_deref(), Some("S2"));
    assert_eq!(last.value, 0.25);
}

#[test]
fn repeated_sample_row_is_a_record_error() {
    let fixture = Fixture::new();
    let path = fixture.write(
        "samples.tsv",
        "sample_id\ttissue\nS1\tlung\nS2\tcolon\nS1\tliver\n",
    );
    let request = fixture.request("sample", &path);

    let err = fixture
        .registry
        .get("sample")
        .unwrap()
        .run(&request, &ImportOptions::default())
        .unwrap_err();
    assert_matches!(err, ImportError::DuplicateRecord(ref key) if key == "ds1:S1");
    assert!(fixture.samples.is_empty());

    let options = ImportOptions {
        skip_invalid_records: true,
        ..ImportOptions::default()
    };
    let report = fixture.registry.get("sample").unwrap().run(&request, &options).unwrap();
    assert_eq!((report.records_written, report.records_skipped), (2, 1));
    let first = fixture.samples.find_by_stable_key("ds1:S1").unwrap().unwrap();
    assert_eq!(first.tissue.as_deref(), Some("lung"));
}

#[test]
fn same_catalog_imports_into_two_data_sets() {
    let fixture = Fixture::new();
    let path = fixture.write("genes.tsv", GENES);
    for data_set in ["ds1", "ds2"] {
        let report = fixture
            .registry
            .get("gene")
            .unwrap()
            .run(&ImportRequest::new("gene", &path, data_set), &ImportOptions::default())
            .unwrap();
        assert_eq!(report.outcome, FileOutcome::Imported);
        assert_eq!(report.records_written, 2);
    }
    assert_eq!(fixture.genes.len(), 4);
    assert_eq!(fixture.data_sources.len(), 2);
    assert!(fixture.genes.find_by_stable_key("ds2:7157").unwrap().is_some());
}

#[test]
fn attribute_sheet_annotates_imported_samples() {
    let fixture = Fixture::new();
    let catalog = fixture.write("samples.tsv", "sample_id\tsubject_id\nS1\tP1\nS2\tP2\n");
    let sheet = fixture.write(
        "attributes.tsv",
        "sample_id\tS1\tS2\tS9\ntissue\tlung\tcolon\tskin\nage\t61\t\t40\n",
    );
    let catalog_report = fixture
        .registry
        .get("sample")
        .unwrap()
        .run(&fixture.request("sample", &catalog), &ImportOptions::default())
        .unwrap();

    let err = fixture
        .registry
        .get("sample_attributes")
        .unwrap()
        .run(&fixture.request("sample_attributes", &sheet), &ImportOptions::default())
        .unwrap_err();
    assert_matches!(err, ImportError::UnresolvedSample(ref sample) if sample == "S9");
    let untouched = fixture.samples.find_by_stable_key("ds1:S1").unwrap().unwrap();
    assert_eq!(untouched.tissue, None);
    assert_eq!(fixture.data_sources.len(), 1);

    let options = ImportOptions {
        skip_invalid_samples: true,
        ..ImportOptions::default()
    };
    let report = fixture
        .registry
        .get("sample_attributes")
        .unwrap()
        .run(&fixture.request("sample_attributes", &sheet), &options)
        .unwrap();
    assert_eq!((report.records_written, report.records_skipped), (2, 1));
    assert_eq!(fixture.samples.len(), 2);

    let s1 = fixture.samples.find_by_stable_key("ds1:S1").unwrap().unwrap();
    assert_eq!(s1.subject_id.as_deref(), Some("P1"));
    assert_eq!(s1.tissue.as_deref(), Some("lung"));
    assert_eq!(s1.age, Some(61));
    assert_eq!(s1.data_source, catalog_report.data_source_id.unwrap());
    let s2 = fixture.samples.find_by_stable_key("ds1:S2").unwrap().unwrap();
    assert_eq!((s2.tissue.as_deref(), s2.age), (Some("colon"), None));
}

struct CountingResolver {
    inner: RepositoryResolver,
    symbol_loads: Arc<AtomicUsize>,
}

impl ForeignKeyResolver for CountingResolver {
    fn find_sample_id(
        &self,
        data_set: &str,
        natural_key: &str,
    ) -> Result<Option<String>, ImportError> {
        self.inner.find_sample_id(data_set, natural_key)
    }

    fn find_gene_id(
        &self,
        data_set: &str,
        natural_key: &str,
    ) -> Result<Option<String>, ImportError> {
        self.inner.find_gene_id(data_set, natural_key)
    }

    fn gene_symbols(&self, data_set: &str) -> Result<HashMap<String, String>, ImportError> {
        self.symbol_loads.fetch_add(1, Ordering::SeqCst);
        self.inner.gene_symbols(data_set)
    }
}

#[test]
fn gene_symbols_are_indexed_once_per_run() {
    let symbol_loads = Arc::new(AtomicUsize::new(0));
    let loads = symbol_loads.clone();
    let fixture = Fixture::with_context(move |context| {
        let inner = context.repositories.resolver();
        context.with_resolver(Arc::new(CountingResolver {
            inner,
            symbol_loads: loads,
        }))
    });
    fixture.seed_samples(3);
    fixture.seed_gene("7157", "TP53");
    fixture.seed_gene("3845", "KRAS");
    let path = fixture.write(
        "mutations.tsv",
        "Hugo_Symbol\tTumor_Sample_Barcode\n\
         tp53\tS1\nKRAS\tS2\n7157\tS3\nNOPE\tS1\nNOPE\tS2\n",
    );
    let options = ImportOptions {
        skip_invalid_genes: true,
        ..ImportOptions::default()
    };

    let mut processor = fixture.registry.get("mutation").unwrap();
    let report = processor.run(&fixture.request("mutation", &path), &options).unwrap();
    assert_eq!((report.records_written, report.records_skipped), (3, 2));
    assert_eq!(symbol_loads.load(Ordering::SeqCst), 1);

    let id = report.data_source_id.unwrap();
    let first = fixture.mutations.find_by_stable_key(&format!("{id}:0")).unwrap().unwrap();
    assert_eq!(first.gene_id.as_deref(), Some("7157"));

    let force = ImportOptions {
        force_overwrite: true,
        ..options
    };
    let again = processor.run(&fixture.request("mutation", &path), &force).unwrap();
    assert_eq!(again.outcome, FileOutcome::Replaced);
    assert_eq!(symbol_loads.load(Ordering::SeqCst), 2);
}
