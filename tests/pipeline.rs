//! End-to-end tests of ingestion and question answering with deterministic
//! adapters: hashing embedder, lexical scorer, in-memory store and a
//! scripted generator that counts its calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use policy_harness::config::{Config, GroundingConfig, RetrievalConfig};
use policy_harness::embedding::HashingEmbedder;
use policy_harness::error::PipelineError;
use policy_harness::grounding::{MarkerRefusalPolicy, Prompt};
use policy_harness::ingest::IngestRequest;
use policy_harness::llm::Generator;
use policy_harness::models::{ChunkMetadata, Document, IndexRecord};
use policy_harness::pipeline::{QaPipeline, QuestionRequest};
use policy_harness::rerank::LexicalScorer;
use policy_harness::services::{Adapters, Services};
use policy_harness::store::memory::InMemoryStore;
use policy_harness::store::{DocumentCatalog, IndexFilter, VectorIndex};

const ACME_HANDBOOK: &str = "\
Acme Corp Employee Handbook

Working hours
Core hours are 10am to 4pm. Employees may choose their start time between 7am and 10am.

Sick leave
Employees receive 10 paid sick days per year. Unused sick days do not roll over into the next year.
A doctor's note is required for absences longer than three consecutive days.

Vacation
Full-time employees accrue 20 vacation days per year. Vacation requests must be approved by your manager
at least two weeks in advance.

Expenses
Submit expense reports within 30 days with itemized receipts attached.";

const GLOBEX_HANDBOOK: &str = "\
Globex Staff Policies

Sick leave
How many sick days do I get? Staff get 3 paid sick days per year.";

#[derive(Clone, Copy)]
enum Reply {
    /// Answer from the context when it mentions sick days, refuse otherwise.
    FromContext,
    Refuse,
    Hang,
}

struct ScriptedGenerator {
    reply: Reply,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Reply::FromContext if prompt.user.contains("10 paid sick days") => {
                Ok("Employees receive 10 paid sick days per year [S1].".to_string())
            }
            Reply::FromContext | Reply::Refuse => Ok(
                "I can't find this explicitly in the provided policy documents. \
                 Please contact HR."
                    .to_string(),
            ),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".to_string())
            }
        }
    }
}

fn test_config(tmp: &TempDir) -> Config {
    let root = tmp.path();
    let content = format!(
        r#"
[db]
path = "{}/policy.sqlite"

[storage]
raw_dir = "{}/raw"

[chunking]
chunk_size = 240
overlap = 40

[embedding]
provider = "hash"

[reranker]
provider = "lexical"

[retrieval]
retrieve_n = 10
top_k = 3

[llm]
provider = "disabled"
"#,
        root.display(),
        root.display()
    );
    toml::from_str(&content).unwrap()
}

fn services_with(
    config: &Config,
    store: Arc<InMemoryStore>,
    generator: Arc<ScriptedGenerator>,
) -> Services {
    services_with_index(config, store.clone(), store, generator)
}

fn services_with_index(
    config: &Config,
    index: Arc<dyn VectorIndex>,
    catalog: Arc<dyn DocumentCatalog>,
    generator: Arc<ScriptedGenerator>,
) -> Services {
    Services::assemble(
        config,
        Adapters {
            embedder: Arc::new(HashingEmbedder::new(256)),
            index,
            catalog,
            scorer: Arc::new(LexicalScorer),
            generator,
            refusal: Arc::new(MarkerRefusalPolicy::from_config(&config.grounding)),
        },
    )
}

fn text_upload(company_id: &str, doc_name: &str, text: &str) -> IngestRequest {
    IngestRequest {
        company_id: company_id.to_string(),
        doc_name: doc_name.to_string(),
        original_filename: format!("{}.txt", doc_name.to_lowercase().replace(' ', "_")),
        content_type: "text/plain".to_string(),
        bytes: text.as_bytes().to_vec(),
        chunking: None,
    }
}

/// Single-page PDF whose page content stream is `content`, with a correct
/// xref table so pdf-extract can parse it.
fn single_page_pdf(content: &str) -> Vec<u8> {
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 5 0 R >> >> >>"
            .to_string(),
        format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj {}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

#[tokio::test]
async fn acme_sick_days_answer_is_grounded_and_cited() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = Arc::new(InMemoryStore::new());
    let generator = ScriptedGenerator::new(Reply::FromContext);
    let services = services_with(&config, store.clone(), generator.clone());

    let report = services
        .ingestor
        .ingest(text_upload("acme", "Employee Handbook", ACME_HANDBOOK))
        .await
        .unwrap();
    assert!(report.chunk_count > 1);

    let answer = services
        .pipeline
        .answer(&QuestionRequest::new("acme", "How many sick days do I get?"))
        .await
        .unwrap();

    assert!(!answer.refused, "unexpected refusal: {}", answer.answer_text);
    assert!(answer.answer_text.contains("10"));
    assert!(!answer.sources.is_empty());
    assert!(answer
        .sources
        .iter()
        .all(|s| s.document_id == report.document_id && s.doc_name == "Employee Handbook"));
    assert!(answer.sources.iter().any(|s| s.excerpt.contains("10 paid sick days")));
    assert!(answer.confidence.unwrap() > 0.0);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn company_without_documents_is_refused_without_llm_call() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = Arc::new(InMemoryStore::new());
    let generator = ScriptedGenerator::new(Reply::FromContext);
    let services = services_with(&config, store, generator.clone());

    services
        .ingestor
        .ingest(text_upload("acme", "Employee Handbook", ACME_HANDBOOK))
        .await
        .unwrap();

    let answer = services
        .pipeline
        .answer(&QuestionRequest::new("other", "How many sick days do I get?"))
        .await
        .unwrap();

    assert!(answer.refused);
    assert!(answer.sources.is_empty());
    assert_eq!(answer.confidence, None);
    assert_eq!(answer.answer_text, config.grounding.refusal_message);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn unrelated_question_is_refused_below_threshold() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = Arc::new(InMemoryStore::new());
    let generator = ScriptedGenerator::new(Reply::FromContext);
    let services = services_with(&config, store, generator.clone());

    services
        .ingestor
        .ingest(text_upload("acme", "Employee Handbook", ACME_HANDBOOK))
        .await
        .unwrap();

    let answer = services
        .pipeline
        .answer(&QuestionRequest::new("acme", "What is the weather today?"))
        .await
        .unwrap();

    assert!(answer.refused);
    assert!(answer.sources.is_empty());
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn other_tenant_text_never_used_even_when_closer() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = Arc::new(InMemoryStore::new());
    let generator = ScriptedGenerator::new(Reply::FromContext);
    let services = services_with(&config, store, generator);

    let acme = services
        .ingestor
        .ingest(text_upload("acme", "Employee Handbook", ACME_HANDBOOK))
        .await
        .unwrap();
    // Globex's text repeats the question verbatim, so it is the nearest
    // neighbour overall.
    services
        .ingestor
        .ingest(text_upload("globex", "Staff Policies", GLOBEX_HANDBOOK))
        .await
        .unwrap();

    let request = QuestionRequest::new("acme", "How many sick days do I get?");
    let report = services.pipeline.evidence(&request).await.unwrap();
    assert!(!report.evidence.is_empty());
    assert!(report
        .evidence
        .iter()
        .all(|e| e.metadata.company_id == "acme" && e.metadata.document_id == acme.document_id));

    let answer = services.pipeline.answer(&request).await.unwrap();
    assert!(answer.sources.iter().all(|s| s.document_id == acme.document_id));
    assert!(!answer.answer_text.contains("3 paid"));
}

#[tokio::test]
async fn model_refusal_drops_sources() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = Arc::new(InMemoryStore::new());
    let generator = ScriptedGenerator::new(Reply::Refuse);
    let services = services_with(&config, store, generator.clone());

    services
        .ingestor
        .ingest(text_upload("acme", "Employee Handbook", ACME_HANDBOOK))
        .await
        .unwrap();

    let answer = services
        .pipeline
        .answer(&QuestionRequest::new("acme", "How many sick days do I get?"))
        .await
        .unwrap();

    assert!(answer.refused);
    assert!(answer.sources.is_empty());
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn slow_generation_times_out() {
    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(HashingEmbedder::new(256));
    let vector = embedder.embed_one("Employees receive 10 paid sick days per year.");
    store
        .upsert(
            "c0",
            &vector,
            "Employees receive 10 paid sick days per year.",
            &ChunkMetadata {
                company_id: "acme".to_string(),
                document_id: "d1".to_string(),
                doc_name: "Employee Handbook".to_string(),
                sequence_index: 0,
                char_start: 0,
                char_end: 45,
                source_file: "handbook.pdf".to_string(),
            },
        )
        .await
        .unwrap();

    let pipeline = QaPipeline::new(
        embedder,
        store,
        Arc::new(LexicalScorer),
        ScriptedGenerator::new(Reply::Hang),
        Arc::new(MarkerRefusalPolicy::from_config(&GroundingConfig::default())),
        RetrievalConfig::default(),
        GroundingConfig::default(),
        Duration::from_millis(100),
    );

    let err = pipeline
        .answer(&QuestionRequest::new("acme", "How many sick days do I get?"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::GenerationTimeout { .. }));
    assert_eq!(err.code(), "generation_timeout");
}

#[tokio::test]
async fn per_request_top_k_limits_sources() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = Arc::new(InMemoryStore::new());
    let generator = ScriptedGenerator::new(Reply::FromContext);
    let services = services_with(&config, store, generator);

    services
        .ingestor
        .ingest(text_upload("acme", "Employee Handbook", ACME_HANDBOOK))
        .await
        .unwrap();

    let mut request = QuestionRequest::new("acme", "How many sick days do I get?");
    request.overrides.top_k = Some(1);
    let answer = services.pipeline.answer(&request).await.unwrap();
    assert!(!answer.refused);
    assert_eq!(answer.sources.len(), 1);
}

#[tokio::test]
async fn rerank_is_idempotent_across_calls() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = Arc::new(InMemoryStore::new());
    let services = services_with(&config, store, ScriptedGenerator::new(Reply::FromContext));

    services
        .ingestor
        .ingest(text_upload("acme", "Employee Handbook", ACME_HANDBOOK))
        .await
        .unwrap();

    let request = QuestionRequest::new("acme", "vacation days approval");
    let first = services.pipeline.evidence(&request).await.unwrap();
    let second = services.pipeline.evidence(&request).await.unwrap();
    let ids = |r: &policy_harness::pipeline::EvidenceReport| {
        r.evidence
            .iter()
            .map(|e| (e.chunk_id.clone(), e.relevance_score))
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
}

/// Index that accepts the first record of a batch and then fails.
struct FailingIndex {
    inner: InMemoryStore,
}

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn upsert(
        &self,
        chunk_id: &str,
        vector: &[f32],
        text: &str,
        metadata: &ChunkMetadata,
    ) -> anyhow::Result<()> {
        self.inner.upsert(chunk_id, vector, text, metadata).await
    }

    async fn upsert_batch(&self, records: &[IndexRecord]) -> anyhow::Result<()> {
        if let Some(first) = records.first() {
            self.upsert(&first.chunk_id, &first.vector, &first.text, &first.metadata)
                .await?;
        }
        anyhow::bail!("disk full")
    }

    async fn query(
        &self,
        vector: &[f32],
        n: usize,
        filter: &IndexFilter,
    ) -> anyhow::Result<Vec<policy_harness::models::Candidate>> {
        self.inner.query(vector, n, filter).await
    }

    async fn delete_document(&self, document_id: &str) -> anyhow::Result<usize> {
        self.inner.delete_document(document_id).await
    }

    async fn count(&self, filter: &IndexFilter) -> anyhow::Result<usize> {
        self.inner.count(filter).await
    }
}

#[tokio::test]
async fn failed_index_write_leaves_nothing_searchable() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let index = Arc::new(FailingIndex {
        inner: InMemoryStore::new(),
    });
    let catalog = Arc::new(InMemoryStore::new());
    let generator = ScriptedGenerator::new(Reply::FromContext);
    let services = services_with_index(&config, index.clone(), catalog.clone(), generator.clone());

    let err = services
        .ingestor
        .ingest(text_upload("acme", "Employee Handbook", ACME_HANDBOOK))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::IndexWrite { .. }));
    assert_eq!(err.code(), "index_write_failed");

    assert_eq!(index.count(&IndexFilter::company("acme")).await.unwrap(), 0);
    let docs: Vec<Document> = catalog.list_documents("acme").await.unwrap();
    assert!(docs.is_empty());
    let raw_files = std::fs::read_dir(tmp.path().join("raw")).unwrap().count();
    assert_eq!(raw_files, 0);

    let answer = services
        .pipeline
        .answer(&QuestionRequest::new("acme", "How many sick days do I get?"))
        .await
        .unwrap();
    assert!(answer.refused);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn pdf_text_carries_page_marker_into_chunks() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = Arc::new(InMemoryStore::new());
    let generator = ScriptedGenerator::new(Reply::FromContext);
    let services = services_with(&config, store.clone(), generator);

    let pdf = single_page_pdf(
        "BT /F1 12 Tf 72 700 Td (Employees receive 10 paid sick days per year.) Tj ET",
    );
    let report = services
        .ingestor
        .ingest(IngestRequest {
            company_id: "acme".to_string(),
            doc_name: "Employee Handbook".to_string(),
            original_filename: "handbook.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: pdf,
            chunking: None,
        })
        .await
        .unwrap();
    assert_eq!(report.chunk_count, 1);
    assert_eq!(report.raw_path.extension().unwrap(), "pdf");

    let evidence = services
        .pipeline
        .evidence(&QuestionRequest::new("acme", "How many sick days do I get?"))
        .await
        .unwrap();
    assert_eq!(evidence.evidence.len(), 1);
    let text = &evidence.evidence[0].text;
    assert!(text.starts_with("--- Page 1 ---"), "{}", text);
    assert!(text.contains("sick"), "{}", text);

    let doc = store.get_document(&report.document_id).await.unwrap().unwrap();
    assert_eq!(doc.content_type, "application/pdf");
}
