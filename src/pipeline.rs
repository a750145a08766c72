//! Document pipeline: OCR, page assembly, then philological normalization.
//!
//! Each document moves through
//! `Pending -> OcrInFlight -> (OcrFailed | OcrSucceeded) -> (Done | NormalizationFailed)`.
//! An OCR failure ends the document with `error` set. A normalization failure
//! keeps the raw OCR text and puts the message in `normalized_text` instead.

use crate::chat::{ChatEngine, Message};
use crate::error::PipelineError;
use crate::input::{encode, EncodedPayload, SourceDocument};
use crate::ocr::{OcrProvider, PageText};
use crate::prompts::{normalization_user_prompt, NORMALIZATION_SYSTEM_PROMPT};
use crate::store::ResultStore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Pending,
    OcrInFlight,
    OcrFailed,
    OcrSucceeded,
    Done,
    NormalizationFailed,
    /// The document never reached OCR because its bytes could not be encoded.
    EncodingFailed,
}

/// Outcome of processing one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentResult {
    pub raw_text: String,
    pub page_count: usize,
    pub normalized_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stage: PipelineStage,
}

impl DocumentResult {
    fn failed(stage: PipelineStage, error: impl Into<String>) -> Self {
        Self {
            raw_text: String::new(),
            page_count: 0,
            normalized_text: String::new(),
            error: Some(error.into()),
            stage,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// OCR text is available but `normalized_text` holds an error message.
    pub fn normalization_failed(&self) -> bool {
        self.stage == PipelineStage::NormalizationFailed
    }
}

/// One step of batch progress, emitted after each document finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub document: String,
}

/// Marker inserted before each page's text (1-based page number).
pub fn page_marker(page_number: usize) -> String {
    format!("\n\n--- Page {} ---\n\n", page_number)
}

fn page_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\n--- Page (\d+) ---\n\n").expect("page marker regex is valid"))
}

/// Concatenate pages in index order, each preceded by its page marker.
pub fn assemble_raw_text(pages: &[PageText]) -> String {
    let mut ordered: Vec<&PageText> = pages.iter().collect();
    ordered.sort_by_key(|p| p.index);

    let mut out = String::new();
    for (i, page) in ordered.iter().enumerate() {
        out.push_str(&page_marker(i + 1));
        out.push_str(&page.markdown);
    }
    out
}

/// Recover `(page_number, text)` pairs from assembled raw text.
pub fn split_pages(raw_text: &str) -> Vec<(usize, String)> {
    let re = page_marker_regex();
    let markers: Vec<(usize, usize, usize)> = re
        .captures_iter(raw_text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?.as_str().parse().ok()?;
            Some((number, whole.start(), whole.end()))
        })
        .collect();

    markers
        .iter()
        .enumerate()
        .map(|(i, &(number, _, body_start))| {
            let body_end = markers
                .get(i + 1)
                .map(|&(_, next_start, _)| next_start)
                .unwrap_or(raw_text.len());
            (number, raw_text[body_start..body_end].to_string())
        })
        .collect()
}

/// Drives OCR and normalization for documents, one at a time.
pub struct DocumentPipeline {
    ocr: Arc<dyn OcrProvider>,
    chat: Arc<dyn ChatEngine>,
}

impl DocumentPipeline {
    pub fn new(ocr: Arc<dyn OcrProvider>, chat: Arc<dyn ChatEngine>) -> Self {
        Self { ocr, chat }
    }

    /// Process one encoded document. Never fails: errors end up in the result.
    pub async fn process(&self, name: &str, payload: &EncodedPayload) -> DocumentResult {
        debug!("{}: {:?}", name, PipelineStage::OcrInFlight);

        let pages = match self.run_ocr(payload).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!("{}: OCR failed: {}", name, e);
                return DocumentResult::failed(PipelineStage::OcrFailed, e.to_string());
            }
        };

        let page_count = pages.len();
        let raw_text = assemble_raw_text(&pages);
        drop(pages);
        info!(
            "{}: {:?} ({} pages, {} chars)",
            name,
            PipelineStage::OcrSucceeded,
            page_count,
            raw_text.len()
        );

        let (normalized_text, stage) = match self.normalize(&raw_text, page_count).await {
            Ok(text) => (text, PipelineStage::Done),
            Err(e) => {
                warn!("{}: normalization failed: {}", name, e);
                (e.to_string(), PipelineStage::NormalizationFailed)
            }
        };

        DocumentResult {
            raw_text,
            page_count,
            normalized_text,
            error: None,
            stage,
        }
    }

    async fn run_ocr(&self, payload: &EncodedPayload) -> Result<Vec<PageText>, PipelineError> {
        let pages = self
            .ocr
            .process(payload)
            .await
            .map_err(|e| PipelineError::Ocr(format!("{:#}", e)))?;

        if pages.is_empty() {
            return Err(PipelineError::Ocr(format!(
                "{} detected no text in the document",
                self.ocr.name()
            )));
        }
        Ok(pages)
    }

    async fn normalize(&self, raw_text: &str, page_count: usize) -> Result<String, PipelineError> {
        let messages = vec![
            Message::system(NORMALIZATION_SYSTEM_PROMPT),
            Message::user(normalization_user_prompt(raw_text, page_count)),
        ];
        self.chat
            .chat(messages)
            .await
            .map_err(|e| PipelineError::Normalization(format!("{:#}", e)))
    }

    /// Encode and process each document in order, storing every result.
    ///
    /// A failure on one document never stops the batch. `on_progress` is
    /// called after each document; the same steps are returned.
    pub async fn process_batch<F>(
        &self,
        documents: Vec<SourceDocument>,
        store: &mut ResultStore,
        mut on_progress: F,
    ) -> Vec<BatchProgress>
    where
        F: FnMut(&BatchProgress),
    {
        let total = documents.len();
        let mut steps = Vec::with_capacity(total);

        for (i, doc) in documents.into_iter().enumerate() {
            info!(
                "Processing {} ({}/{}, {} as {:?})",
                doc.name,
                i + 1,
                total,
                doc.media_type,
                doc.media_type.kind()
            );
            debug!("{}: {:?}", doc.name, PipelineStage::Pending);

            let name = doc.name.clone();
            let encoded = encode(&doc);
            drop(doc);

            let result = match encoded {
                Ok(payload) => self.process(&name, &payload).await,
                Err(e) => {
                    warn!("{}: {}", name, e);
                    DocumentResult::failed(PipelineStage::EncodingFailed, e.to_string())
                }
            };
            store.put(name.clone(), result);

            let step = BatchProgress {
                completed: i + 1,
                total,
                document: name,
            };
            on_progress(&step);
            steps.push(step);
        }

        let failed = steps
            .iter()
            .filter(|s| store.get(&s.document).map_or(false, DocumentResult::is_error))
            .count();
        info!("Batch complete: {} documents, {} failed", total, failed);
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{acquire_from_upload, MediaType};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// OCR double that replays scripted outcomes, one per call.
    struct ScriptedOcr {
        outcomes: Mutex<VecDeque<Result<Vec<PageText>, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedOcr {
        fn new(outcomes: Vec<Result<Vec<PageText>, String>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl OcrProvider for ScriptedOcr {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn process(&self, _payload: &EncodedPayload) -> anyhow::Result<Vec<PageText>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcomes.lock().unwrap().pop_front() {
                Some(Ok(pages)) => Ok(pages),
                Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
                None => Err(anyhow::anyhow!("no scripted outcome left")),
            }
        }
    }

    struct MockChat {
        fail: bool,
        calls: AtomicUsize,
        last_messages: Mutex<Vec<Message>>,
    }

    impl MockChat {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                calls: AtomicUsize::new(0),
                last_messages: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                calls: AtomicUsize::new(0),
                last_messages: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatEngine for MockChat {
        async fn chat(&self, messages: Vec<Message>) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_messages.lock().unwrap() = messages;
            if self.fail {
                anyhow::bail!("service unavailable");
            }
            Ok("testo normalizzato".to_string())
        }
    }

    fn pages(texts: &[&str]) -> Vec<PageText> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| PageText {
                index: i as u32,
                markdown: t.to_string(),
            })
            .collect()
    }

    fn payload() -> EncodedPayload {
        encode(&acquire_from_upload("doc.pdf", b"%PDF".to_vec(), MediaType::Pdf)).unwrap()
    }

    #[test]
    fn test_assemble_inserts_one_marker_per_page() {
        let raw = assemble_raw_text(&pages(&["uno", "due", "tre"]));
        assert_eq!(
            raw,
            "\n\n--- Page 1 ---\n\nuno\n\n--- Page 2 ---\n\ndue\n\n--- Page 3 ---\n\ntre"
        );
        assert_eq!(raw.matches("--- Page ").count(), 3);
    }

    #[test]
    fn test_assemble_orders_by_index() {
        let shuffled = vec![
            PageText { index: 1, markdown: "b".into() },
            PageText { index: 0, markdown: "a".into() },
        ];
        assert_eq!(
            assemble_raw_text(&shuffled),
            "\n\n--- Page 1 ---\n\na\n\n--- Page 2 ---\n\nb"
        );
    }

    #[test]
    fn test_split_pages_recovers_boundaries() {
        let raw = assemble_raw_text(&pages(&["Incipit", "", "Explicit\n\nfinis"]));
        let split = split_pages(&raw);
        assert_eq!(
            split,
            vec![
                (1, "Incipit".to_string()),
                (2, String::new()),
                (3, "Explicit\n\nfinis".to_string()),
            ]
        );
        assert!(split_pages("no markers here").is_empty());
    }

    #[tokio::test]
    async fn test_success_path() {
        let ocr = ScriptedOcr::new(vec![Ok(pages(&["carta 1r", "carta 1v"]))]);
        let chat = MockChat::ok();
        let pipeline = DocumentPipeline::new(ocr.clone(), chat.clone());

        let result = pipeline.process("doc.pdf", &payload()).await;

        assert_eq!(result.stage, PipelineStage::Done);
        assert_eq!(result.page_count, 2);
        assert!(result.error.is_none());
        assert_eq!(result.normalized_text, "testo normalizzato");
        assert_eq!(split_pages(&result.raw_text).len(), 2);

        let messages = chat.last_messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::system(NORMALIZATION_SYSTEM_PROMPT));
        assert!(messages[1].content.contains(&result.raw_text));
        assert!(messages[1].content.contains("2 pagine"));
    }

    #[tokio::test]
    async fn test_single_image_has_one_marker() {
        let ocr = ScriptedOcr::new(vec![Ok(pages(&["Lettera"]))]);
        let pipeline = DocumentPipeline::new(ocr, MockChat::ok());
        let image = encode(&acquire_from_upload("f.jpg", vec![0xFF, 0xD8], MediaType::Jpeg)).unwrap();

        let result = pipeline.process("f.jpg", &image).await;

        assert_eq!(result.page_count, 1);
        assert_eq!(result.raw_text, "\n\n--- Page 1 ---\n\nLettera");
    }

    #[tokio::test]
    async fn test_zero_pages_is_ocr_failure() {
        let ocr = ScriptedOcr::new(vec![Ok(Vec::new())]);
        let chat = MockChat::ok();
        let pipeline = DocumentPipeline::new(ocr, chat.clone());

        let result = pipeline.process("blank.png", &payload()).await;

        assert_eq!(result.stage, PipelineStage::OcrFailed);
        assert!(result.error.is_some());
        assert!(result.raw_text.is_empty());
        assert!(result.normalized_text.is_empty());
        assert_eq!(result.page_count, 0);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ocr_error_skips_chat() {
        let ocr = ScriptedOcr::new(vec![Err("401 Unauthorized".to_string())]);
        let chat = MockChat::ok();
        let pipeline = DocumentPipeline::new(ocr, chat.clone());

        let result = pipeline.process("doc.pdf", &payload()).await;

        assert!(result.is_error());
        assert!(result.error.as_deref().unwrap().contains("401 Unauthorized"));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chat_failure_keeps_raw_text() {
        let ocr = ScriptedOcr::new(vec![Ok(pages(&["Item", "Item secundum"]))]);
        let pipeline = DocumentPipeline::new(ocr, MockChat::failing());

        let result = pipeline.process("doc.pdf", &payload()).await;

        assert!(result.error.is_none());
        assert!(result.normalization_failed());
        assert_eq!(result.raw_text, assemble_raw_text(&pages(&["Item", "Item secundum"])));
        assert_eq!(result.page_count, 2);
        assert!(result.normalized_text.starts_with("Normalization error:"));
        assert!(result.normalized_text.contains("service unavailable"));
    }

    #[tokio::test]
    async fn test_batch_continues_after_ocr_failure() {
        let ocr = ScriptedOcr::new(vec![
            Ok(pages(&["primo"])),
            Err("timeout".to_string()),
            Ok(pages(&["terzo", "quarto"])),
        ]);
        let chat = MockChat::ok();
        let pipeline = DocumentPipeline::new(ocr.clone(), chat.clone());
        let mut store = ResultStore::new();

        let docs = vec![
            acquire_from_upload("a.png", vec![1], MediaType::Png),
            acquire_from_upload("b.png", vec![2], MediaType::Png),
            acquire_from_upload("c.pdf", vec![3], MediaType::Pdf),
        ];

        let mut seen = Vec::new();
        let steps = pipeline
            .process_batch(docs, &mut store, |p| seen.push((p.completed, p.total)))
            .await;

        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(steps.len(), 3);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 3);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);

        let names: Vec<&str> = store.all().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.pdf"]);

        let a = store.get("a.png").unwrap();
        assert_eq!(a.stage, PipelineStage::Done);
        assert_eq!(a.page_count, 1);

        let b = store.get("b.png").unwrap();
        assert_eq!(b.stage, PipelineStage::OcrFailed);
        assert!(b.raw_text.is_empty());

        let c = store.get("c.pdf").unwrap();
        assert_eq!(c.stage, PipelineStage::Done);
        assert_eq!(c.page_count, 2);
    }
}
