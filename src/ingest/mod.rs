//! Report ingestion: document text, chunking, model output repair and
//! event extraction.
//!
//! ```text
//! PDF bytes → document → chunker → extractor ⇄ gateway
//!                                      ↓
//!                                    repair → DisruptionEvent[]
//! ```

pub mod chunker;
pub mod document;
pub mod extractor;
pub mod repair;

pub use chunker::{chunk_text, split_paragraphs};
pub use document::{DocumentExtractor, DocumentText, ExtractionError, PdfTextExtractor};
pub use extractor::{ChunkError, ChunkFailure, EventExtractor, ExtractionReport};
pub use repair::{repair_json, RepairError, RepairStrategy, Repaired};
