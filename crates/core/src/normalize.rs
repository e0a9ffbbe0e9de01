use crate::models::SourceDocument;

/// Keeps only `text` and `source_id` on every document.
///
/// Loader-specific metadata never reaches the index payload, so the stored
/// entries stay the same shape whichever extractor produced the pages.
pub fn normalize_metadata(documents: Vec<SourceDocument>) -> Vec<SourceDocument> {
    documents
        .into_iter()
        .map(|document| SourceDocument::new(document.text, document.source_id))
        .collect()
}
