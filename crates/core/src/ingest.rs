use crate::error::LoadError;
use crate::extractor::PdfExtractor;
use crate::models::SourceDocument;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Lists the `*.pdf` files sitting directly in `folder`, sorted by path.
pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug)]
pub struct LoadReport {
    pub documents: Vec<SourceDocument>,
    pub files: usize,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Loads every page of every pdf in `folder` as a [`SourceDocument`].
///
/// A file that fails to parse is recorded in [`LoadReport::skipped_files`]
/// and the rest of the batch continues. The call only fails when the folder
/// is missing, holds no pdf files, or nothing readable came out of it.
pub fn load_documents(
    folder: &Path,
    extractor: &dyn PdfExtractor,
) -> Result<LoadReport, LoadError> {
    if !folder.is_dir() {
        return Err(LoadError::MissingDirectory(folder.to_path_buf()));
    }

    let files = discover_pdf_files(folder);
    if files.is_empty() {
        return Err(LoadError::NoDocuments(folder.to_path_buf()));
    }

    let file_count = files.len();
    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        match load_file(&path, extractor) {
            Ok(pages) => {
                debug!(path = %path.display(), pages = pages.len(), "loaded pdf");
                documents.extend(pages);
            }
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipped pdf");
                skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    if documents.is_empty() {
        return Err(LoadError::NothingReadable {
            folder: folder.to_path_buf(),
            skipped: skipped_files.len(),
        });
    }

    Ok(LoadReport {
        documents,
        files: file_count,
        skipped_files,
    })
}

fn load_file(path: &Path, extractor: &dyn PdfExtractor) -> Result<Vec<SourceDocument>, LoadError> {
    let pages = extractor.extract_pages(path)?;
    let source_id = path.to_string_lossy().to_string();
    let total_pages = pages.len().to_string();

    Ok(pages
        .into_iter()
        .map(|page| {
            let mut metadata = BTreeMap::new();
            metadata.insert("page".to_string(), page.number.to_string());
            metadata.insert("total_pages".to_string(), total_pages.clone());

            SourceDocument {
                text: page.text,
                source_id: source_id.clone(),
                metadata,
            }
        })
        .collect())
}
