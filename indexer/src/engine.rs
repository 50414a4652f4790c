use anyhow::{Context, Result};
use confluence_rag_store::{AddOutcome, blocking::Rag};
use confluence_rag_types::Document;
use tracing::{debug, info};

use crate::classify::Classifier;

/// Produces the pages of one wiki space, one document at a time.
pub trait PageSource {
    fn get_pages<'a>(&'a self, space: &str) -> Box<dyn Iterator<Item = Result<Document>> + 'a>;
}

/// Takes ownership of a classified document for embedding and persistence.
pub trait DocumentStore {
    fn add_document(&mut self, document: Document) -> Result<()>;
}

impl DocumentStore for Rag {
    fn add_document(&mut self, document: Document) -> Result<()> {
        let id = document.id.clone();
        let outcome = Rag::add_document(self, document)
            .with_context(|| format!("failed to store document {id}"))?;
        if outcome == AddOutcome::Unchanged {
            debug!(%id, "stored document already up to date");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub spaces: usize,
    pub seen: usize,
    pub skipped_by_title: usize,
    pub skipped_by_label: usize,
    pub stored: usize,
}

pub struct Indexer<S, C, D> {
    spaces: Vec<String>,
    ignore_classifications: Vec<String>,
    source: S,
    classifier: C,
    store: D,
}

impl<S, C, D> Indexer<S, C, D>
where
    S: PageSource,
    C: Classifier,
    D: DocumentStore,
{
    pub fn new(
        spaces: Vec<String>,
        ignore_classifications: Vec<String>,
        source: S,
        classifier: C,
        store: D,
    ) -> Self {
        Self {
            spaces,
            ignore_classifications,
            source,
            classifier,
            store,
        }
    }

    /// Runs fetch, classify, filter and store over every configured space.
    ///
    /// The first collaborator error aborts the run.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for space in &self.spaces {
            summary.spaces += 1;
            info!(%space, "indexing space");

            for document in self.source.get_pages(space) {
                let mut document =
                    document.with_context(|| format!("failed to fetch pages for space {space}"))?;
                summary.seen += 1;

                if title_is_ignored(&document.title, &self.ignore_classifications) {
                    summary.skipped_by_title += 1;
                    continue;
                }

                let category = self
                    .classifier
                    .classify(&document.content)
                    .with_context(|| format!("failed to classify \"{}\"", document.title))?;

                if self.ignore_classifications.contains(&category) {
                    info!(title = %document.title, %category, "ignoring document");
                    summary.skipped_by_label += 1;
                    continue;
                }

                info!(title = %document.title, %category, "classified document");
                document.content = category;

                let stored_content = document.content.clone();
                self.store.add_document(document)?;
                debug!(content = %stored_content, "stored document");
                summary.stored += 1;
            }
        }

        Ok(summary)
    }

    #[cfg(test)]
    fn into_parts(self) -> (S, C, D) {
        (self.source, self.classifier, self.store)
    }
}

// Every ignore term is checked and logged, not just the first match.
fn title_is_ignored(title: &str, ignore_classifications: &[String]) -> bool {
    let mut ignored = false;
    for ignore in ignore_classifications {
        if title.contains(ignore.as_str()) {
            info!(%title, term = %ignore, "skipping document by title");
            ignored = true;
        }
    }
    ignored
}
