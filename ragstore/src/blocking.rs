//! Synchronous facade over [`crate::Rag`].
//!
//! Owns a current-thread runtime so callers running a plain blocking loop can
//! submit documents one at a time.

use confluence_rag_types::Document;
use tokio::runtime::{Builder, Runtime};

use crate::{AddOutcome, RagConfig, StoreResult};

pub struct Rag {
    runtime: Runtime,
    inner: crate::Rag,
}

impl Rag {
    pub fn connect(config: RagConfig) -> StoreResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let inner = runtime.block_on(crate::Rag::connect(config))?;
        Ok(Self { runtime, inner })
    }

    pub fn add_document(&self, document: Document) -> StoreResult<AddOutcome> {
        self.runtime.block_on(self.inner.add_document(document))
    }
}

impl Drop for Rag {
    fn drop(&mut self) {
        self.runtime.block_on(self.inner.close());
    }
}
