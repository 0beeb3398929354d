//! inspect-document: page count and page selection.

use async_trait::async_trait;
use mf_av::EngineTask;
use mf_core::{EngineErrorKind, Error, RejectionKind};

use crate::artifact::StageArtifact;
use crate::context::StageContext;
use crate::stage::Stage;

/// Count the document's pages and select the ones to render.
///
/// Emits one artifact per selected page, all pointing at the document.
#[derive(Debug, Default)]
pub struct InspectDocument;

#[async_trait]
impl Stage for InspectDocument {
    fn name(&self) -> &'static str {
        "inspect-document"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        input: Vec<StageArtifact>,
    ) -> mf_core::Result<Vec<StageArtifact>> {
        let document = super::single(self.name(), input)?;

        let invocation = ctx
            .invoke(EngineTask::CountPages {
                input: document.path.clone(),
            })
            .await?;
        let page_count: u32 = invocation
            .stdout_last_line()
            .and_then(|line| line.parse().ok())
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                Error::engine(
                    EngineErrorKind::Crashed,
                    invocation.engine.clone(),
                    "could not read the page count",
                )
            })?;

        let pages: Vec<u32> = match ctx.options.pages {
            Some(range) => range.indices(page_count),
            None => (0..page_count).collect(),
        };

        if pages.is_empty() {
            return Err(Error::rejected(
                RejectionKind::DimensionLimitExceeded,
                format!("no requested page exists in a {page_count}-page document"),
            ));
        }
        if pages.len() > ctx.limits.max_pages as usize {
            return Err(Error::rejected(
                RejectionKind::DimensionLimitExceeded,
                format!(
                    "{} pages selected, limit is {}",
                    pages.len(),
                    ctx.limits.max_pages
                ),
            ));
        }

        tracing::debug!(
            job_id = %ctx.job_id,
            "Document has {page_count} pages, rendering {}",
            pages.len()
        );

        Ok(pages
            .into_iter()
            .map(|page| StageArtifact::new(document.path.clone(), document.format).with_page(page))
            .collect())
    }

    fn weight(&self) -> f32 {
        0.5
    }
}
