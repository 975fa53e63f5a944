use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::commons::CommonsClient;
use crate::domain::{InputSet, SubmissionBundle, SubmissionStatus};
use crate::error::BridgeError;

/// Lazily pages through the submissions of one evaluation queue that carry a
/// given status. A page is fetched only when the previous one is drained.
pub struct SubmissionQueue<'a, C: CommonsClient + ?Sized> {
    commons: &'a C,
    evaluation_id: String,
    status: SubmissionStatus,
    page_size: usize,
    offset: usize,
    buffer: VecDeque<SubmissionBundle>,
    exhausted: bool,
}

impl<'a, C: CommonsClient + ?Sized> SubmissionQueue<'a, C> {
    pub fn new(
        commons: &'a C,
        evaluation_id: impl Into<String>,
        status: SubmissionStatus,
        page_size: usize,
    ) -> Self {
        Self {
            commons,
            evaluation_id: evaluation_id.into(),
            status,
            page_size: page_size.max(1),
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch_page(&mut self) -> Result<(), BridgeError> {
        let page = self.commons.submission_bundles(
            &self.evaluation_id,
            &self.status,
            self.offset,
            self.page_size,
        )?;
        let received = page.bundles.len();
        tracing::debug!(
            evaluation_id = %self.evaluation_id,
            offset = self.offset,
            received,
            total = page.total,
            "submission page"
        );
        self.offset += received;
        if received < self.page_size || self.offset >= page.total {
            self.exhausted = true;
        }
        self.buffer.extend(page.bundles);
        Ok(())
    }
}

impl<C: CommonsClient + ?Sized> Iterator for SubmissionQueue<'_, C> {
    type Item = Result<SubmissionBundle, BridgeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// Parses the file attached to a submission into workflow inputs.
pub fn read_descriptor(path: Option<&Path>) -> Result<InputSet, BridgeError> {
    let path = path.ok_or_else(|| {
        BridgeError::Validation("submission has no attached descriptor".to_string())
    })?;
    let content = fs::read_to_string(path)
        .map_err(|err| BridgeError::Validation(format!("{}: {err}", path.display())))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|err| BridgeError::Validation(format!("{}: {err}", path.display())))?;
    InputSet::from_json(value)
}
