use std::path::Path;

use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::element::Element as CrElement;

use crate::error::{Error, Result};

/// A resolved form control on a chromium page.
pub(crate) struct FormElement {
    inner: CrElement,
}

impl FormElement {
    pub(crate) fn new(inner: CrElement) -> Self {
        Self { inner }
    }

    /// Click (scrolls into view first).
    pub(crate) async fn click(&self) -> Result<()> {
        self.inner.click().await?;
        Ok(())
    }

    /// Focus by clicking, then type `text` key by key so page listeners see
    /// real input events.
    pub(crate) async fn enter_text(&self, text: &str) -> Result<()> {
        self.inner.click().await?;
        self.inner.type_str(text).await?;
        Ok(())
    }

    /// CDP command attaching `path` to this `<input type="file">`.
    pub(crate) fn attach_file(&self, path: &Path) -> Result<SetFileInputFilesParams> {
        let absolute = std::path::absolute(path)?;
        SetFileInputFilesParams::builder()
            .files(vec![absolute.to_string_lossy().into_owned()])
            .backend_node_id(self.inner.backend_node_id.clone())
            .build()
            .map_err(Error::JsError)
    }
}
