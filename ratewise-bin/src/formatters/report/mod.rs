mod json;
mod text;

pub(crate) use json::Json;
pub(crate) use text::Text;

use crate::report::{FetchReport, StatusReport};
use anyhow::Result;

pub(crate) trait ReportFormatter {
    /// Format the outcome of a `fetch` run
    fn format_fetch(&self, report: &FetchReport) -> Result<String>;

    /// Format the effective configuration and classified targets
    fn format_status(&self, report: &StatusReport) -> Result<String>;
}
