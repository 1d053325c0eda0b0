use anyhow::{Context, Result};

use super::ReportFormatter;
use crate::report::{FetchReport, StatusReport};

pub(crate) struct Json;

impl Json {
    pub(crate) const fn new() -> Self {
        Self {}
    }
}

impl ReportFormatter for Json {
    fn format_fetch(&self, report: &FetchReport) -> Result<String> {
        serde_json::to_string_pretty(report).context("Cannot format report as JSON")
    }

    fn format_status(&self, report: &StatusReport) -> Result<String> {
        serde_json::to_string_pretty(report).context("Cannot format status as JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RequestOutcome;
    use ratewise_lib::{EndpointKey, StatusSummary};
    use std::collections::BTreeMap;

    #[test]
    fn test_fetch_report_as_json() {
        let report = FetchReport {
            results: vec![RequestOutcome {
                url: "https://api.nori.fish/items".to_string(),
                endpoint: EndpointKey::from("nori_fish_api"),
                status: Some(200),
                attempts: Some(1),
                error: None,
            }],
            summary: StatusSummary {
                endpoints: BTreeMap::new(),
                credentials: None,
                queue: None,
            },
        };

        let json: serde_json::Value =
            serde_json::from_str(&Json::new().format_fetch(&report).unwrap()).unwrap();
        assert_eq!(json["results"][0]["endpoint"], "nori_fish_api");
        assert_eq!(json["results"][0]["status"], 200);
        assert!(json["summary"]["queue"].is_null());
    }
}
