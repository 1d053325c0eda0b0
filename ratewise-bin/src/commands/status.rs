use anyhow::Result;

use crate::options::Config;
use crate::report::{StatusReport, TargetStatus};

/// Resolve the effective configuration and classify `targets` without
/// sending any request
pub(crate) fn status(targets: &[String], cfg: &Config) -> Result<StatusReport> {
    let config = cfg.rate_limit_config();
    let classifier = config.classifier()?;

    let targets = targets
        .iter()
        .map(|target| {
            let endpoint = classifier.classify(target);
            let settings = config.settings_for(&endpoint);
            TargetStatus {
                target: target.clone(),
                endpoint,
                settings,
            }
        })
        .collect();

    Ok(StatusReport {
        credentials: cfg.credentials.len(),
        config,
        targets,
    })
}
