use anyhow::{Context, Result};
use ratewise_lib::{CredentialStatus, EndpointStatus, StatusSummary};
use std::fmt::{self, Display};

use super::ReportFormatter;
use crate::report::{FetchReport, RequestOutcome, StatusReport};

pub(crate) struct Text;

impl Text {
    pub(crate) const fn new() -> Self {
        Self {}
    }
}

impl ReportFormatter for Text {
    fn format_fetch(&self, report: &FetchReport) -> Result<String> {
        Ok(TextFetchReport(report).to_string())
    }

    fn format_status(&self, report: &StatusReport) -> Result<String> {
        let config =
            toml::to_string_pretty(&report.config).context("Cannot format configuration as TOML")?;
        let mut out = format!("{config}\ncredentials: {}\n", report.credentials);
        if !report.targets.is_empty() {
            out.push('\n');
        }
        for target in &report.targets {
            let settings = &target.settings;
            out.push_str(&format!(
                "{} -> {} (delay {}, throttle at {}, {} retries, connect timeout {}, read timeout {})\n",
                target.target,
                target.endpoint,
                humantime::format_duration(settings.delay),
                settings.throttle_threshold,
                settings.max_retries,
                humantime::format_duration(settings.connect_timeout),
                humantime::format_duration(settings.read_timeout),
            ));
        }
        Ok(out)
    }
}

struct TextFetchReport<'a>(&'a FetchReport);

impl Display for TextFetchReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        for outcome in &report.results {
            writeln!(f, "{}", TextOutcome(outcome))?;
        }

        let failures = report.failures();
        let failure_str = if failures == 1 { "Failure" } else { "Failures" };
        writeln!(
            f,
            "\n🔍 {} Total ✅ {} OK 🚫 {failures} {failure_str}",
            report.results.len(),
            report.successes(),
        )?;

        write!(f, "{}", TextSummary(&report.summary))
    }
}

struct TextOutcome<'a>(&'a RequestOutcome);

impl Display for TextOutcome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = self.0;
        match (&outcome.status, &outcome.error) {
            (Some(status), _) => write!(f, "[{status}] {}", outcome.url)?,
            (None, Some(error)) => write!(f, "[ERROR] {} | {error}", outcome.url)?,
            (None, None) => write!(f, "[ERROR] {}", outcome.url)?,
        }
        write!(f, " ({}", outcome.endpoint)?;
        if let Some(attempts) = outcome.attempts {
            let attempt_str = if attempts == 1 { "attempt" } else { "attempts" };
            write!(f, ", {attempts} {attempt_str}")?;
        }
        write!(f, ")")
    }
}

struct TextSummary<'a>(&'a StatusSummary);

impl Display for TextSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.0;

        if !summary.endpoints.is_empty() {
            writeln!(f, "\nEndpoints")?;
            for (key, status) in &summary.endpoints {
                writeln!(f, "  {key}: {}", TextQuota::from(status))?;
            }
        }

        if let Some(credentials) = &summary.credentials {
            writeln!(f, "\nCredentials")?;
            for credential in credentials {
                writeln!(f, "  {}", TextCredential(credential))?;
            }
        }

        if let Some(queue) = &summary.queue {
            writeln!(f, "\nQueue: {}/{} waiting", queue.size, queue.capacity)?;
        }
        Ok(())
    }
}

/// Quota part shared by endpoints and credentials
struct TextQuota {
    limit: Option<u64>,
    remaining: Option<i64>,
    reset_in_seconds: u64,
    is_rate_limited: bool,
    extra: Option<&'static str>,
}

impl From<&EndpointStatus> for TextQuota {
    fn from(status: &EndpointStatus) -> Self {
        Self {
            limit: status.limit,
            remaining: status.remaining,
            reset_in_seconds: status.reset_in_seconds,
            is_rate_limited: status.is_rate_limited,
            extra: status.cache_valid.then_some("cache valid"),
        }
    }
}

impl From<&CredentialStatus> for TextQuota {
    fn from(status: &CredentialStatus) -> Self {
        Self {
            limit: status.limit,
            remaining: status.remaining,
            reset_in_seconds: status.reset_in_seconds,
            is_rate_limited: status.is_rate_limited,
            extra: status.is_current.then_some("current"),
        }
    }
}

impl Display for TextQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) => write!(f, "{remaining}/{limit} remaining")?,
            (Some(remaining), None) => write!(f, "{remaining} remaining")?,
            _ => write!(f, "no quota reported")?,
        }
        if self.reset_in_seconds > 0 {
            write!(f, ", resets in {}s", self.reset_in_seconds)?;
        }
        if self.is_rate_limited {
            write!(f, ", rate limited")?;
        }
        if let Some(extra) = self.extra {
            write!(f, ", {extra}")?;
        }
        Ok(())
    }
}

struct TextCredential<'a>(&'a CredentialStatus);

impl Display for TextCredential<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let credential = self.0;
        write!(
            f,
            "#{} {}: {}",
            credential.index,
            credential.token,
            TextQuota::from(credential)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ratewise_lib::{EndpointKey, QueueStatus};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn endpoint_status(remaining: i64) -> EndpointStatus {
        EndpointStatus {
            limit: Some(60),
            remaining: Some(remaining),
            reset_in_seconds: 30,
            is_rate_limited: remaining <= 0,
            should_throttle: remaining <= 10,
            cache_ttl: Some(Duration::from_secs(300)),
            cache_expires: None,
            api_version: None,
            last_request_at: None,
            cache_valid: true,
        }
    }

    #[test]
    fn test_fetch_report() {
        let report = FetchReport {
            results: vec![
                RequestOutcome {
                    url: "https://api.wynncraft.com/v3/item/search".to_string(),
                    endpoint: EndpointKey::from("wynncraft_api_v3"),
                    status: Some(200),
                    attempts: Some(1),
                    error: None,
                },
                RequestOutcome {
                    url: "https://api.nori.fish/items".to_string(),
                    endpoint: EndpointKey::from("nori_fish_api"),
                    status: None,
                    attempts: Some(3),
                    error: Some("rate limited".to_string()),
                },
            ],
            summary: StatusSummary {
                endpoints: BTreeMap::from([
                    (EndpointKey::from("nori_fish_api"), endpoint_status(0)),
                    (EndpointKey::from("wynncraft_api_v3"), endpoint_status(59)),
                ]),
                credentials: None,
                queue: Some(QueueStatus {
                    size: 0,
                    capacity: 1000,
                    is_full: false,
                    is_empty: true,
                }),
            },
        };

        let expected = "\
[200] https://api.wynncraft.com/v3/item/search (wynncraft_api_v3, 1 attempt)
[ERROR] https://api.nori.fish/items | rate limited (nori_fish_api, 3 attempts)

🔍 2 Total ✅ 1 OK 🚫 1 Failure

Endpoints
  nori_fish_api: 0/60 remaining, resets in 30s, rate limited, cache valid
  wynncraft_api_v3: 59/60 remaining, resets in 30s, cache valid

Queue: 0/1000 waiting
";
        assert_eq!(Text::new().format_fetch(&report).unwrap(), expected);
    }

    #[test]
    fn test_credential_line() {
        let credential = CredentialStatus {
            index: 1,
            token: "****cdef".to_string(),
            is_current: true,
            limit: None,
            remaining: Some(4),
            reset_in_seconds: 0,
            is_rate_limited: false,
            should_throttle: false,
        };
        assert_eq!(
            TextCredential(&credential).to_string(),
            "#1 ****cdef: 4 remaining, current"
        );
    }
}
