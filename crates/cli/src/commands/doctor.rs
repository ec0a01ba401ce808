use callquote_core::config::{AppConfig, LlmProvider, LoadOptions};
use callquote_db::connect_with_settings;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_language_model(&config));
            checks.push(check_tool_gateway(&config));
            checks.push(check_conversation_store(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["language_model", "tool_gateway", "conversation_store"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Credentials were validated at load time; this reports what will answer
/// extraction requests.
fn check_language_model(config: &AppConfig) -> DoctorCheck {
    let details = match config.llm.provider {
        LlmProvider::RuleBased => {
            "rule_based provider: offline keyword extraction, no network calls".to_string()
        }
        provider => format!(
            "{} provider with model `{}` at {} (timeout {}s)",
            provider.as_str(),
            config.llm.model,
            config.llm.base_url.as_deref().unwrap_or("the provider default endpoint"),
            config.llm.timeout_secs
        ),
    };
    DoctorCheck { name: "language_model", status: CheckStatus::Pass, details }
}

fn check_tool_gateway(config: &AppConfig) -> DoctorCheck {
    let credentials = if config.tools.api_key.is_some() { "with" } else { "without" };
    DoctorCheck {
        name: "tool_gateway",
        status: CheckStatus::Pass,
        details: format!(
            "tool servers at {} {credentials} an api key (timeout {}s)",
            config.tools.base_url, config.tools.timeout_secs
        ),
    }
}

fn check_conversation_store(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "conversation_store",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let schema = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM conversation_state")
            .fetch_one(&pool)
            .await;
        pool.close().await;
        schema.map_err(|_| "connected, but the schema is missing; run `callquote migrate`".to_string())
    });

    match result {
        Ok(records) => DoctorCheck {
            name: "conversation_store",
            status: CheckStatus::Pass,
            details: format!("connected using `{}` ({records} conversation record(s))", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "conversation_store", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
