//! Output formatting for CLI commands.
//!
//! Formatters return strings; `main` decides where they go. JSON mode
//! serializes stable shapes for scripting, text mode uses colored tables.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::engine::ExecutionResult;
use crate::planner::{ActionType, DiffResult, Plan};
use crate::state::StackState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanEntryRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// State record row for table display.
#[derive(Tabled)]
struct StateRecordRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, diff: &DiffResult, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan, diff, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, diff: &DiffResult, detailed: bool) -> String {
        if plan.is_noop() {
            return format!(
                "{} No changes required - stack is up to date.\n",
                "✓".green()
            );
        }

        let mut output = format!("\nPlan for stack {}\n\n", plan.stack.bold());

        let rows: Vec<PlanEntryRow> = plan
            .entries
            .iter()
            .filter(|e| e.action != ActionType::Noop)
            .enumerate()
            .map(|(i, e)| PlanEntryRow {
                index: i + 1,
                action: Self::format_action_type(e.action),
                resource: e.logical_name.clone(),
                type_token: Self::truncate(&e.type_token, 30),
                reason: Self::truncate(&e.reason, 40),
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if detailed {
            for resource_diff in diff.actionable_diffs() {
                if resource_diff.details.is_empty() {
                    continue;
                }
                let _ = writeln!(output, "\n  {}:", resource_diff.name.bold());
                for detail in &resource_diff.details {
                    let _ = writeln!(
                        output,
                        "    {}: {} -> {}",
                        detail.field,
                        detail.old_value.as_deref().unwrap_or("<none>").red(),
                        detail.new_value.as_deref().unwrap_or("<none>").green(),
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            plan.count(ActionType::Create).to_string().green(),
            plan.count(ActionType::Update).to_string().yellow(),
            plan.count(ActionType::Delete).to_string().red(),
            plan.count(ActionType::Noop),
        );

        output
    }

    /// Formats an execution result for display.
    #[must_use]
    pub fn format_result(&self, result: &ExecutionResult) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&ResultJson::from(result)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_result_text(result),
        }
    }

    /// Formats an execution result as text.
    fn format_result_text(result: &ExecutionResult) -> String {
        let status = if result.success {
            format!("{} Apply complete", "✓".green())
        } else if result.aborted {
            format!("{} Apply aborted", "⚠".yellow())
        } else {
            format!("{} Apply failed", "✗".red())
        };

        let mut output = format!("\n{status}\n\n");
        let _ = writeln!(output, "   Created:   {}", result.created);
        let _ = writeln!(output, "   Updated:   {}", result.updated);
        let _ = writeln!(output, "   Deleted:   {}", result.deleted);
        let _ = writeln!(output, "   Unchanged: {}", result.unchanged);

        let failures: Vec<_> = result
            .results
            .iter()
            .filter(|r| r.error.is_some())
            .collect();
        if !failures.is_empty() {
            let _ = write!(output, "\n{} Problems:\n", "⚠".yellow());
            for failure in failures {
                let _ = writeln!(
                    output,
                    "   - {} ({}): {}",
                    failure.logical_name,
                    failure.action,
                    failure.error.as_deref().unwrap_or("unknown"),
                );
            }
        }

        output
    }

    /// Formats stack state for display.
    #[must_use]
    pub fn format_state(&self, state: &StackState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("\nState for stack {}\n\n", state.stack.bold());
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.records.len());

                if !state.records.is_empty() {
                    let mut rows: Vec<StateRecordRow> = state
                        .records
                        .values()
                        .map(|r| StateRecordRow {
                            name: r.logical_name.clone(),
                            type_token: Self::truncate(&r.type_token, 30),
                            id: Self::truncate(&r.resource_id, 24),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    rows.sort_by(|a, b| a.name.cmp(&b.name));
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history:");
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} resources)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.len(),
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::json!({ "status": "success", "message": message }).to_string()
            }
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::json!({ "status": "error", "message": message }).to_string()
            }
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::json!({ "status": "warning", "message": message }).to_string()
            }
            OutputFormat::Text => format!("{} {message}", "⚠".yellow()),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action: ActionType) -> String {
        match action {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::Noop => "noop".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum byte length, on a char boundary.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.len() <= max_len {
            return s.to_string();
        }
        let budget = max_len.saturating_sub(3);
        let mut cut = 0;
        for (offset, c) in s.char_indices() {
            if offset + c.len_utf8() > budget {
                break;
            }
            cut = offset + c.len_utf8();
        }
        format!("{}...", &s[..cut])
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    stack: String,
    creates: usize,
    updates: usize,
    deletes: usize,
    unchanged: usize,
    entries: Vec<EntryJson>,
}

#[derive(serde::Serialize)]
struct EntryJson {
    action: String,
    resource: String,
    #[serde(rename = "type")]
    type_token: String,
    reason: String,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            stack: plan.stack.clone(),
            creates: plan.count(ActionType::Create),
            updates: plan.count(ActionType::Update),
            deletes: plan.count(ActionType::Delete),
            unchanged: plan.count(ActionType::Noop),
            entries: plan
                .entries
                .iter()
                .map(|e| EntryJson {
                    action: e.action.to_string(),
                    resource: e.logical_name.clone(),
                    type_token: e.type_token.clone(),
                    reason: e.reason.clone(),
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
struct ResultJson {
    success: bool,
    aborted: bool,
    created: usize,
    updated: usize,
    deleted: usize,
    unchanged: usize,
    failed: usize,
    skipped: usize,
    failures: Vec<FailureJson>,
}

#[derive(serde::Serialize)]
struct FailureJson {
    resource: String,
    action: String,
    error: String,
}

impl From<&ExecutionResult> for ResultJson {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            success: result.success,
            aborted: result.aborted,
            created: result.created,
            updated: result.updated,
            deleted: result.deleted,
            unchanged: result.unchanged,
            failed: result.failed,
            skipped: result.skipped,
            failures: result
                .results
                .iter()
                .filter(|r| r.error.is_some())
                .map(|r| FailureJson {
                    resource: r.logical_name.clone(),
                    action: r.action.to_string(),
                    error: r.error.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::planner::{DiffEngine, DiffType};
    use crate::provider::ProviderRegistry;
    use crate::resource::ResourceSet;
    use serde_json::json;

    #[test]
    fn test_noop_plan_reports_up_to_date() {
        let set = ResourceSet::new();
        let graph = DependencyGraph::build(&set).expect("graph");
        let diff = DiffEngine::new().compute(&set, None, &ProviderRegistry::new());
        let plan = Plan::from_diff("demo", &diff, &set, &graph, None);

        let formatter = OutputFormatter::new(OutputFormat::Text);
        let text = formatter.format_plan(&plan, &diff, false);
        assert!(text.contains("up to date"));
    }

    #[test]
    fn test_json_plan_is_machine_readable() {
        let mut set = ResourceSet::new();
        set.declare("test:core/Thing", "base", &json!({"x": 1}), vec![])
            .expect("declare");
        let graph = DependencyGraph::build(&set).expect("graph");
        let diff = DiffEngine::new().compute(&set, None, &ProviderRegistry::new());
        let plan = Plan::from_diff("demo", &diff, &set, &graph, None);

        let formatter = OutputFormatter::new(OutputFormat::Json);
        let text = formatter.format_plan(&plan, &diff, false);
        let parsed: serde_json::Value = serde_json::from_str(&text).expect("valid json");
        assert_eq!(parsed["creates"], 1);
        assert_eq!(parsed["entries"][0]["resource"], "base");
    }

    #[test]
    fn test_diff_type_labels() {
        assert_eq!(DiffType::Create.to_string(), "create");
        assert_eq!(DiffType::NoChange.to_string(), "no change");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let multibyte = "é".repeat(30);
        let truncated = OutputFormatter::truncate(&multibyte, 40);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 40);

        assert_eq!(OutputFormatter::truncate("short", 40), "short");
    }
}
