//! Plan Mode Prompts
//!
//! Instruction text for the outline call and for each step, plus the
//! formatting of step results threaded into later steps.

use serde_json::{json, Value};

use super::config::OutlineLimits;
use super::types::{Plan, FORBIDDEN_ACTIONS, OUTLINE_ACTION};

/// Built-in outline instruction. `{min_steps}`, `{max_steps}` and
/// `{max_step_title_chars}` are filled from the configured limits.
pub const DEFAULT_OUTLINE_INSTRUCTION: &str = "\
You are planning how to fulfil the user's latest request. Break the work into \
{min_steps} to {max_steps} ordered steps that can each be carried out on their \
own, one after another.

Call the `outline` action exactly once with:
- `title`: a short name for the plan
- `description`: one or two sentences on the overall approach
- `steps`: the ordered steps, each with a `title` (at most {max_step_title_chars} \
characters) and a `description` of what the step must produce. Optionally add \
`dependsOn` (0-based indices of earlier steps it builds on), `complexity` \
(simple, moderate or complex) and `estimatedDuration`.

Do not start doing the work itself; only plan it.";

/// Fill the limit placeholders of an outline instruction template.
pub fn render_outline_instruction(template: &str, limits: &OutlineLimits) -> String {
    template
        .replace("{min_steps}", &limits.min_steps.to_string())
        .replace("{max_steps}", &limits.max_steps.to_string())
        .replace(
            "{max_step_title_chars}",
            &limits.max_step_title_chars.to_string(),
        )
}

/// JSON schema of the `outline` action's arguments.
pub fn outline_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string", "description": "Short name of the plan" },
            "description": { "type": "string", "description": "Overall approach" },
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "dependsOn": { "type": "array", "items": { "type": "integer", "minimum": 0 } },
                        "complexity": { "type": "string", "enum": ["simple", "moderate", "complex"] },
                        "estimatedDuration": { "type": "string" }
                    },
                    "required": ["title", "description"]
                }
            }
        },
        "required": ["title", "steps"]
    })
}

/// Instruction for running step `step_index` of `plan` and nothing else.
pub fn build_step_instruction(plan: &Plan, step_index: usize, is_final: bool) -> String {
    let total = plan.steps.len();
    let mut prompt = format!("## Plan: {}\n", plan.title);
    if !plan.description.is_empty() {
        prompt.push_str(&format!("{}\n", plan.description));
    }

    prompt.push_str("\n## Steps\n");
    for (index, step) in plan.steps.iter().enumerate() {
        let marker = if index == step_index { " <- current" } else { "" };
        prompt.push_str(&format!("{}. {}{}\n", index + 1, step.title, marker));
    }

    let Some(step) = plan.steps.get(step_index) else {
        return prompt;
    };

    prompt.push_str(&format!(
        "\n## Current Step ({} of {}): {}\n{}\n",
        step_index + 1,
        total,
        step.title,
        step.description
    ));
    if let Some(deps) = step.depends_on.as_ref().filter(|d| !d.is_empty()) {
        let names: Vec<String> = deps
            .iter()
            .filter_map(|d| plan.steps.get(*d).map(|s| format!("{} ({})", d + 1, s.title)))
            .collect();
        if !names.is_empty() {
            prompt.push_str(&format!("Builds on: {}\n", names.join(", ")));
        }
    }

    prompt.push_str(&format!(
        "\n## Rules\n\
         - Carry out only step {}. Earlier steps are done; later steps will run separately.\n\
         - Do not call the plan-control actions ({}). The plan is fixed.\n",
        step_index + 1,
        FORBIDDEN_ACTIONS.join(", ")
    ));
    if is_final {
        prompt.push_str(
            "- This is the final step: produce the complete deliverable for the user's \
             request, drawing on the results of the earlier steps.\n",
        );
    } else {
        prompt.push_str("- Finish with a concise summary of what this step produced.\n");
    }

    prompt
}

/// Result of a finished step as it appears in later steps' context, capped at
/// `max_chars` characters of output.
pub fn format_step_result(plan: &Plan, step_index: usize, output: &str, max_chars: usize) -> String {
    let title = plan
        .steps
        .get(step_index)
        .map(|s| s.title.as_str())
        .unwrap_or("Untitled step");
    format!(
        "Result of step {} ({}):\n{}",
        step_index + 1,
        title,
        truncate_output(output, max_chars)
    )
}

/// Cut `output` to `max_chars` characters, noting how much was dropped.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    let kept: String = output.chars().take(max_chars).collect();
    format!("{}...\n[Truncated: {} of {} characters shown]", kept, max_chars, total)
}

/// Whether `name` is the outline action.
pub fn is_outline_action(name: &str) -> bool {
    name == OUTLINE_ACTION
}
