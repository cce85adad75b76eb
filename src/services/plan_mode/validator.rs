//! Outline Validator
//!
//! Quality gate run on every accepted outline. Issues are diagnostics only;
//! a plan that fails the gate is still executed.

use super::config::OutlineLimits;
use super::types::Plan;

/// One quality problem found in an outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineIssue {
    /// Title missing or shorter than the minimum.
    TitleTooShort { length: usize, min: usize },
    /// Step count outside the allowed range.
    StepCount { count: usize, min: usize, max: usize },
    /// A step title is outside the allowed length range.
    StepTitleLength {
        step: usize,
        length: usize,
        min: usize,
        max: usize,
    },
    /// A `dependsOn` entry is not strictly earlier than its step.
    ForwardDependency { step: usize, depends_on: usize },
    /// A `dependsOn` entry points past the last step.
    DependencyOutOfBounds { step: usize, depends_on: usize },
}

impl std::fmt::Display for OutlineIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutlineIssue::TitleTooShort { length, min } => {
                write!(f, "Plan title has {} characters (minimum {})", length, min)
            }
            OutlineIssue::StepCount { count, min, max } => {
                write!(f, "Plan has {} steps (expected {} to {})", count, min, max)
            }
            OutlineIssue::StepTitleLength {
                step,
                length,
                min,
                max,
            } => write!(
                f,
                "Step {} title has {} characters (expected {} to {})",
                step, length, min, max
            ),
            OutlineIssue::ForwardDependency { step, depends_on } => write!(
                f,
                "Step {} depends on step {}, which does not come before it",
                step, depends_on
            ),
            OutlineIssue::DependencyOutOfBounds { step, depends_on } => write!(
                f,
                "Step {} depends on step {}, which does not exist",
                step, depends_on
            ),
        }
    }
}

/// Check `plan` against `limits`. An empty result means the outline passed.
pub fn validate_outline(plan: &Plan, limits: &OutlineLimits) -> Vec<OutlineIssue> {
    let mut issues = Vec::new();

    let title_len = plan.title.trim().chars().count();
    if title_len < limits.min_title_chars {
        issues.push(OutlineIssue::TitleTooShort {
            length: title_len,
            min: limits.min_title_chars,
        });
    }

    let count = plan.steps.len();
    if count < limits.min_steps || count > limits.max_steps {
        issues.push(OutlineIssue::StepCount {
            count,
            min: limits.min_steps,
            max: limits.max_steps,
        });
    }

    for (index, step) in plan.steps.iter().enumerate() {
        let length = step.title.trim().chars().count();
        if length < limits.min_step_title_chars || length > limits.max_step_title_chars {
            issues.push(OutlineIssue::StepTitleLength {
                step: index,
                length,
                min: limits.min_step_title_chars,
                max: limits.max_step_title_chars,
            });
        }

        for &dep in step.depends_on.iter().flatten() {
            if dep >= count {
                issues.push(OutlineIssue::DependencyOutOfBounds {
                    step: index,
                    depends_on: dep,
                });
            } else if dep >= index {
                issues.push(OutlineIssue::ForwardDependency {
                    step: index,
                    depends_on: dep,
                });
            }
        }
    }

    issues
}

/// Human-readable summary of a validation run.
pub fn validation_summary(issues: &[OutlineIssue]) -> String {
    if issues.is_empty() {
        return "Outline passed all checks".to_string();
    }

    let mut summary = format!("{} outline issue(s):", issues.len());
    for issue in issues {
        summary.push_str(&format!("\n  - {}", issue));
    }
    summary
}
