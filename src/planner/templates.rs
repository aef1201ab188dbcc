//! 任务分类与步骤模板
//!
//! 分类为确定性的关键词匹配（大小写不敏感）：复杂度先查 complex 关键词再查 medium，
//! 类型按 bugfix -> refactoring -> feature 顺序匹配，均未命中为 general。
//! 模板中每一步带最低复杂度，复杂度越高步骤越多。

use crate::planner::types::{Complexity, TaskType};

const COMPLEX_KEYWORDS: &[&str] = &[
    "complex",
    "architecture",
    "distributed",
    "microservice",
    "migrate",
    "migration",
    "redesign",
    "scalab",
    "multiple",
    "system-wide",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "implement",
    "feature",
    "integrate",
    "refactor",
    "optimize",
    "update",
    "add",
    "create",
    "api",
    "database",
];

const BUGFIX_KEYWORDS: &[&str] = &["fix", "bug", "error", "crash", "broken", "issue", "repair"];

const REFACTORING_KEYWORDS: &[&str] = &[
    "refactor",
    "restructure",
    "clean up",
    "cleanup",
    "simplify",
    "rename",
];

const FEATURE_KEYWORDS: &[&str] = &["feature", "implement", "add", "create", "build", "new"];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

pub fn classify_complexity(description: &str) -> Complexity {
    let text = description.to_lowercase();
    if contains_any(&text, COMPLEX_KEYWORDS) {
        Complexity::Complex
    } else if contains_any(&text, MEDIUM_KEYWORDS) {
        Complexity::Medium
    } else {
        Complexity::Simple
    }
}

pub fn classify_type(description: &str) -> TaskType {
    let text = description.to_lowercase();
    if contains_any(&text, BUGFIX_KEYWORDS) {
        TaskType::Bugfix
    } else if contains_any(&text, REFACTORING_KEYWORDS) {
        TaskType::Refactoring
    } else if contains_any(&text, FEATURE_KEYWORDS) {
        TaskType::Feature
    } else {
        TaskType::General
    }
}

/// 模板步骤：动作名、描述前缀、出现所需的最低复杂度
#[derive(Debug, Clone, Copy)]
pub struct StepTemplate {
    pub action: &'static str,
    pub verb: &'static str,
    pub min: Complexity,
}

const fn t(action: &'static str, verb: &'static str, min: Complexity) -> StepTemplate {
    StepTemplate { action, verb, min }
}

const FEATURE: &[StepTemplate] = &[
    t("analyze_code", "Analyze requirements for", Complexity::Simple),
    t("design", "Design solution for", Complexity::Medium),
    t("generate_code", "Implement", Complexity::Simple),
    t("run_tests", "Test", Complexity::Simple),
    t("integrate", "Integrate", Complexity::Medium),
    t("review", "Review", Complexity::Complex),
    t("document", "Document", Complexity::Complex),
    t("verify", "Verify", Complexity::Simple),
];

const BUGFIX: &[StepTemplate] = &[
    t("analyze_code", "Reproduce", Complexity::Simple),
    t("analyze_code", "Locate root cause of", Complexity::Medium),
    t("generate_code", "Apply fix for", Complexity::Simple),
    t("run_tests", "Test fix for", Complexity::Medium),
    t("run_tests", "Add regression coverage for", Complexity::Complex),
    t("verify", "Verify", Complexity::Simple),
];

const REFACTORING: &[StepTemplate] = &[
    t("analyze_code", "Analyze current structure for", Complexity::Simple),
    t("design", "Plan refactoring for", Complexity::Medium),
    t("generate_code", "Refactor", Complexity::Simple),
    t("run_tests", "Test", Complexity::Simple),
    t("review", "Review", Complexity::Complex),
    t("verify", "Verify", Complexity::Simple),
];

const GENERAL: &[StepTemplate] = &[
    t("analyze_code", "Analyze", Complexity::Simple),
    t("design", "Plan", Complexity::Medium),
    t("perform", "Carry out", Complexity::Simple),
    t("review", "Review", Complexity::Complex),
    t("verify", "Verify", Complexity::Simple),
];

/// 取某类型在给定复杂度下的步骤模板（保持模板顺序）
pub fn templates_for(task_type: TaskType, complexity: Complexity) -> Vec<StepTemplate> {
    let all = match task_type {
        TaskType::Feature => FEATURE,
        TaskType::Bugfix => BUGFIX,
        TaskType::Refactoring => REFACTORING,
        TaskType::General => GENERAL,
    };
    all.iter().copied().filter(|s| s.min <= complexity).collect()
}

/// 重新规划时前置的恢复步骤
pub fn recovery_templates(issue: &str) -> Vec<(&'static str, String)> {
    vec![
        ("analyze_issue", format!("Analyze issue: {}", issue)),
        ("adjust_approach", format!("Adjust approach to address: {}", issue)),
    ]
}
