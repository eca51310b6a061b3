//! Prompt assembly for task dispatch.

use crate::dag::TaskDag;
use nugget_common::{Agent, BuildSpec, RuleTrigger, Task};
use std::collections::HashMap;

/// Keep the first `max_words` words of a summary.
pub fn cap_summary(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    format!("{} [truncated]", words[..max_words].join(" "))
}

/// System prompt: who the agent is and where it may write.
pub fn build_system_prompt(agent: Option<&Agent>, spec: &BuildSpec) -> String {
    let mut prompt = String::new();

    if let Some(agent) = agent {
        prompt.push_str(&format!("You are {}, a {} agent.\n", agent.name, agent.role));
        if !agent.persona.is_empty() {
            prompt.push_str(&format!("Persona: {}\n", agent.persona));
        }
        if !agent.allowed_paths.is_empty() {
            prompt.push_str(&format!(
                "You may only write to: {}\n",
                agent.allowed_paths.join(", ")
            ));
        }
        if !agent.restricted_paths.is_empty() {
            prompt.push_str(&format!(
                "Never modify: {}\n",
                agent.restricted_paths.join(", ")
            ));
        }
    }

    if !spec.project.goal.is_empty() {
        prompt.push_str(&format!("\nProject goal: {}\n", spec.project.goal));
    }

    let rules: Vec<String> = spec
        .rules_for(RuleTrigger::Always)
        .map(|r| format!("- {}: {}", r.name, r.prompt))
        .collect();
    if !rules.is_empty() {
        prompt.push_str("\n## Rules\n");
        prompt.push_str(&rules.join("\n"));
        prompt.push('\n');
    }

    let skills: Vec<String> = spec
        .skills
        .iter()
        .filter(|s| s.category == "agent")
        .map(|s| format!("### {}\n{}", s.name, s.prompt))
        .collect();
    if !skills.is_empty() {
        prompt.push_str("\n## Skills\n");
        prompt.push_str(&skills.join("\n\n"));
        prompt.push('\n');
    }

    prompt
}

/// Task prompt with the summaries of everything the task builds on.
pub fn build_task_prompt(
    task: &Task,
    dag: &TaskDag,
    summaries: &HashMap<String, String>,
    max_summary_words: usize,
) -> String {
    let mut prompt = format!("# Task: {}\n\n{}\n", task.name, task.description);

    if !task.acceptance_criteria.is_empty() {
        prompt.push_str("\n## Acceptance Criteria\n");
        for criterion in &task.acceptance_criteria {
            prompt.push_str(&format!("- {}\n", criterion));
        }
    }

    let predecessors: Vec<(&String, &String)> = dag
        .transitive_predecessors(&task.id)
        .into_iter()
        .filter_map(|id| summaries.get_key_value(&id))
        .collect();
    if !predecessors.is_empty() {
        prompt.push_str("\n## Completed Work\n");
        for (id, summary) in predecessors {
            prompt.push_str(&format!(
                "\n### {}\n{}\n",
                id,
                cap_summary(summary, max_summary_words)
            ));
        }
    }

    prompt
}

/// Append the `on_test_fail` rules and the previous failure for a retry.
pub fn retry_prompt(base: &str, spec: &BuildSpec, attempt: u32, last_failure: &str) -> String {
    let mut prompt = base.to_string();
    prompt.push_str(&format!("\n## Retry {}\n", attempt));
    if !last_failure.is_empty() {
        prompt.push_str(&format!("The previous attempt failed: {}\n", last_failure));
    }
    for rule in spec.rules_for(RuleTrigger::OnTestFail) {
        prompt.push_str(&format!("- {}: {}\n", rule.name, rule.prompt));
    }
    prompt
}

/// Markdown digest of all completed summaries, ordered by task id.
pub fn project_context(summaries: &HashMap<String, String>, max_summary_words: usize) -> String {
    let mut ids: Vec<&String> = summaries.keys().collect();
    ids.sort();

    let mut doc = String::from("# Project Context\n");
    for id in ids {
        doc.push_str(&format!(
            "\n## {}\n{}\n",
            id,
            cap_summary(&summaries[id], max_summary_words)
        ));
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use nugget_common::{AgentRole, RuleSpec, SkillSpec};

    fn spec_with_rules() -> BuildSpec {
        let mut spec = BuildSpec::default();
        spec.project.goal = "A blinking LED".into();
        spec.rules = vec![
            RuleSpec {
                name: "tidy".into(),
                prompt: "Keep functions short".into(),
                trigger: RuleTrigger::Always,
            },
            RuleSpec {
                name: "check".into(),
                prompt: "Re-read the failing test".into(),
                trigger: RuleTrigger::OnTestFail,
            },
        ];
        spec.skills = vec![
            SkillSpec {
                name: "blink".into(),
                prompt: "Use machine.Pin".into(),
                category: "agent".into(),
            },
            SkillSpec {
                name: "composite".into(),
                prompt: "ignored".into(),
                category: "composite".into(),
            },
        ];
        spec
    }

    #[test]
    fn test_cap_summary() {
        assert_eq!(cap_summary("one two three", 5), "one two three");
        assert_eq!(cap_summary("one two three", 2), "one two [truncated]");
        assert_eq!(cap_summary("", 2), "");
    }

    #[test]
    fn test_system_prompt_contents() {
        let mut agent = Agent::new("Sparky", AgentRole::Builder);
        agent.persona = "cheerful".into();
        agent.allowed_paths = vec!["src/".into()];
        agent.restricted_paths = vec![".nugget/".into()];

        let prompt = build_system_prompt(Some(&agent), &spec_with_rules());
        assert!(prompt.contains("Sparky, a builder agent"));
        assert!(prompt.contains("cheerful"));
        assert!(prompt.contains("src/"));
        assert!(prompt.contains(".nugget/"));
        assert!(prompt.contains("Keep functions short"));
        assert!(!prompt.contains("Re-read the failing test"));
        assert!(prompt.contains("machine.Pin"));
        assert!(!prompt.contains("ignored"));
    }

    #[test]
    fn test_task_prompt_includes_transitive_summaries() {
        let mut dag = TaskDag::new();
        dag.add_task("a", Vec::<String>::new());
        dag.add_task("b", ["a"]);
        dag.add_task("c", ["b"]);
        dag.add_task("x", Vec::<String>::new());

        let summaries: HashMap<String, String> = [
            ("a".to_string(), "wrote the pin setup".to_string()),
            ("b".to_string(), "added the loop".to_string()),
            ("x".to_string(), "unrelated".to_string()),
        ]
        .into_iter()
        .collect();

        let mut task = Task::new("c", "Blink", vec!["b".into()]).with_description("Toggle it");
        task.acceptance_criteria = vec!["LED blinks".into()];

        let prompt = build_task_prompt(&task, &dag, &summaries, 500);
        assert!(prompt.contains("# Task: Blink"));
        assert!(prompt.contains("- LED blinks"));
        assert!(prompt.contains("wrote the pin setup"));
        assert!(prompt.contains("added the loop"));
        assert!(!prompt.contains("unrelated"));
    }

    #[test]
    fn test_retry_prompt_appends_on_test_fail_rules() {
        let prompt = retry_prompt("base", &spec_with_rules(), 1, "assert failed");
        assert!(prompt.starts_with("base"));
        assert!(prompt.contains("Retry 1"));
        assert!(prompt.contains("assert failed"));
        assert!(prompt.contains("Re-read the failing test"));
    }

    #[test]
    fn test_project_context_sorted() {
        let summaries: HashMap<String, String> = [
            ("task-2".to_string(), "second".to_string()),
            ("task-1".to_string(), "first".to_string()),
        ]
        .into_iter()
        .collect();
        let doc = project_context(&summaries, 500);
        assert!(doc.starts_with("# Project Context\n"));
        let first = doc.find("## task-1").unwrap();
        let second = doc.find("## task-2").unwrap();
        assert!(first < second);
    }
}
