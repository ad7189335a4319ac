//! Plan validation: unknown executor types, dangling dependencies, and
//! dependency cycles are all fail-closed rejections before a single step
//! runs.

use std::collections::{HashMap, HashSet};

use govrail_types::{BusinessPlan, GovrailError, GovrailResult};

pub fn validate(plan: &BusinessPlan, known_executor_types: &HashSet<String>) -> GovrailResult<()> {
    if plan.steps.is_empty() {
        return Err(GovrailError::ManifestInvalidSchema {
            detail: format!("plan {} has no steps", plan.plan_id),
        });
    }

    let step_ids: HashSet<&str> = plan.steps.iter().map(|s| s.step_id.as_str()).collect();
    let mut errors = Vec::new();

    for step in &plan.steps {
        if !known_executor_types.contains(&step.executor_type) {
            errors.push(format!(
                "step {} references unregistered executor type {}",
                step.step_id, step.executor_type
            ));
        }
        for dep in &step.depends_on {
            if !step_ids.contains(dep.as_str()) {
                errors.push(format!("step {} depends on non-existent step {dep}", step.step_id));
            }
        }
    }

    if let Some(cycle_member) = find_cycle(plan) {
        errors.push(format!("dependency cycle detected involving step {cycle_member}"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(GovrailError::ManifestInvalidSchema { detail: errors.join("; ") })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn find_cycle(plan: &BusinessPlan) -> Option<String> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        plan: &'a BusinessPlan,
        step_id: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Option<String> {
        match marks.get(step_id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => return Some(step_id.to_string()),
            None => {}
        }
        marks.insert(step_id, Mark::Visiting);
        if let Some(step) = plan.step(step_id) {
            for dep in &step.depends_on {
                if let Some(cycle) = visit(plan, dep.as_str(), marks) {
                    return Some(cycle);
                }
            }
        }
        marks.insert(step_id, Mark::Done);
        None
    }

    for step in &plan.steps {
        if let Some(cycle) = visit(plan, step.step_id.as_str(), &mut marks) {
            return Some(cycle);
        }
    }
    None
}
