// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! DAG analyzer: Kahn-style layered topological numbering of a workflow's
//! steps.

use crate::error::{OrchestratorError, Result};
use crate::workflow::Workflow;
use std::collections::HashMap;

/// Numbers `workflow`'s steps in place: layer index goes to `number`, and
/// when a layer holds more than one step, its members are sorted
/// lexicographically and assigned `letter`s `a, b, c, ...` in that order.
///
/// Operates on the caller's workflow directly; callers that need to preserve
/// an unnumbered copy should clone first.
pub fn number_steps(workflow: &mut Workflow) -> Result<()> {
    let step_names: Vec<String> = workflow.steps.keys().cloned().collect();

    // validate all `depend` references up front
    for name in &step_names {
        for dep in &workflow.steps[name].depend {
            if !workflow.steps.contains_key(dep) {
                return Err(OrchestratorError::graph(
                    format!("step '{name}' depends on unknown step"),
                    dep.clone(),
                ));
            }
        }
    }

    let mut visited: HashMap<String, bool> = step_names.iter().map(|n| (n.clone(), false)).collect();
    let mut number: u32 = 1;

    loop {
        let ready: Vec<String> = step_names
            .iter()
            .filter(|name| !visited[*name])
            .filter(|name| {
                workflow.steps[*name]
                    .depend
                    .iter()
                    .all(|dep| visited[dep])
            })
            .cloned()
            .collect();

        let remaining = visited.values().filter(|v| !**v).count();
        if remaining == 0 {
            break;
        }
        if ready.is_empty() {
            let mut offenders: Vec<&String> =
                step_names.iter().filter(|n| !visited[*n]).collect();
            offenders.sort();
            return Err(OrchestratorError::graph(
                "cycle detected in workflow DAG",
                offenders
                    .into_iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            ));
        }

        let mut sorted_ready = ready.clone();
        sorted_ready.sort();

        for name in &sorted_ready {
            workflow.steps.get_mut(name).unwrap().number = number;
        }
        if sorted_ready.len() > 1 {
            for (i, name) in sorted_ready.iter().enumerate() {
                let letter = (b'a' + (i as u8)) as char;
                workflow.steps.get_mut(name).unwrap().letter = letter.to_string();
            }
        }

        for name in &sorted_ready {
            visited.insert(name.clone(), true);
        }
        number += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Step;
    use std::collections::HashMap;

    fn step(depend: &[&str]) -> Step {
        Step {
            app_name: Some("app1".into()),
            depend: depend.iter().map(|s| s.to_string()).collect(),
            template: HashMap::from([("output".to_string(), "x".to_string())]),
            ..Default::default()
        }
    }

    fn workflow(steps: Vec<(&str, Step)>) -> Workflow {
        let mut wf = Workflow {
            gf_version: "v3.0".into(),
            name: "wf".into(),
            ..Default::default()
        };
        for (name, step) in steps {
            wf.steps.insert(name.to_string(), step);
        }
        wf
    }

    #[test]
    fn linear_dag_gets_sequential_numbers_no_letters() {
        let mut wf = workflow(vec![
            ("A", step(&[])),
            ("B", step(&["A"])),
            ("C", step(&["B"])),
        ]);
        number_steps(&mut wf).unwrap();
        assert_eq!(wf.steps["A"].number, 1);
        assert_eq!(wf.steps["B"].number, 2);
        assert_eq!(wf.steps["C"].number, 3);
        assert!(wf.steps["A"].letter.is_empty());
    }

    #[test]
    fn diamond_dag_assigns_letters_to_parallel_rank() {
        let mut wf = workflow(vec![
            ("A", step(&[])),
            ("B", step(&["A"])),
            ("C", step(&["A"])),
            ("D", step(&["B", "C"])),
        ]);
        number_steps(&mut wf).unwrap();
        assert_eq!(wf.steps["A"].number, 1);
        assert_eq!(wf.steps["B"].number, 2);
        assert_eq!(wf.steps["C"].number, 2);
        assert_eq!(wf.steps["D"].number, 3);
        assert_eq!(wf.steps["B"].letter, "a");
        assert_eq!(wf.steps["C"].letter, "b");
        assert!(wf.steps["D"].letter.is_empty());
    }

    #[test]
    fn independent_steps_get_lexicographic_letters() {
        let mut wf = workflow(vec![
            ("zeta", step(&[])),
            ("alpha", step(&[])),
            ("mu", step(&[])),
        ]);
        number_steps(&mut wf).unwrap();
        assert_eq!(wf.steps["alpha"].letter, "a");
        assert_eq!(wf.steps["mu"].letter, "b");
        assert_eq!(wf.steps["zeta"].letter, "c");
        for step in wf.steps.values() {
            assert_eq!(step.number, 1);
        }
    }

    #[test]
    fn cycle_is_rejected_naming_an_offender() {
        let mut wf = workflow(vec![("A", step(&["B"])), ("B", step(&["A"]))]);
        let err = number_steps(&mut wf).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains('A') || msg.contains('B'));
    }

    #[test]
    fn dangling_dependency_is_rejected_naming_it() {
        let mut wf = workflow(vec![("A", step(&[])), ("B", step(&["X"]))]);
        let err = number_steps(&mut wf).unwrap_err();
        assert!(err.to_string().contains('X'));
    }

    #[test]
    fn does_not_mutate_a_separately_held_clone() {
        let wf = workflow(vec![("A", step(&[]))]);
        let mut copy = wf.clone();
        number_steps(&mut copy).unwrap();
        assert_eq!(wf.steps["A"].number, 0);
        assert_eq!(copy.steps["A"].number, 1);
    }
}
