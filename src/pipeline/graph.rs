use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::error::{CidError, Result};

/// Groups jobs into execution levels using Kahn's algorithm.
///
/// Group *i* contains every job whose prerequisites are all in groups
/// `0..i`. Jobs inside a group keep the order in which they appear in
/// `graph`, so the same input always yields the same output.
///
/// # Errors
///
/// - `UnknownJobReference` if a prerequisite is not a key of `graph`
/// - `CyclicDependency` if some jobs can never become ready
pub fn resolve_job_groups(graph: &IndexMap<String, Vec<String>>) -> Result<Vec<Vec<String>>> {
    for (job, prerequisites) in graph {
        if let Some(missing) = prerequisites.iter().find(|p| !graph.contains_key(*p)) {
            return Err(CidError::UnknownJobReference {
                job: job.clone(),
                dependency: missing.clone(),
            });
        }
    }

    // Duplicate prerequisites count once
    let prerequisites: Vec<IndexSet<usize>> = graph
        .values()
        .map(|deps| {
            deps.iter()
                .filter_map(|dep| graph.get_index_of(dep))
                .collect()
        })
        .collect();

    let mut in_degree: Vec<usize> = prerequisites.iter().map(IndexSet::len).collect();
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for (job, deps) in prerequisites.iter().enumerate() {
        for &dep in deps {
            dependents.entry(dep).or_default().push(job);
        }
    }

    let mut resolved = vec![false; graph.len()];
    let mut remaining = graph.len();
    let mut groups = Vec::new();

    while remaining > 0 {
        let current: Vec<usize> = (0..graph.len())
            .filter(|&i| !resolved[i] && in_degree[i] == 0)
            .collect();

        if current.is_empty() {
            let jobs = graph
                .keys()
                .enumerate()
                .filter(|(i, _)| !resolved[*i])
                .map(|(_, name)| name.clone())
                .collect();
            return Err(CidError::CyclicDependency { jobs });
        }

        for &job in &current {
            resolved[job] = true;
            for &dependent in dependents.get(&job).into_iter().flatten() {
                in_degree[dependent] -= 1;
            }
        }
        remaining -= current.len();

        groups.push(
            current
                .into_iter()
                .filter_map(|i| graph.get_index(i).map(|(name, _)| name.clone()))
                .collect(),
        );
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> IndexMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(job, deps)| {
                (
                    (*job).to_string(),
                    deps.iter().map(|d| (*d).to_string()).collect(),
                )
            })
            .collect()
    }

    fn names(groups: &[&[&str]]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|g| g.iter().map(|s| (*s).to_string()).collect())
            .collect()
    }

    #[test]
    fn test_groups_follow_dependency_levels() {
        let input = graph(&[
            ("checkout", &[]),
            ("compile", &["checkout"]),
            ("test", &["compile"]),
            ("lint", &["checkout"]),
        ]);

        let groups = resolve_job_groups(&input).unwrap();

        assert_eq!(
            groups,
            names(&[&["checkout"], &["compile", "lint"], &["test"]])
        );
    }

    #[test]
    fn test_independent_jobs_share_first_group_in_input_order() {
        let input = graph(&[("zeta", &[]), ("alpha", &[]), ("mid", &[])]);

        let groups = resolve_job_groups(&input).unwrap();

        assert_eq!(groups, names(&[&["zeta", "alpha", "mid"]]));
    }

    #[test]
    fn test_output_is_deterministic() {
        let input = graph(&[
            ("d", &["b", "c"]),
            ("c", &["a"]),
            ("b", &["a"]),
            ("a", &[]),
        ]);

        let first = resolve_job_groups(&input).unwrap();
        for _ in 0..20 {
            assert_eq!(resolve_job_groups(&input).unwrap(), first);
        }
        assert_eq!(first, names(&[&["a"], &["c", "b"], &["d"]]));
    }

    #[test]
    fn test_two_node_cycle() {
        let input = graph(&[("A", &["B"]), ("B", &["A"])]);

        let err = resolve_job_groups(&input).unwrap_err();

        match err {
            CidError::CyclicDependency { jobs } => assert_eq!(jobs, vec!["A", "B"]),
            other => panic!("expected cyclic dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let input = graph(&[("setup", &[]), ("loop", &["loop"])]);

        let err = resolve_job_groups(&input).unwrap_err();

        match err {
            CidError::CyclicDependency { jobs } => assert_eq!(jobs, vec!["loop"]),
            other => panic!("expected cyclic dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_prerequisite() {
        let input = graph(&[("A", &["B"])]);

        let err = resolve_job_groups(&input).unwrap_err();

        match err {
            CidError::UnknownJobReference { job, dependency } => {
                assert_eq!(job, "A");
                assert_eq!(dependency, "B");
            }
            other => panic!("expected unknown job reference, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_prerequisites_count_once() {
        let input = graph(&[("a", &[]), ("b", &["a", "a"])]);

        let groups = resolve_job_groups(&input).unwrap();

        assert_eq!(groups, names(&[&["a"], &["b"]]));
    }

    #[test]
    fn test_empty_graph_has_no_groups() {
        let groups = resolve_job_groups(&IndexMap::new()).unwrap();
        assert!(groups.is_empty());
    }
}
