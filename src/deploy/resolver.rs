//! Dependency order for deploy units.
//!
//! Units never name each other. A unit that `requires` a capability key must
//! deploy after every unit that `provides` it.

use crate::errors::{BuildError, BuildResult};
use nugget_common::{DeployManifest, DeployUnit};
use std::collections::{BTreeSet, HashMap};

/// Manifest that applies to a unit: its inline one, else the registered one.
pub fn manifest_for<'a>(
    unit: &'a DeployUnit,
    manifests: &'a HashMap<String, DeployManifest>,
) -> Option<&'a DeployManifest> {
    unit.deploy_manifest
        .as_ref()
        .or_else(|| manifests.get(&unit.plugin_id))
}

/// Order `units` so providers precede consumers.
///
/// Kahn's algorithm with the ready set keyed by input index, so units without
/// a relative constraint keep their input order. Units with no manifest have
/// no edges.
pub fn resolve_deploy_order(
    units: &[DeployUnit],
    manifests: &HashMap<String, DeployManifest>,
) -> BuildResult<Vec<DeployUnit>> {
    let n = units.len();
    let resolved: Vec<Option<&DeployManifest>> =
        units.iter().map(|u| manifest_for(u, manifests)).collect();

    // capability key -> indices of units providing it
    let mut providers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, manifest) in resolved.iter().enumerate() {
        if let Some(manifest) = manifest {
            for key in &manifest.provides {
                providers.entry(key.as_str()).or_default().push(idx);
            }
        }
    }

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for (consumer, manifest) in resolved.iter().enumerate() {
        let Some(manifest) = manifest else { continue };
        for key in &manifest.requires {
            for &provider in providers.get(key.as_str()).map_or(&[][..], |v| v.as_slice()) {
                if provider != consumer {
                    successors[provider].insert(consumer);
                }
            }
        }
    }

    let mut in_degree = vec![0usize; n];
    for succ in &successors {
        for &s in succ {
            in_degree[s] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &s in &successors[idx] {
            in_degree[s] -= 1;
            if in_degree[s] == 0 {
                ready.insert(s);
            }
        }
    }

    if order.len() < n {
        let stuck: Vec<&str> = (0..n)
            .filter(|i| in_degree[*i] > 0)
            .map(|i| units[i].instance_id.as_str())
            .collect();
        return Err(BuildError::CircularDependency(format!(
            "deploy order has a cycle between units: {}",
            stuck.join(", ")
        )));
    }

    Ok(order.into_iter().map(|i| units[i].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nugget_common::DeployMethod;

    fn manifest(provides: &[&str], requires: &[&str]) -> DeployManifest {
        DeployManifest {
            method: DeployMethod::Local,
            provides: provides.iter().map(|s| s.to_string()).collect(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn ids(units: &[DeployUnit]) -> Vec<&str> {
        units.iter().map(|u| u.instance_id.as_str()).collect()
    }

    #[test]
    fn test_empty_input() {
        let order = resolve_deploy_order(&[], &HashMap::new()).unwrap();
        assert!(order.is_empty());
    }

    #[test]
    fn test_provider_precedes_consumer() {
        let units = vec![
            DeployUnit::new("sensor-node", "sensor")
                .with_manifest(manifest(&[], &["cloud_url"])),
            DeployUnit::new("cloud-dashboard", "dashboard")
                .with_manifest(manifest(&["cloud_url"], &[])),
        ];
        let order = resolve_deploy_order(&units, &HashMap::new()).unwrap();
        assert_eq!(ids(&order), vec!["dashboard", "sensor"]);
    }

    #[test]
    fn test_independent_units_keep_input_order() {
        let units = vec![
            DeployUnit::new("p", "c"),
            DeployUnit::new("p", "a"),
            DeployUnit::new("p", "b"),
        ];
        let order = resolve_deploy_order(&units, &HashMap::new()).unwrap();
        assert_eq!(ids(&order), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_only_constrained_units_move() {
        let units = vec![
            DeployUnit::new("x", "first"),
            DeployUnit::new("gateway", "gw").with_manifest(manifest(&[], &["api_key:secret"])),
            DeployUnit::new("y", "middle"),
            DeployUnit::new("cloud", "cloud").with_manifest(manifest(&["api_key:secret"], &[])),
            DeployUnit::new("z", "last"),
        ];
        let order = resolve_deploy_order(&units, &HashMap::new()).unwrap();
        assert_eq!(ids(&order), vec!["first", "middle", "cloud", "gw", "last"]);
    }

    #[test]
    fn test_registered_manifest_used_when_inline_absent() {
        let mut registry = HashMap::new();
        registry.insert("cloud-dashboard".to_string(), manifest(&["cloud_url"], &[]));
        registry.insert("heltec-gateway".to_string(), manifest(&[], &["cloud_url"]));

        let units = vec![
            DeployUnit::new("heltec-gateway", "gateway"),
            DeployUnit::new("cloud-dashboard", "dashboard"),
        ];
        let order = resolve_deploy_order(&units, &registry).unwrap();
        assert_eq!(ids(&order), vec!["dashboard", "gateway"]);
    }

    #[test]
    fn test_inline_manifest_overrides_registry() {
        let mut registry = HashMap::new();
        registry.insert("p".to_string(), manifest(&[], &["k"]));

        let unit = DeployUnit::new("p", "one").with_manifest(manifest(&["k"], &[]));
        let found = manifest_for(&unit, &registry).unwrap();
        assert_eq!(found.provides, vec!["k"]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let units = vec![
            DeployUnit::new("a", "a").with_manifest(manifest(&["x"], &["y"])),
            DeployUnit::new("b", "b").with_manifest(manifest(&["y"], &["x"])),
            DeployUnit::new("c", "c"),
        ];
        let err = resolve_deploy_order(&units, &HashMap::new()).unwrap_err();
        assert!(matches!(err, BuildError::CircularDependency(_)));
        let message = err.to_string();
        assert!(message.contains("cycle"));
        assert!(message.contains("a, b"));
    }

    #[test]
    fn test_unit_providing_its_own_requirement_is_not_a_cycle() {
        let units = vec![DeployUnit::new("a", "a").with_manifest(manifest(&["x"], &["x"]))];
        let order = resolve_deploy_order(&units, &HashMap::new()).unwrap();
        assert_eq!(ids(&order), vec!["a"]);
    }

    #[test]
    fn test_multiple_providers_all_precede() {
        let units = vec![
            DeployUnit::new("c", "consumer").with_manifest(manifest(&[], &["k"])),
            DeployUnit::new("p", "p1").with_manifest(manifest(&["k"], &[])),
            DeployUnit::new("p", "p2").with_manifest(manifest(&["k"], &[])),
        ];
        let order = resolve_deploy_order(&units, &HashMap::new()).unwrap();
        assert_eq!(ids(&order), vec!["p1", "p2", "consumer"]);
    }
}
