//! The dependency graph: forward (`pkgs`) and reverse (`deps`) adjacency maps,
//! plus the mutation logic that keeps invariants I1-I3 (see SPEC_FULL.md §3)
//! intact after every successfully acknowledged mutation.
//!
//! This module is deliberately synchronous and free of any async/channel
//! machinery — [`crate::store`] is the only thing allowed to touch a [`Graph`],
//! and it does so from a single task, which is what gives us I4 for free.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Forward map: package -> its declared dependency sequence.
pub type Pkgs = BTreeMap<String, Vec<String>>;

/// Reverse map: package -> set of packages that depend on it.
pub type Deps = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub pkgs: Pkgs,

    /// On the wire this serializes as a map to a sentinel truthy value
    /// (`{"<dependent>": true}`) rather than a JSON array, to keep binary
    /// compatibility with the source project's existing snapshot files.
    #[serde(with = "dep_map")]
    pub deps: Deps,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Graph {
    pub fn new(now: DateTime<Utc>) -> Self {
        Graph {
            pkgs: Pkgs::new(),
            deps: Deps::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn contains(&self, pkg: &str) -> bool {
        self.pkgs.contains_key(pkg)
    }

    /// §4.2.1 INDEX. On success, mutates in place and returns `Ok(())`.
    ///
    /// Re-indexing an existing package with a different dependency set
    /// replaces the forward edges but does *not* clean up stale reverse
    /// edges from the prior declaration — this is an intentional fidelity
    /// to the source project's observed behaviour, not an oversight. See
    /// DESIGN.md's Open Question decisions.
    pub fn index(&mut self, pkg: &str, new_deps: &[String]) -> Result<(), StoreError> {
        for d in new_deps {
            if !self.pkgs.contains_key(d) {
                return Err(StoreError::DependencyMissing {
                    pkg: pkg.to_string(),
                    dep: d.clone(),
                });
            }
        }

        self.pkgs.insert(pkg.to_string(), new_deps.to_vec());

        for d in new_deps {
            self.deps
                .entry(d.clone())
                .or_default()
                .insert(pkg.to_string());
        }

        Ok(())
    }

    /// §4.2.2 REMOVE.
    pub fn remove(&mut self, pkg: &str) -> Result<(), StoreError> {
        let Some(declared_deps) = self.pkgs.get(pkg) else {
            // Removing an unknown package is idempotent success.
            return Ok(());
        };

        if self.deps.get(pkg).is_some_and(|d| !d.is_empty()) {
            return Err(StoreError::ActiveDependents(pkg.to_string()));
        }

        let declared_deps = declared_deps.clone();
        for d in &declared_deps {
            if let Some(dependents) = self.deps.get_mut(d) {
                dependents.remove(pkg);
                if dependents.is_empty() {
                    self.deps.remove(d);
                }
            }
        }
        self.pkgs.remove(pkg);
        Ok(())
    }

    /// §4.2.3 QUERY. Never mutates (P4).
    pub fn query(&self, pkg: &str) -> Result<(), StoreError> {
        if self.pkgs.contains_key(pkg) {
            Ok(())
        } else {
            Err(StoreError::NotIndexed(pkg.to_string()))
        }
    }

    /// Checks I1-I3 hold. Used by invariant tests (P1); never called on the
    /// hot path.
    #[cfg(test)]
    pub fn check_invariants(&self) -> Result<(), String> {
        for (p, declared) in &self.pkgs {
            for d in declared {
                if !self.pkgs.contains_key(d) {
                    return Err(format!("I1 violated: {p} declares missing dep {d}"));
                }
            }
        }

        for (p, dependents) in &self.deps {
            if dependents.is_empty() {
                return Err(format!("I3 violated: DEPS[{p}] is present but empty"));
            }
            for q in dependents {
                let q_declares_p = self.pkgs.get(q).is_some_and(|d| d.iter().any(|x| x == p));
                if !q_declares_p {
                    return Err(format!(
                        "I2 violated: {q} in DEPS[{p}] but {p} not in PKGS[{q}]"
                    ));
                }
            }
        }

        Ok(())
    }
}

mod dep_map {
    use super::Deps;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::{BTreeMap, BTreeSet};

    pub fn serialize<S: Serializer>(deps: &Deps, serializer: S) -> Result<S::Ok, S::Error> {
        let wire: BTreeMap<&String, BTreeMap<&String, bool>> = deps
            .iter()
            .map(|(pkg, dependents)| {
                let inner: BTreeMap<&String, bool> =
                    dependents.iter().map(|dependent| (dependent, true)).collect();
                (pkg, inner)
            })
            .collect();
        wire.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Deps, D::Error> {
        let wire: BTreeMap<String, BTreeMap<String, bool>> =
            BTreeMap::deserialize(deserializer)?;
        Ok(wire
            .into_iter()
            .map(|(pkg, inner)| {
                let dependents: BTreeSet<String> =
                    inner.into_iter().filter(|(_, v)| *v).map(|(k, _)| k).collect();
                (pkg, dependents)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Graph {
        Graph::new(Utc::now())
    }

    #[test]
    fn index_with_missing_dep_fails() {
        let mut g = fresh();
        let err = g
            .index("evas-generic-loaders", &["aalib".into(), "atk".into(), "audiofile".into()])
            .unwrap_err();
        assert_eq!(err.code(), "ERR-0002");
        assert!(!g.contains("evas-generic-loaders"));
    }

    #[test]
    fn index_then_remove_then_query() {
        let mut g = fresh();
        g.index("zmqpp", &[]).unwrap();
        g.index("aalib", &[]).unwrap();
        g.index("atk", &[]).unwrap();
        g.index("audiofile", &[]).unwrap();
        g.index(
            "evas-generic-loaders",
            &["aalib".into(), "atk".into(), "audiofile".into()],
        )
        .unwrap();

        assert!(g.remove("audiofile").is_err());

        g.remove("zmqpp").unwrap();
        g.remove("zmqpp").unwrap(); // idempotent (P3)

        g.remove("evas-generic-loaders").unwrap();
        g.remove("audiofile").unwrap();

        assert!(g.query("audiofile").is_err());
        assert!(g.query("aalib").is_ok());

        g.check_invariants().unwrap();
    }

    #[test]
    fn index_with_duplicate_deps_is_set_semantics() {
        let mut g = fresh();
        g.index("a", &[]).unwrap();
        g.index("b", &["a".into(), "a".into()]).unwrap();
        assert_eq!(g.deps.get("a").unwrap().len(), 1);
    }

    #[test]
    fn reindex_same_deps_is_noop() {
        let mut g = fresh();
        g.index("a", &[]).unwrap();
        g.index("b", &["a".into()]).unwrap();
        let before = g.pkgs.clone();
        g.index("b", &["a".into()]).unwrap();
        assert_eq!(g.pkgs, before);
    }

    #[test]
    fn reindex_different_deps_leaves_ghost_reverse_edge() {
        // Pins down the source project's observed (if surprising) behaviour:
        // re-INDEX replaces forward edges but does not clean up stale reverse
        // edges from the prior declaration. See DESIGN.md.
        let mut g = fresh();
        g.index("a", &[]).unwrap();
        g.index("b", &[]).unwrap();
        g.index("pkg", &["a".into()]).unwrap();
        assert!(g.deps.get("a").unwrap().contains("pkg"));

        g.index("pkg", &["b".into()]).unwrap();
        assert!(g.deps.get("b").unwrap().contains("pkg"));
        // Ghost edge: "a" still lists "pkg" as a dependent even though
        // PKGS["pkg"] no longer declares "a".
        assert!(g.deps.get("a").unwrap().contains("pkg"));
    }

    #[test]
    fn remove_unknown_package_is_ok() {
        let mut g = fresh();
        g.remove("never-seen").unwrap();
    }

    #[test]
    fn query_never_mutates() {
        let mut g = fresh();
        g.index("a", &[]).unwrap();
        let before = g.clone();
        let _ = g.query("a");
        let _ = g.query("nope");
        assert_eq!(before.pkgs, g.pkgs);
        assert_eq!(before.deps, g.deps);
    }

    #[test]
    fn snapshot_round_trips_dep_map_as_bool_sentinel() {
        let mut g = fresh();
        g.index("a", &[]).unwrap();
        g.index("b", &["a".into()]).unwrap();

        let json = serde_json::to_value(&g).unwrap();
        assert_eq!(json["deps"]["a"]["b"], serde_json::json!(true));

        let back: Graph = serde_json::from_value(json).unwrap();
        assert_eq!(back.pkgs, g.pkgs);
        assert_eq!(back.deps, g.deps);
    }
}
