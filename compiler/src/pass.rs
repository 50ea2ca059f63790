// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the specializer's passes, their dependency edges, and the context
// state they produce. The pipeline runner uses the edges to compute the
// minimal pass subset for a terminal pass and to order the reduction rounds.
//
// Preconditions: none (static tables only).
// Postconditions: `required_passes` returns a dependency-respecting order.
// Failure modes: none.
// Side effects: none.

use std::collections::HashSet;

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a stage established its postconditions.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    /// Named obligations with their outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the obligations that did not hold.
    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each specializer pass (model loading is excluded: it happens before
/// the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassId {
    Materialize,
    FieldsForEntities,
    FieldsForPorts,
    FieldsForAttributes,
    InlineParameters,
    NamedObjEquality,
    InlineTokens,
    Cleanup,
    DeadCode,
    Verify,
}

/// State each pass leaves in the pipeline context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Classes,        // Program classes + class/object maps
    Ledger,         // creation ledger + creation sites
    Constants,      // ConstantInfo
    RefFields,      // reference fields for entities, ports, attributes
    ValueFields,    // value-holder, expression and compute members
    NarrowedBodies, // folded/unboxed method bodies
    PipelineCert,   // PipelineCert
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a specializer pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
    /// Re-run in every reduction round until the program stops changing.
    pub reducing: bool,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Materialize => PassDescriptor {
            name: "materialize",
            inputs: &[],
            outputs: &[ArtifactId::Classes, ArtifactId::Ledger, ArtifactId::Constants],
            invalidation_key: "model + library catalogue",
            invariants: "M1 bijection, M2 unique creation",
            reducing: false,
        },
        PassId::FieldsForEntities => PassDescriptor {
            name: "fields_for_entities",
            inputs: &[PassId::Materialize],
            outputs: &[ArtifactId::RefFields],
            invalidation_key: "program + ledger",
            invariants: "resolved entity lookups and getContainer read fields",
            reducing: true,
        },
        PassId::FieldsForPorts => PassDescriptor {
            name: "fields_for_ports",
            inputs: &[PassId::FieldsForEntities],
            outputs: &[ArtifactId::RefFields],
            invalidation_key: "program + ledger",
            invariants: "resolved port lookups read fields",
            reducing: true,
        },
        PassId::FieldsForAttributes => PassDescriptor {
            name: "fields_for_attributes",
            inputs: &[PassId::FieldsForEntities],
            outputs: &[ArtifactId::RefFields],
            invalidation_key: "program + ledger",
            invariants: "resolved attribute lookups read fields",
            reducing: true,
        },
        PassId::InlineParameters => PassDescriptor {
            name: "inline_parameters",
            inputs: &[PassId::FieldsForAttributes],
            outputs: &[ArtifactId::ValueFields],
            invalidation_key: "program + constants + ref fields",
            invariants: "no get/set on resolved variables, constant fields never written",
            reducing: true,
        },
        PassId::NamedObjEquality => PassDescriptor {
            name: "named_obj_equality",
            inputs: &[PassId::InlineParameters],
            outputs: &[ArtifactId::NarrowedBodies],
            invalidation_key: "program + ref fields",
            invariants: "identity tests between resolved objects folded",
            reducing: true,
        },
        PassId::InlineTokens => PassDescriptor {
            name: "inline_tokens",
            inputs: &[PassId::InlineParameters],
            outputs: &[ArtifactId::NarrowedBodies],
            invalidation_key: "program + field type tags + options.unboxing",
            invariants: "only sites with fully known types narrowed",
            reducing: true,
        },
        PassId::Cleanup => PassDescriptor {
            name: "cleanup",
            inputs: &[PassId::NamedObjEquality, PassId::InlineTokens],
            outputs: &[ArtifactId::NarrowedBodies],
            invalidation_key: "program",
            invariants: "semantics preserved, every label resolves",
            reducing: true,
        },
        PassId::DeadCode => PassDescriptor {
            name: "dead_code",
            inputs: &[PassId::Cleanup],
            outputs: &[ArtifactId::NarrowedBodies],
            invalidation_key: "program",
            invariants: "no removed method is called, no removed field is read",
            reducing: true,
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::DeadCode, PassId::FieldsForPorts],
            outputs: &[ArtifactId::PipelineCert],
            invalidation_key: "program + tags + class maps",
            invariants: "P1 constant-field write-freedom, P2 bijection, P3 labels resolve",
            reducing: false,
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 10] = [
    PassId::Materialize,
    PassId::FieldsForEntities,
    PassId::FieldsForPorts,
    PassId::FieldsForAttributes,
    PassId::InlineParameters,
    PassId::NamedObjEquality,
    PassId::InlineTokens,
    PassId::Cleanup,
    PassId::DeadCode,
    PassId::Verify,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_materialize_is_alone() {
        assert_eq!(required_passes(PassId::Materialize), vec![PassId::Materialize]);
    }

    #[test]
    fn required_passes_inline_parameters_skips_ports_and_tokens() {
        let passes = required_passes(PassId::InlineParameters);
        assert_eq!(
            passes,
            vec![
                PassId::Materialize,
                PassId::FieldsForEntities,
                PassId::FieldsForAttributes,
                PassId::InlineParameters,
            ]
        );
        assert!(!passes.contains(&PassId::FieldsForPorts));
        assert!(!passes.contains(&PassId::InlineTokens));
    }

    #[test]
    fn required_passes_verify_includes_all() {
        let passes = required_passes(PassId::Verify);
        assert_eq!(passes.len(), ALL_PASSES.len());
        assert_eq!(passes.first(), Some(&PassId::Materialize));
        assert_eq!(passes.last(), Some(&PassId::Verify));
    }

    #[test]
    fn required_passes_respect_dependencies() {
        for &terminal in &ALL_PASSES {
            let passes = required_passes(terminal);
            for (i, &pass) in passes.iter().enumerate() {
                for dep in descriptor(pass).inputs {
                    let pos = passes.iter().position(|p| p == dep).unwrap();
                    assert!(pos < i, "{:?} must run before {:?}", dep, pass);
                }
            }
        }
    }

    #[test]
    fn only_materialize_and_verify_run_once() {
        let once: Vec<PassId> = ALL_PASSES
            .iter()
            .copied()
            .filter(|p| !descriptor(*p).reducing)
            .collect();
        assert_eq!(once, vec![PassId::Materialize, PassId::Verify]);
    }

    #[test]
    fn descriptor_names_are_unique() {
        let names: HashSet<&str> = ALL_PASSES.iter().map(|p| descriptor(*p).name).collect();
        assert_eq!(names.len(), ALL_PASSES.len());
    }

    struct Two(bool, bool);

    impl StageCert for Two {
        fn all_pass(&self) -> bool {
            self.0 && self.1
        }

        fn obligations(&self) -> Vec<(&'static str, bool)> {
            vec![("first", self.0), ("second", self.1)]
        }
    }

    #[test]
    fn failed_lists_unmet_obligations() {
        assert!(Two(true, true).failed().is_empty());
        assert_eq!(Two(true, false).failed(), vec!["second"]);
    }
}
