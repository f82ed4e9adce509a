//! Fallback chain resolution.
//!
//! Levels, most specific first:
//! 1. the project's override for the task
//! 2. the project's general provider list
//! 3. the global override for the task
//! 4. the global priority list
//! 5. every remaining provider, ranked ones first (ascending), then registration order
//!
//! Levels are concatenated with duplicates removed. Only registered, configured,
//! enabled providers that can serve the task survive; anything else an override
//! names is silently skipped.

use std::collections::HashSet;

use mflow_models::ProviderState;

/// Ordered provider IDs to try for `task` on behalf of `project_id`.
pub fn resolve_chain(state: &ProviderState, project_id: &str, task: &str) -> Vec<String> {
    let project = state.project_overrides.get(project_id);
    let empty: &[String] = &[];

    let levels: [&[String]; 4] = [
        project
            .and_then(|p| p.tasks.get(task))
            .map_or(empty, Vec::as_slice),
        project.map_or(empty, |p| p.providers.as_slice()),
        state.task_overrides.get(task).map_or(empty, Vec::as_slice),
        state.priority.as_slice(),
    ];

    let mut ranked: Vec<(usize, &mflow_models::ProviderRecord)> =
        state.providers.iter().enumerate().collect();
    ranked.sort_by_key(|(idx, p)| (p.priority_rank.is_none(), p.priority_rank, *idx));

    let mut seen: HashSet<&str> = HashSet::new();
    let mut chain = Vec::new();

    let candidates = levels
        .iter()
        .flat_map(|level| level.iter().map(String::as_str))
        .chain(ranked.iter().map(|(_, p)| p.id.as_str()));

    for id in candidates {
        if !seen.insert(id) {
            continue;
        }
        let usable = state
            .provider(id)
            .is_some_and(|p| p.is_usable() && p.can_serve(task));
        if usable {
            chain.push(id.to_string());
        }
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use mflow_models::{ProjectOverrides, ProviderRecord};

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn state() -> ProviderState {
        let mut state = ProviderState::default();
        for id in ["a", "b", "c", "d", "e"] {
            state.upsert_provider(ProviderRecord::new(id, ["transcription"]));
        }
        state
    }

    #[test]
    fn test_registration_order_without_overrides() {
        assert_eq!(resolve_chain(&state(), "demo", "transcription"), ids(&["a", "b", "c", "d", "e"]));
    }

    #[test]
    fn test_priority_rank_orders_remainder() {
        let mut state = state();
        state.upsert_provider(ProviderRecord::new("d", ["transcription"]).with_rank(2));
        state.upsert_provider(ProviderRecord::new("e", ["transcription"]).with_rank(1));

        assert_eq!(resolve_chain(&state, "demo", "transcription"), ids(&["e", "d", "a", "b", "c"]));
    }

    #[test]
    fn test_most_specific_level_first() {
        let mut state = state();
        state.priority = ids(&["c"]);
        state.task_overrides.insert("transcription".into(), ids(&["d"]));
        state.project_overrides.insert(
            "demo".into(),
            ProjectOverrides {
                providers: ids(&["b"]),
                tasks: [("transcription".to_string(), ids(&["e"]))].into_iter().collect(),
            },
        );

        assert_eq!(resolve_chain(&state, "demo", "transcription"), ids(&["e", "b", "d", "c", "a"]));
        // Other projects only see the global levels
        assert_eq!(resolve_chain(&state, "other", "transcription"), ids(&["d", "c", "a", "b", "e"]));
    }

    #[test]
    fn test_unknown_and_unusable_providers_are_skipped() {
        let mut state = state();
        state.upsert_provider(ProviderRecord::new("b", ["transcription"]).unconfigured());
        let mut disabled = ProviderRecord::new("c", ["transcription"]);
        disabled.enabled = false;
        state.upsert_provider(disabled);
        state.upsert_provider(ProviderRecord::new("d", ["scene_detection"]));
        state.priority = ids(&["ghost", "b", "c", "e"]);

        assert_eq!(resolve_chain(&state, "demo", "transcription"), ids(&["e", "a"]));
    }

    #[test]
    fn test_empty_registry_yields_empty_chain() {
        assert!(resolve_chain(&ProviderState::default(), "demo", "transcription").is_empty());
    }
}
