//! Convergence detector: drives a lazily loaded list until both of its
//! boundaries settle.
//!
//! A backend may load additional items above, below, or both, depending on
//! scroll direction, so watching one boundary is not enough. Each boundary is
//! scanned independently: capture the boundary item's textual signature,
//! drive focus to it, and wait up to the deadline for the signature to
//! change. A deadline that passes without change settles that boundary.

use std::time::Duration;

use pitchside_backend::{Backend, Boundary, Condition, Element};
use pitchside_core::HarvestError;
use tracing::debug;

/// Reference deadline for every bounded wait.
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(3500);

#[derive(Debug, Clone, Copy)]
pub struct ConvergenceDetector {
    pub deadline: Duration,
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
        }
    }
}

impl ConvergenceDetector {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// Fully materialize a grouped list: invoke the reveal-more control once,
    /// then settle both boundaries. A missing reveal control means nothing
    /// further can be expanded; a present-but-not-interactable one is treated
    /// as already expanded. Fails with `ExplorationTimeout` only if the list
    /// container itself never appears.
    pub async fn materialize_grouped(
        &self,
        backend: &dyn Backend,
        group_class: &str,
        expand_class: &str,
    ) -> Result<Vec<Element>, HarvestError> {
        match backend
            .wait_until(Condition::Clickable(expand_class.to_string()), self.deadline)
            .await
        {
            Ok(control) => backend.click(&control).await?,
            Err(err) if err.is_timeout() => {
                debug!(class = expand_class, "no expandable control, list taken as-is");
            }
            Err(err) => return Err(err.into()),
        }

        backend
            .wait_until(Condition::PresenceOf(group_class.to_string()), self.deadline)
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    HarvestError::ExplorationTimeout {
                        expected: format!("the .{group_class} list container"),
                    }
                } else {
                    err.into()
                }
            })?;

        for boundary in [Boundary::First, Boundary::Last] {
            self.settle_boundary(backend, group_class, boundary).await?;
        }

        Ok(backend.find_all(group_class).await?)
    }

    async fn settle_boundary(
        &self,
        backend: &dyn Backend,
        group_class: &str,
        boundary: Boundary,
    ) -> Result<(), HarvestError> {
        loop {
            let items = backend.find_all(group_class).await?;
            let target = match boundary {
                Boundary::First => items.first(),
                Boundary::Last => items.last(),
            };
            let Some(target) = target.copied() else {
                return Ok(());
            };
            let signature = backend.read_text(&target).await?;
            backend.move_focus_to(&target).await?;

            let condition = Condition::BoundaryTextDiffers {
                class: group_class.to_string(),
                boundary,
                prior: signature,
            };
            match backend.wait_until(condition, self.deadline).await {
                Ok(_) => continue,
                Err(err) if err.is_timeout() => {
                    debug!(?boundary, items = items.len(), "boundary settled");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchside_backend::script::{
        BlockScript, ExpandControl, GroupScript, HarvestScript, PageScript, SearchResultsScript,
    };
    use pitchside_backend::{classes, ScriptedBackend};
    use std::collections::BTreeMap;

    fn group(label: &str) -> GroupScript {
        GroupScript {
            round_label: Some(label.into()),
            blocks: vec![BlockScript {
                date_text: "1.2.".into(),
                home: format!("{label} H"),
                away: format!("{label} A"),
                score_home: Some(1),
                score_away: Some(0),
                finished: true,
                malformed: false,
                empty: false,
            }],
        }
    }

    fn backend_for(script: SearchResultsScript) -> ScriptedBackend {
        let mut pages = BTreeMap::new();
        pages.insert("https://search/".to_string(), PageScript::SearchResults(script));
        ScriptedBackend::new(HarvestScript { pages })
    }

    #[tokio::test]
    async fn terminates_with_both_boundaries_settled() {
        let backend = backend_for(SearchResultsScript {
            consent_button: false,
            expand_control: Some(ExpandControl { clickable: true }),
            groups: vec![group("Matchday 5")],
            groups_above: (1..5).map(|i| group(&format!("Matchday {i}"))).collect(),
            groups_below: (6..10).map(|i| group(&format!("Matchday {i}"))).collect(),
            reveal_batch: 2,
        });
        backend.navigate("https://search/").await.unwrap();

        let detector = ConvergenceDetector::new(Duration::from_millis(10));
        let groups = detector
            .materialize_grouped(&backend, classes::ROUND_GROUP, classes::EXPAND_CONTROL)
            .await
            .unwrap();
        assert_eq!(groups.len(), 9);
    }

    #[tokio::test]
    async fn missing_expand_control_is_not_a_failure() {
        let backend = backend_for(SearchResultsScript {
            consent_button: false,
            expand_control: None,
            groups: vec![group("Matchday 1"), group("Matchday 2")],
            groups_above: vec![],
            groups_below: vec![],
            reveal_batch: 1,
        });
        backend.navigate("https://search/").await.unwrap();

        let detector = ConvergenceDetector::new(Duration::from_millis(10));
        let groups = detector
            .materialize_grouped(&backend, classes::ROUND_GROUP, classes::EXPAND_CONTROL)
            .await
            .unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[tokio::test]
    async fn absent_list_container_is_an_exploration_timeout() {
        let backend = backend_for(SearchResultsScript {
            consent_button: false,
            expand_control: None,
            groups: vec![],
            groups_above: vec![],
            groups_below: vec![],
            reveal_batch: 1,
        });
        backend.navigate("https://search/").await.unwrap();

        let detector = ConvergenceDetector::new(Duration::from_millis(10));
        let err = detector
            .materialize_grouped(&backend, classes::ROUND_GROUP, classes::EXPAND_CONTROL)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::ExplorationTimeout { .. }));
    }
}
