//! Promotion of element functions shared across journeys
//!
//! Runs once per compile run, after every journey is matched and resolved and
//! before anything is rendered. The plan decides which element functions move
//! from the journeys' own modules into `modules/shared.ts`.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::codegen::base_name;
use crate::ir::OpKind;
use crate::pipeline::CompiledJourney;
use crate::selectors::{ElementKind, LocatorStrategy, ResolvedElement};

/// Structural signature of an element function
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Signature {
    pub kind: &'static str,
    pub role: Option<String>,
    /// Case-folded, whitespace-collapsed name or text
    pub text: Option<String>,
    pub exact: bool,
    pub toast: bool,
    pub ops: BTreeSet<OpKind>,
}

impl Signature {
    pub fn of(element: &ResolvedElement, ops: &BTreeSet<OpKind>) -> Self {
        let strategy = &element.primary.strategy;
        let role = match strategy {
            LocatorStrategy::Role { role, .. } => Some(role.to_string()),
            _ => None,
        };
        Self {
            kind: strategy.kind(),
            role,
            text: strategy.match_text(),
            exact: strategy.is_exact(),
            toast: matches!(element.kind, ElementKind::Toast { .. }),
            ops: ops.clone(),
        }
    }

    /// Token set used for similarity
    pub fn tokens(&self) -> BTreeSet<String> {
        let mut tokens = BTreeSet::new();
        tokens.insert(format!("kind:{}", self.kind));
        tokens.insert(format!("exact:{}", self.exact));
        tokens.insert(format!("toast:{}", self.toast));
        if let Some(role) = &self.role {
            tokens.insert(format!("role:{}", role));
        }
        if let Some(text) = &self.text {
            tokens.insert(format!("text:{}", text));
            for word in text.split_whitespace() {
                tokens.insert(format!("word:{}", word));
            }
        }
        for op in &self.ops {
            tokens.insert(format!("op:{}", op.as_str()));
        }
        tokens
    }
}

/// Jaccard similarity of two token sets
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// A function group emitted once in the shared module
#[derive(Debug, Clone, PartialEq)]
pub struct SharedElement {
    /// The element whose locator the shared function uses
    pub element: ResolvedElement,
    /// Union of the operations every member journey applies
    pub ops: BTreeSet<OpKind>,
    pub journeys: BTreeSet<String>,
}

/// An element similar to another journey's element but rendering a different
/// locator; it stays in its own journey module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearDuplicate {
    pub journey_id: String,
    pub key: String,
    pub like_journey: String,
    pub like_key: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromotionPlan {
    /// Shared function base name to its element
    pub shared: BTreeMap<String, SharedElement>,
    pub near_duplicates: Vec<NearDuplicate>,
    /// (journey id, element key) to shared function base name
    index: BTreeMap<(String, String), String>,
}

impl PromotionPlan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }

    pub fn shared_name(&self, journey_id: &str, key: &str) -> Option<&str> {
        self.index
            .get(&(journey_id.to_string(), key.to_string()))
            .map(String::as_str)
    }

    /// Take one journey's element back into its own module, e.g. once the heal
    /// loop tunes it. The shared function stays for the other journeys.
    pub fn demote(&mut self, journey_id: &str, key: &str) -> bool {
        let removed = self
            .index
            .remove(&(journey_id.to_string(), key.to_string()))
            .is_some();
        if removed {
            debug!("Demoted {} in {} from the shared module", key, journey_id);
        }
        removed
    }
}

struct Member {
    journey_id: String,
    key: String,
    expression: String,
    ops: BTreeSet<OpKind>,
}

struct Group {
    tokens: BTreeSet<String>,
    element: ResolvedElement,
    members: Vec<Member>,
}

/// Groups structurally similar elements across journeys
#[derive(Debug, Clone)]
pub struct PromotionPlanner {
    threshold: f64,
}

impl PromotionPlanner {
    /// `threshold` is the minimum Jaccard similarity for two elements to be
    /// considered together; `1.0` means equality. Only members rendering the
    /// same locator as the group's first element share its function.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn plan(&self, journeys: &[&CompiledJourney]) -> PromotionPlan {
        let mut ordered: Vec<&CompiledJourney> = journeys.to_vec();
        ordered.sort_by(|a, b| a.journey.id.cmp(&b.journey.id));

        let mut groups: Vec<Group> = Vec::new();
        for compiled in ordered {
            for (key, element) in &compiled.elements {
                let ops = compiled.ops_for(key);
                let tokens = Signature::of(element, &ops).tokens();
                let member = Member {
                    journey_id: compiled.journey.id.clone(),
                    key: key.clone(),
                    expression: element.primary.strategy.expression(),
                    ops,
                };
                let existing = groups.iter_mut().find(|g| {
                    !g.members.iter().any(|m| m.journey_id == compiled.journey.id)
                        && jaccard(&g.tokens, &tokens) >= self.threshold
                });
                match existing {
                    Some(group) => group.members.push(member),
                    None => groups.push(Group {
                        tokens,
                        element: element.clone(),
                        members: vec![member],
                    }),
                }
            }
        }

        let mut plan = PromotionPlan::empty();
        let mut taken = BTreeSet::new();
        for group in groups {
            let expression = group.element.primary.strategy.expression();
            let (bound, near): (Vec<Member>, Vec<Member>) = group
                .members
                .into_iter()
                .partition(|m| m.expression == expression);
            let Some(first) = bound.first() else {
                continue;
            };
            for member in near {
                info!(
                    "{} in {} resembles {} in {} but renders a different locator; not promoted",
                    member.key, member.journey_id, first.key, first.journey_id
                );
                plan.near_duplicates.push(NearDuplicate {
                    journey_id: member.journey_id,
                    key: member.key,
                    like_journey: first.journey_id.clone(),
                    like_key: first.key.clone(),
                });
            }
            if bound.len() < 2 {
                continue;
            }

            let mut name = base_name(&group.element);
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{}{}", base_name(&group.element), n);
                n += 1;
            }
            let journeys: BTreeSet<String> = bound.iter().map(|m| m.journey_id.clone()).collect();
            let mut ops = BTreeSet::new();
            info!("Promoting {} (used by {} journeys)", name, journeys.len());
            for member in bound {
                ops.extend(member.ops);
                plan.index.insert((member.journey_id, member.key), name.clone());
            }
            plan.shared.insert(
                name,
                SharedElement {
                    element: group.element,
                    ops,
                    journeys,
                },
            );
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&tokens(&["a", "b"]), &tokens(&["a", "b"])), 1.0);
        assert_eq!(jaccard(&tokens(&["a", "b"]), &tokens(&["a", "c"])), 1.0 / 3.0);
    }

    #[test]
    fn test_demote_keeps_shared_function() {
        let mut plan = PromotionPlan::empty();
        plan.index
            .insert(("J-1".to_string(), "button:save".to_string()), "saveButton".to_string());
        assert_eq!(plan.shared_name("J-1", "button:save"), Some("saveButton"));
        assert!(plan.demote("J-1", "button:save"));
        assert_eq!(plan.shared_name("J-1", "button:save"), None);
        assert!(!plan.demote("J-1", "button:save"));
    }
}
