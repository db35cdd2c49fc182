//! Weighted action table.

use rand::RngExt;
use strum::{Display, IntoStaticStr};

use crate::event::EventKind;

/// Board mutations a simulated actor can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    CreateCard,
    MoveCard,
    Vote,
    GroupCards,
    GroupCardOnto,
}

impl ActionKind {
    /// Notification the server broadcasts when this action succeeds.
    pub fn event_kind(self) -> EventKind {
        match self {
            ActionKind::CreateCard => EventKind::CardCreated,
            ActionKind::MoveCard => EventKind::CardUpdated,
            ActionKind::Vote => EventKind::VoteChanged,
            ActionKind::GroupCards => EventKind::CardsGrouped,
            ActionKind::GroupCardOnto => EventKind::CardGroupedOnto,
        }
    }
}

/// Relative weights, in selection order.
pub const ACTION_WEIGHTS: &[(ActionKind, u32)] = &[
    (ActionKind::CreateCard, 40),
    (ActionKind::MoveCard, 20),
    (ActionKind::Vote, 20),
    (ActionKind::GroupCards, 10),
    (ActionKind::GroupCardOnto, 10),
];

pub fn total_weight() -> u32 {
    ACTION_WEIGHTS.iter().map(|(_, w)| w).sum()
}

/// Walk the cumulative weights until `roll` falls inside a slot.
///
/// `roll` is expected in `[0, total_weight())`; larger values select the last
/// entry.
pub fn pick(roll: u32) -> ActionKind {
    let mut cumulative = 0;
    for &(kind, weight) in ACTION_WEIGHTS {
        cumulative += weight;
        if roll < cumulative {
            return kind;
        }
    }
    ACTION_WEIGHTS[ACTION_WEIGHTS.len() - 1].0
}

/// Draw one action.
pub fn sample() -> ActionKind {
    pick(rand::rng().random_range(0..total_weight()))
}

/// Uniform index into a collection of `len` items.
pub(crate) fn random_index(len: usize) -> usize {
    rand::rng().random_range(0..len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    #[test]
    fn test_total_weight() {
        assert_eq!(total_weight(), 100);
    }

    #[rstest]
    #[case(0, ActionKind::CreateCard)]
    #[case(39, ActionKind::CreateCard)]
    #[case(40, ActionKind::MoveCard)]
    #[case(59, ActionKind::MoveCard)]
    #[case(60, ActionKind::Vote)]
    #[case(80, ActionKind::GroupCards)]
    #[case(90, ActionKind::GroupCardOnto)]
    #[case(99, ActionKind::GroupCardOnto)]
    fn test_pick_boundaries(#[case] roll: u32, #[case] expected: ActionKind) {
        assert_eq!(pick(roll), expected);
    }

    #[test]
    fn test_pick_distribution_matches_weights() {
        let mut counts: HashMap<ActionKind, u32> = HashMap::new();
        for roll in 0..total_weight() {
            *counts.entry(pick(roll)).or_default() += 1;
        }
        for &(kind, weight) in ACTION_WEIGHTS {
            assert_eq!(counts[&kind], weight, "{kind}");
        }
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(ActionKind::MoveCard.event_kind(), EventKind::CardUpdated);
        assert_eq!(
            ActionKind::GroupCardOnto.event_kind(),
            EventKind::CardGroupedOnto
        );
    }
}
