//! Wire types of the application API.
//!
//! Only the fields the harness reads are modelled; everything is defaulted so
//! that servers omitting optional fields still decode.

use serde::{Deserialize, Serialize};

/// Scene permission flags the harness needs before actions can succeed.
pub const REQUIRED_SCENE_FLAGS: &[&str] = &[
    "allow_add_cards",
    "allow_move_cards",
    "allow_group_cards",
    "allow_voting",
];

/// Every flag forced on the current scene during provisioning.
pub const ALL_SCENE_FLAGS: &[&str] = &[
    "allow_add_cards",
    "allow_edit_cards",
    "allow_move_cards",
    "allow_group_cards",
    "allow_voting",
    "show_votes",
    "allow_comments",
    "show_comments",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Series {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Card {
    pub id: String,
    pub content: String,
    pub column_id: String,
    /// Empty when the card is not grouped.
    #[serde(deserialize_with = "null_as_empty")]
    pub group_id: String,
}

impl Card {
    pub fn is_grouped(&self) -> bool {
        !self.group_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Column {
    pub id: String,
    pub name: String,
    pub order: i64,
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scene {
    pub id: String,
    pub title: String,
    pub mode: String,
    pub flags: Vec<String>,
}

impl Scene {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Required flags this scene lacks.
    pub fn missing_flags(&self) -> Vec<&'static str> {
        REQUIRED_SCENE_FLAGS
            .iter()
            .copied()
            .filter(|flag| !self.has_flag(flag))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Board {
    pub id: String,
    pub name: String,
    pub series_id: String,
    pub status: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub current_scene_id: String,
    pub columns: Vec<Column>,
    pub scenes: Vec<Scene>,
}

impl Board {
    pub fn column_ids(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.id.clone()).collect()
    }

    /// Every card on the board, column by column.
    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.columns.iter().flat_map(|c| c.cards.iter())
    }

    pub fn current_scene(&self) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == self.current_scene_id)
    }
}

/// Decode `null` the same as an absent field.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// Response envelopes.

#[derive(Debug, Deserialize)]
pub(crate) struct BoardEnvelope {
    pub board: Option<Board>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CardEnvelope {
    pub card: Option<Card>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SeriesEnvelope {
    pub series: Option<Series>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SeriesListEnvelope {
    #[serde(default)]
    pub series: Vec<Series>,
}
