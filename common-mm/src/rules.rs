use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const RULES_PATH_ENV: &str = "MM_RULES_PATH";
pub const DEFAULT_RULES_PATH: &str = "gameModes.json";

const DEFAULT_MAX_LATENCY_MS: u32 = 150;

/// One entry of a mode's search-expansion schedule: once a ticket has waited
/// `after_seconds`, the skill window widens to `new_tolerance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandStep {
    pub after_seconds: u64,
    pub new_tolerance: f64,
}

/// Per-mode matchmaking rules, loaded from the rules document at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeRules {
    pub team_size: u32,
    pub num_teams: u32,
    pub skill_tolerance: f64,
    #[serde(default)]
    pub expand_search_steps: Vec<ExpandStep>,
    #[serde(default = "default_max_latency")]
    pub max_latency: u32,
}

fn default_max_latency() -> u32 {
    DEFAULT_MAX_LATENCY_MS
}

impl ModeRules {
    /// Total players a match of this mode must contain.
    pub fn match_size(&self) -> usize {
        (self.team_size * self.num_teams) as usize
    }
}

/// Read-only registry of every configured game mode, in declaration order.
/// No reload: restart the engine to pick up rule changes.
#[derive(Debug, Clone, Default)]
pub struct RulesRegistry {
    modes: Vec<(String, ModeRules)>,
    index: HashMap<String, usize>,
}

impl RulesRegistry {
    /// Load the JSON rules document. A missing file is `ConfigMissing`,
    /// which callers treat as fatal at startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                EngineError::ConfigMissing {
                    path: path.display().to_string(),
                }
            } else {
                EngineError::ConfigInvalid(err.to_string())
            }
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        // serde_json keeps object order (preserve_order), so mode iteration
        // follows the document's declaration order.
        let doc: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(raw).map_err(|err| EngineError::ConfigInvalid(err.to_string()))?;

        let mut modes = Vec::with_capacity(doc.len());
        for (name, value) in doc {
            let rules: ModeRules = serde_json::from_value(value)
                .map_err(|err| EngineError::ConfigInvalid(format!("mode '{name}': {err}")))?;
            if rules.team_size < 1 || rules.num_teams < 2 {
                return Err(EngineError::ConfigInvalid(format!(
                    "mode '{name}': teamSize must be >= 1 and numTeams >= 2"
                )));
            }
            modes.push((name, rules));
        }
        Ok(Self::from_modes(modes))
    }

    pub fn from_modes(modes: Vec<(String, ModeRules)>) -> Self {
        let index = modes
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
        Self { modes, index }
    }

    pub fn get(&self, mode: &str) -> Option<&ModeRules> {
        self.index.get(mode).map(|&i| &self.modes[i].1)
    }

    pub fn contains(&self, mode: &str) -> bool {
        self.index.contains_key(mode)
    }

    /// Modes in declaration order, the order the scheduler visits them.
    pub fn modes(&self) -> impl Iterator<Item = (&str, &ModeRules)> {
        self.modes.iter().map(|(name, rules)| (name.as_str(), rules))
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// The registry re-serialized for read APIs such as `/game_modes`.
    pub fn to_document(&self) -> serde_json::Value {
        let mut doc = serde_json::Map::new();
        for (name, rules) in &self.modes {
            doc.insert(
                name.clone(),
                serde_json::to_value(rules).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(doc)
    }
}
