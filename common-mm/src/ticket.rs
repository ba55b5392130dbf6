use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One queued player. Tickets carry at least one of these; a multi-player
/// ticket is a party and is never split across teams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub player_name: String,
    pub skill: u32,
    #[serde(default)]
    pub region_preference: Vec<HashMap<String, u32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Searching,
    Matched,
    Cancelled,
}

/// A matchmaking request for a party of one or more players. Immutable once
/// created; the pool score (party average skill) is always recomputed from
/// `players`, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket_id: String,
    pub players: Vec<Player>,
    pub game_mode: String,
    #[serde(default)]
    pub region_preference: Vec<HashMap<String, u32>>,
    /// Region name -> measured round-trip in milliseconds (>= 10).
    pub latency_data: HashMap<String, u32>,
    /// Epoch seconds at creation.
    pub creation_time: u64,
    pub status: TicketStatus,
}

impl Ticket {
    pub fn party_size(&self) -> usize {
        self.players.len()
    }

    pub fn total_skill(&self) -> u64 {
        self.players.iter().map(|p| u64::from(p.skill)).sum()
    }

    /// Party average skill, the pool ordering score.
    pub fn average_skill(&self) -> f64 {
        if self.players.is_empty() {
            return 0.0;
        }
        self.total_skill() as f64 / self.players.len() as f64
    }
}
