use std::collections::BTreeMap;

use common_mm::ticket::{Player, Ticket};

/// Partition a proposal into `num_teams` teams, strongest tickets placed
/// first onto the currently weakest team. Parties are indivisible, so team
/// sizes can differ by up to `max(party size) - 1` when parties are mixed;
/// the player total is always preserved.
pub fn build_teams(proposal: &[Ticket], num_teams: u32) -> Vec<Vec<Player>> {
    let num_teams = num_teams.max(1) as usize;
    let mut units: Vec<&Ticket> = proposal.iter().collect();
    units.sort_by(|a, b| {
        b.average_skill()
            .partial_cmp(&a.average_skill())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.creation_time.cmp(&b.creation_time))
            .then_with(|| a.ticket_id.cmp(&b.ticket_id))
    });

    let mut teams: Vec<Vec<Player>> = vec![Vec::new(); num_teams];
    let mut totals = vec![0u64; num_teams];

    for unit in units {
        let mut weakest = 0;
        for i in 1..totals.len() {
            if totals[i] < totals[weakest] {
                weakest = i;
            }
        }
        teams[weakest].extend(unit.players.iter().cloned());
        totals[weakest] += unit.total_skill();
    }

    teams
}

/// The event wire shape: `team_1`..`team_N`.
pub fn into_team_map(teams: Vec<Vec<Player>>) -> BTreeMap<String, Vec<Player>> {
    teams
        .into_iter()
        .enumerate()
        .map(|(i, players)| (format!("team_{}", i + 1), players))
        .collect()
}
