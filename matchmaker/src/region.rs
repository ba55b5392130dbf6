use std::collections::BTreeSet;

use common_mm::ticket::Ticket;

/// Pick the server region for a proposal, or `None` when no region is
/// within the latency budget for every ticket. A region with no latency
/// entry on some ticket is not viable: an unmeasured player cannot be
/// assumed playable there.
pub fn select_region(proposal: &[Ticket], max_latency: u32) -> Option<String> {
    let first = proposal.first()?;
    let mut viable: BTreeSet<String> = first
        .latency_data
        .iter()
        .filter(|(_, &ms)| ms <= max_latency)
        .map(|(region, _)| region.clone())
        .collect();

    for ticket in &proposal[1..] {
        viable.retain(|region| {
            ticket
                .latency_data
                .get(region)
                .is_some_and(|&ms| ms <= max_latency)
        });
        if viable.is_empty() {
            return None;
        }
    }

    if viable.len() == 1 {
        return viable.into_iter().next();
    }

    // Weighted player preference dominates; average latency breaks the rest.
    // Strict `>` over the sorted set keeps ties on the alphabetically first
    // region, so the choice is deterministic.
    let mut best: Option<(f64, String)> = None;
    for region in viable {
        let score = score_region(proposal, &region);
        match &best {
            Some((best_score, _)) if score <= *best_score => {}
            _ => best = Some((score, region)),
        }
    }
    best.map(|(_, region)| region)
}

fn score_region(proposal: &[Ticket], region: &str) -> f64 {
    let mut preference: u64 = 0;
    let mut latency_sum: u64 = 0;
    let mut player_count: u64 = 0;

    for ticket in proposal {
        for player in &ticket.players {
            for pref in &player.region_preference {
                if let Some(&weight) = pref.get(region) {
                    preference += u64::from(weight);
                }
            }
        }
        if let Some(&ms) = ticket.latency_data.get(region) {
            latency_sum += u64::from(ms) * ticket.players.len() as u64;
            player_count += ticket.players.len() as u64;
        }
    }

    let avg_latency = if player_count > 0 {
        latency_sum as f64 / player_count as f64
    } else {
        999.0
    };
    let latency_score = (200.0 - avg_latency).max(0.0);

    preference as f64 * 3.0 + latency_score
}
