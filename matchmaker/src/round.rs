use std::collections::BTreeMap;

use common_mm::error::EngineError;
use common_mm::events::{BusEvent, EventBus, LogLevel};
use common_mm::metrics;
use common_mm::rules::ModeRules;
use common_mm::store::TicketStore;
use common_mm::ticket::{Player, Ticket};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{balance, proposal, region};
use crate::proposal::ProposalOutcome;

/// Terminal state of one mode round.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    PoolTooSmall,
    StaleAnchor,
    NoProposal,
    /// Latency check failed; only the anchor went back (the other candidates
    /// never left the pool).
    NoViableRegion,
    /// A competitor removed part of the proposal first; pool membership was
    /// reconciled and nothing was published.
    LostRace { removed: usize },
    Matched { match_id: String, region: String },
}

/// One full §proposal → balance → region → commit round for a mode.
pub async fn run_round(
    store: &TicketStore,
    bus: &EventBus,
    mode: &str,
    rules: &ModeRules,
    now: u64,
) -> Result<RoundOutcome, EngineError> {
    metrics::matchmaking_metrics().inc_rounds();

    let tickets = match proposal::build(store, mode, rules, now).await? {
        ProposalOutcome::Ready(tickets) => tickets,
        ProposalOutcome::PoolTooSmall => return Ok(RoundOutcome::PoolTooSmall),
        ProposalOutcome::StaleAnchor => return Ok(RoundOutcome::StaleAnchor),
        ProposalOutcome::NoProposal => return Ok(RoundOutcome::NoProposal),
    };

    let teams = balance::into_team_map(balance::build_teams(&tickets, rules.num_teams));

    match region::select_region(&tickets, rules.max_latency) {
        Some(region) => commit(store, bus, mode, &tickets, teams, &region, now).await,
        None => {
            let anchor = &tickets[0];
            info!(
                mode,
                anchor = %anchor.ticket_id,
                tickets = tickets.len(),
                "latency check failed, re-inserting anchor"
            );
            store
                .pool_insert(mode, &anchor.ticket_id, anchor.average_skill())
                .await?;
            Ok(RoundOutcome::NoViableRegion)
        }
    }
}

/// Atomically claim the proposal's pool entries, then publish. The anchor was
/// already popped, so only the follower ids are removed here; a short count
/// means another remover won and the round is abandoned unpublished.
pub async fn commit(
    store: &TicketStore,
    bus: &EventBus,
    mode: &str,
    tickets: &[Ticket],
    teams: BTreeMap<String, Vec<Player>>,
    region: &str,
    now: u64,
) -> Result<RoundOutcome, EngineError> {
    let follower_ids: Vec<String> = tickets[1..]
        .iter()
        .map(|t| t.ticket_id.clone())
        .collect();
    let removed = store.pool_remove_many(mode, &follower_ids).await?;

    if removed < follower_ids.len() {
        warn!(
            mode,
            expected = follower_ids.len(),
            removed,
            "partial pool removal, abandoning round"
        );
        metrics::matchmaking_metrics().inc_commit_races_lost();
        reconcile_pool(store, mode, tickets).await?;
        return Ok(RoundOutcome::LostRace { removed });
    }

    let match_id = Uuid::new_v4().to_string();
    let ticket_ids: Vec<String> = tickets.iter().map(|t| t.ticket_id.clone()).collect();
    let event = BusEvent::MatchFound {
        match_id: match_id.clone(),
        game_mode: mode.to_string(),
        region: region.to_string(),
        teams,
        timestamp: now,
        ticket_ids: ticket_ids.clone(),
    };

    info!(mode, %match_id, region, tickets = ticket_ids.len(), "match committed");
    metrics::matchmaking_metrics().inc_matches_created();

    bus.publish_match_found(event.clone());

    let log_message = format!(
        "MATCH FOUND: {match_id} | Mode: {mode} | Region: {region} | Tickets: {}",
        ticket_ids.len()
    );
    bus.publish_dashboard(BusEvent::log(LogLevel::Info, log_message, now));
    bus.publish_dashboard(BusEvent::pool_updated(mode, Some("match_created"), now));
    bus.publish_dashboard(event);

    Ok(RoundOutcome::Matched {
        match_id,
        region: region.to_string(),
    })
}

/// After a lost race the winner's exact claim is unknowable, so rebuild from
/// ground truth: any proposal ticket whose record is still live and whose id
/// is no longer pooled goes back in at its recomputed score.
async fn reconcile_pool(
    store: &TicketStore,
    mode: &str,
    tickets: &[Ticket],
) -> Result<(), EngineError> {
    for ticket in tickets {
        let live = store.get_ticket(&ticket.ticket_id).await?.is_some();
        if live && !store.pool_contains(mode, &ticket.ticket_id).await? {
            store
                .pool_insert(mode, &ticket.ticket_id, ticket.average_skill())
                .await?;
        }
    }
    Ok(())
}
