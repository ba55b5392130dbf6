use common_mm::error::EngineError;
use common_mm::metrics;
use common_mm::rules::ModeRules;
use common_mm::store::TicketStore;
use common_mm::ticket::Ticket;
use tracing::{debug, warn};

/// Result of one proposal attempt for a mode.
#[derive(Debug)]
pub enum ProposalOutcome {
    /// Tickets whose player counts sum exactly to the match size. The first
    /// entry is the anchor.
    Ready(Vec<Ticket>),
    PoolTooSmall,
    /// The popped anchor's record was gone; the stale pool entry is dropped.
    StaleAnchor,
    /// No candidate combination filled the match; the anchor went back into
    /// the pool at its original score.
    NoProposal,
}

/// Anchor selection, dynamic tolerance, candidate scan and party-aware
/// packing. Pops the lowest-scored ticket so the oldest/weakest waiters get
/// priority; a failed round re-inserts it, and its widening wait time opens
/// the window on the next tick.
pub async fn build(
    store: &TicketStore,
    mode: &str,
    rules: &ModeRules,
    now: u64,
) -> Result<ProposalOutcome, EngineError> {
    let match_size = rules.match_size();
    if store.pool_size(mode).await? < match_size {
        return Ok(ProposalOutcome::PoolTooSmall);
    }

    let Some((anchor_id, anchor_score)) = store.pool_pop_min(mode).await? else {
        return Ok(ProposalOutcome::PoolTooSmall);
    };
    let Some(anchor) = store.get_ticket(&anchor_id).await? else {
        warn!(mode, ticket_id = %anchor_id, "anchor record missing, dropping stale pool entry");
        metrics::matchmaking_metrics().inc_stale_dropped();
        return Ok(ProposalOutcome::StaleAnchor);
    };

    let wait_time = now.saturating_sub(anchor.creation_time);
    let tolerance = effective_tolerance(wait_time, rules);
    let anchor_avg = anchor.average_skill();

    let candidate_ids = store
        .pool_range_by_score(mode, anchor_avg - tolerance, anchor_avg + tolerance)
        .await?;

    let mut candidates = Vec::with_capacity(candidate_ids.len());
    for id in candidate_ids {
        if id == anchor_id {
            continue;
        }
        match store.get_ticket(&id).await? {
            Some(ticket) => candidates.push(ticket),
            None => {
                warn!(mode, ticket_id = %id, "candidate record missing, dropping stale pool entry");
                metrics::matchmaking_metrics().inc_stale_dropped();
                store.pool_remove_many(mode, &[id]).await?;
            }
        }
    }

    // Largest parties first so small tickets can plug the remaining gaps;
    // ties resolve by score then id to keep the round deterministic.
    candidates.sort_by(|a, b| {
        b.party_size()
            .cmp(&a.party_size())
            .then(
                a.average_skill()
                    .partial_cmp(&b.average_skill())
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then_with(|| a.ticket_id.cmp(&b.ticket_id))
    });

    let Some(mut need) = match_size.checked_sub(anchor.party_size()) else {
        store.pool_insert(mode, &anchor_id, anchor_score).await?;
        return Ok(ProposalOutcome::NoProposal);
    };

    let mut proposal = vec![anchor];
    for candidate in candidates {
        if need == 0 {
            break;
        }
        if candidate.party_size() <= need {
            need -= candidate.party_size();
            proposal.push(candidate);
        }
    }

    if need > 0 {
        debug!(
            mode,
            ticket_id = %anchor_id,
            wait_time,
            tolerance,
            "no filling combination, re-inserting anchor"
        );
        store.pool_insert(mode, &anchor_id, anchor_score).await?;
        return Ok(ProposalOutcome::NoProposal);
    }

    Ok(ProposalOutcome::Ready(proposal))
}

/// Skill tolerance after `wait_secs` in the queue: the base tolerance,
/// overridden by the latest applicable expansion step.
pub fn effective_tolerance(wait_secs: u64, rules: &ModeRules) -> f64 {
    let mut steps = rules.expand_search_steps.clone();
    steps.sort_by_key(|s| s.after_seconds);

    let mut tolerance = rules.skill_tolerance;
    for step in steps {
        if wait_secs >= step.after_seconds {
            tolerance = step.new_tolerance;
        }
    }
    tolerance
}
