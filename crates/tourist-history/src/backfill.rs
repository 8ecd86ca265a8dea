//! Rebuilds history that predates the transaction log: one synthesized
//! transaction per entity of an initial snapshot, one per grouped change-log
//! edit, then the recorded log shifted to follow them.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use tourist_core::{SnapshotEntity, Transaction, TransactionId, TransactionLog};

use crate::changelog::{group_changes, LogChange};
use crate::renumber::shift_transactions;
use crate::replay::VersionReplayer;
use crate::resolve::IdentifierResolver;
use crate::HistoryError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnresolvedPolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone)]
pub struct BackfillInput {
    pub initial: Vec<SnapshotEntity>,
    pub initial_issued_at: DateTime<Utc>,
    pub changes: Vec<LogChange>,
    /// Extra records with ids, used only to resolve ids.
    pub known: Vec<SnapshotEntity>,
    pub unresolved: UnresolvedPolicy,
}

#[derive(Debug)]
pub struct BackfillOutcome {
    pub replayer: VersionReplayer,
    pub synthesized: usize,
    pub shift: i64,
    pub skipped: Vec<String>,
}

fn synthesize(
    replayer: &mut VersionReplayer,
    resolver: &IdentifierResolver,
    entity: SnapshotEntity,
    tx: &Transaction,
    policy: UnresolvedPolicy,
    skipped: &mut Vec<String>,
) -> Result<(), HistoryError> {
    let short_name = entity.short_name.clone();
    let resolved = match resolver.resolve(entity) {
        Ok(resolved) => resolved,
        Err(err @ HistoryError::Unresolved { .. }) if policy == UnresolvedPolicy::Skip => {
            warn!(short_name = %short_name, error = %err, "skipping unresolved entity");
            skipped.push(short_name);
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    replayer.add_entity(&resolved.into_record()?, tx)
}

pub fn backfill(
    input: BackfillInput,
    existing: &TransactionLog,
    mut resolver: IdentifierResolver,
) -> Result<BackfillOutcome, HistoryError> {
    resolver.add_known(input.initial.iter().filter(|e| e.id.is_some()))?;
    resolver.add_known(&input.known)?;

    let mut replayer = VersionReplayer::new();
    let mut skipped = Vec::new();
    let mut next_id: TransactionId = 1;

    for entity in input.initial {
        let tx = Transaction {
            id: next_id,
            issued_at: input.initial_issued_at,
            actor: None,
        };
        next_id += 1;
        synthesize(&mut replayer, &resolver, entity, &tx, input.unresolved, &mut skipped)?;
    }

    for group in group_changes(input.changes) {
        let Some(first) = group.first() else {
            continue;
        };
        let tx = Transaction {
            id: next_id,
            issued_at: first.issued_at,
            actor: Some(format!("user:{}", first.user_id)),
        };
        next_id += 1;
        for change in group {
            synthesize(
                &mut replayer,
                &resolver,
                change.entity,
                &tx,
                input.unresolved,
                &mut skipped,
            )?;
        }
    }

    let mut log = existing.clone();
    let shift = match log.transactions().first() {
        Some(first) if first.id < next_id => next_id - first.id,
        _ => 0,
    };
    shift_transactions(&mut log, shift)?;
    replayer.replay_log(&log)?;

    let synthesized = replayer.synthesized_transactions().len();
    info!(synthesized, shift, skipped = skipped.len(), "backfilled history");
    Ok(BackfillOutcome {
        replayer,
        synthesized,
        shift,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::parse_change_log;
    use tourist_core::{parse_snapshot, EntityKind, EntityRecord, Operation, ParentRef};

    const INITIAL: &str = r#"{"type": "place", "name": "World", "short_name": "world", "parent_short_name": "", "id": 1}
{"type": "place", "name": "South", "short_name": "south", "parent_short_name": "world", "id": 2}
{"type": "club", "name": "Saints", "short_name": "saints", "parent_short_name": "south"}
{"type": "club", "name": "Ghost", "short_name": "ghost", "parent_short_name": "south"}
"#;

    const KNOWN: &str = r#"{"type": "club", "name": "Saints", "short_name": "saints", "parent_short_name": "south", "id": 3}
"#;

    const CHANGES: &str = r#"[2020-01-01 09:00:00,000] INFO: Change by <User 2>: {"type": "club", "name": "Saints UWH", "short_name": "saints", "parent_short_name": "south"}
"#;

    fn existing_log() -> TransactionLog {
        let mut log = TransactionLog::new();
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        let tx = log.begin(at, Some("admin".into()));
        let club = EntityRecord::club("Saints Hockey", "saints")
            .with_id(3)
            .with_parent(ParentRef::by_id(2));
        log.record(tx.id, Operation::Update, &club).expect("record");
        log
    }

    fn input(policy: UnresolvedPolicy) -> BackfillInput {
        BackfillInput {
            initial: parse_snapshot(INITIAL).expect("initial"),
            initial_issued_at: DateTime::<Utc>::from_timestamp(1_552_000_000, 0)
                .expect("valid timestamp"),
            changes: parse_change_log(CHANGES).expect("changes"),
            known: parse_snapshot(KNOWN).expect("known"),
            unresolved: policy,
        }
    }

    #[test]
    fn backfill_prepends_synthesized_history() {
        let outcome = backfill(
            input(UnresolvedPolicy::Skip),
            &existing_log(),
            IdentifierResolver::new(),
        )
        .expect("backfill");
        assert_eq!(outcome.skipped, vec!["ghost".to_string()]);
        // ghost's transaction id is consumed but never written.
        assert_eq!(outcome.synthesized, 4);
        assert_eq!(outcome.shift, 5);

        let spans: Vec<_> = outcome
            .replayer
            .history(EntityKind::Club, 3)
            .iter()
            .map(|v| (v.transaction_id, v.end_transaction_id, v.record.name.clone()))
            .collect();
        assert_eq!(
            spans,
            vec![
                (3, Some(5), "Saints".to_string()),
                (5, Some(6), "Saints UWH".to_string()),
                (6, None, "Saints Hockey".to_string()),
            ]
        );
    }

    #[test]
    fn unresolved_entity_aborts_by_default() {
        let err = backfill(
            input(UnresolvedPolicy::Abort),
            &existing_log(),
            IdentifierResolver::new(),
        )
        .expect_err("ghost has no id");
        assert!(matches!(err, HistoryError::Unresolved { .. }));
    }
}
