//! Shifting every transaction id of a log by a fixed amount.

use tourist_core::{TransactionId, TransactionLog};
use tracing::info;

use crate::HistoryError;

/// Adds `shift` to every transaction id and every version's transaction and
/// end-transaction reference.
///
/// Ids are moved through a temporary range above the current span first so
/// no re-key ever lands on an id that is still in use. The log is left
/// untouched on error.
pub fn shift_transactions(log: &mut TransactionLog, shift: i64) -> Result<(), HistoryError> {
    let ids: Vec<TransactionId> = log.transactions().iter().map(|t| t.id).collect();
    let (Some(&min), Some(&max)) = (ids.first(), ids.last()) else {
        return Ok(());
    };
    if shift == 0 {
        return Ok(());
    }
    let overflow = || HistoryError::Renumber {
        shift,
        reason: "transaction ids overflow".to_string(),
    };
    if min.checked_add(shift).map_or(true, |first| first < 1) {
        return Err(HistoryError::Renumber {
            shift,
            reason: format!("first transaction {min} would drop below 1"),
        });
    }
    let temp_offset = (max - min)
        .checked_add(1)
        .and_then(|span| span.checked_add(shift.abs()))
        .ok_or_else(overflow)?;
    max.checked_add(temp_offset).ok_or_else(overflow)?;
    max.checked_add(shift).ok_or_else(overflow)?;

    let mut next = log.clone();
    rekey_all(&mut next, &ids, temp_offset)?;
    let temp_ids: Vec<TransactionId> = ids.iter().map(|id| id + temp_offset).collect();
    rekey_all(&mut next, &temp_ids, shift - temp_offset)?;
    info!(shift, transactions = ids.len(), "shifted transaction ids");
    *log = next;
    Ok(())
}

fn rekey_all(
    log: &mut TransactionLog,
    ids: &[TransactionId],
    delta: i64,
) -> Result<(), HistoryError> {
    for &id in ids {
        log.rekey_transaction(id, id + delta)?;
    }
    for version in log.versions_mut() {
        version.transaction_id += delta;
        if let Some(end) = version.end_transaction_id.as_mut() {
            *end += delta;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tourist_core::{EntityKind, EntityRecord, Operation, ParentRef};

    fn log_with_three_transactions() -> TransactionLog {
        let mut log = TransactionLog::new();
        let at = DateTime::<Utc>::from_timestamp(0, 0).expect("valid timestamp");
        let pool = EntityRecord::pool("Pool", "pool")
            .with_id(4)
            .with_parent(ParentRef::by_id(1));
        for _ in 0..3 {
            let tx = log.begin(at, None);
            log.record(tx.id, Operation::Update, &pool).expect("record");
        }
        log
    }

    #[test]
    fn shift_moves_transactions_and_version_references() {
        let mut log = log_with_three_transactions();
        shift_transactions(&mut log, 2).expect("shift");
        let ids: Vec<_> = log.transactions().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        let spans: Vec<_> = log
            .history(EntityKind::Pool, 4)
            .iter()
            .map(|v| (v.transaction_id, v.end_transaction_id))
            .collect();
        assert_eq!(spans, vec![(3, Some(4)), (4, Some(5)), (5, None)]);
    }

    #[test]
    fn shift_down_works_and_refuses_ids_below_one() {
        let mut log = log_with_three_transactions();
        shift_transactions(&mut log, 1123).expect("up");
        shift_transactions(&mut log, -1120).expect("down");
        let ids: Vec<_> = log.transactions().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![4, 5, 6]);

        let before = log.clone();
        assert!(matches!(
            shift_transactions(&mut log, -4),
            Err(HistoryError::Renumber { .. })
        ));
        assert_eq!(log, before);
    }
}
