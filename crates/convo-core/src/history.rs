use crate::types::{HistoryEntry, MessageOrigin, MessageRecord, ParticipantId, Sender};

/// Order in which the history service reported its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOrder {
    /// Oldest first.
    Ascending,
    /// Newest first.
    Descending,
    /// Too short, all-equal, or mixed.
    Ambiguous,
}

/// Classify the service order of `entries` by their ids.
pub fn detect_order(entries: &[HistoryEntry]) -> HistoryOrder {
    let mut rising = false;
    let mut falling = false;
    for pair in entries.windows(2) {
        if pair[0].id < pair[1].id {
            rising = true;
        } else if pair[0].id > pair[1].id {
            falling = true;
        }
    }

    match (rising, falling) {
        (true, false) => HistoryOrder::Ascending,
        (false, true) => HistoryOrder::Descending,
        _ => HistoryOrder::Ambiguous,
    }
}

/// Normalize fetched entries into history records ascending by id.
///
/// Ambiguous service order is treated as newest-first.
pub fn normalize_history(
    mut entries: Vec<HistoryEntry>,
    self_id: &ParticipantId,
) -> Vec<MessageRecord> {
    match detect_order(&entries) {
        HistoryOrder::Ascending => {}
        HistoryOrder::Descending | HistoryOrder::Ambiguous => entries.reverse(),
    }

    let mut records: Vec<MessageRecord> = entries
        .into_iter()
        .map(|entry| {
            let is_self = entry.sender_id.as_ref() == Some(self_id);
            let sender = entry
                .sender_id
                .map(Sender::Participant)
                .unwrap_or(Sender::Unknown);
            MessageRecord {
                id: entry.id,
                content: entry.content,
                sender,
                is_self,
                origin: MessageOrigin::History,
            }
        })
        .collect();

    // Mixed orders still need to come out ascending.
    records.sort_by_key(|record| record.id);
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, sender: Option<u64>) -> HistoryEntry {
        HistoryEntry {
            id,
            content: format!("m{id}"),
            sender_id: sender.map(ParticipantId::from),
        }
    }

    fn ids(records: &[MessageRecord]) -> Vec<u64> {
        records.iter().map(|record| record.id).collect()
    }

    #[test]
    fn detects_service_order() {
        assert_eq!(
            detect_order(&[entry(1, None), entry(2, None)]),
            HistoryOrder::Ascending
        );
        assert_eq!(
            detect_order(&[entry(3, None), entry(2, None), entry(2, None)]),
            HistoryOrder::Descending
        );
        assert_eq!(detect_order(&[entry(1, None)]), HistoryOrder::Ambiguous);
        assert_eq!(
            detect_order(&[entry(1, None), entry(3, None), entry(2, None)]),
            HistoryOrder::Ambiguous
        );
    }

    #[test]
    fn newest_first_history_comes_out_ascending() {
        let records = normalize_history(
            vec![entry(30, Some(2)), entry(20, Some(1)), entry(10, Some(2))],
            &1.into(),
        );
        assert_eq!(ids(&records), vec![10, 20, 30]);
        assert!(records[1].is_self);
        assert!(!records[0].is_self);
    }

    #[test]
    fn ascending_history_is_kept() {
        let records = normalize_history(vec![entry(1, Some(2)), entry(2, Some(2))], &1.into());
        assert_eq!(ids(&records), vec![1, 2]);
    }

    #[test]
    fn ambiguous_equal_ids_are_reversed_as_newest_first() {
        let mut first = entry(5, Some(1));
        first.content = "newer".into();
        let mut second = entry(5, Some(2));
        second.content = "older".into();

        let records = normalize_history(vec![first, second], &1.into());
        assert_eq!(records[0].content, "older");
        assert_eq!(records[1].content, "newer");
    }

    #[test]
    fn mixed_order_is_sorted() {
        let records = normalize_history(
            vec![entry(2, None), entry(9, None), entry(4, None)],
            &1.into(),
        );
        assert_eq!(ids(&records), vec![2, 4, 9]);
    }

    #[test]
    fn missing_sender_becomes_unknown_and_everything_is_history() {
        let records = normalize_history(vec![entry(100, None)], &1.into());
        assert_eq!(records[0].sender, Sender::Unknown);
        assert!(!records[0].is_self);
        assert_eq!(records[0].origin, MessageOrigin::History);
    }
}
