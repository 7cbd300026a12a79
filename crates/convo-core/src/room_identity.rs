use crate::{
    error::SessionError,
    types::{ConversationKey, ParticipantId},
};

const DIRECT_KEY_PREFIX: &str = "dm";

/// Derive the canonical key of the direct conversation between two users.
///
/// Both participants compute the same key independently: the ids are ordered
/// and formatted as `dm_{min}_{max}`.
pub fn compute_key(
    self_id: &ParticipantId,
    peer_id: &ParticipantId,
) -> Result<ConversationKey, SessionError> {
    if self_id == peer_id {
        return Err(SessionError::invalid_conversation(format!(
            "cannot open a conversation between '{self_id}' and itself"
        )));
    }

    let (low, high) = if self_id < peer_id {
        (self_id, peer_id)
    } else {
        (peer_id, self_id)
    };

    Ok(ConversationKey::from_canonical(format!(
        "{DIRECT_KEY_PREFIX}_{low}_{high}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionErrorKind;

    fn text(value: &str) -> ParticipantId {
        ParticipantId::Text(value.to_owned())
    }

    #[test]
    fn formats_numeric_pair_with_smaller_id_first() {
        let key = compute_key(&1.into(), &2.into()).expect("valid pair");
        assert_eq!(key.as_str(), "dm_1_2");
    }

    #[test]
    fn key_is_symmetric() {
        let pairs = [
            (ParticipantId::from(1), ParticipantId::from(2)),
            (ParticipantId::from(10), ParticipantId::from(9)),
            (text("alice"), text("bob")),
            (ParticipantId::from(5), text("carol")),
        ];

        for (a, b) in pairs {
            assert_eq!(
                compute_key(&a, &b).expect("a,b"),
                compute_key(&b, &a).expect("b,a")
            );
        }
    }

    #[test]
    fn numeric_ids_use_numeric_order() {
        let key = compute_key(&10.into(), &9.into()).expect("valid pair");
        assert_eq!(key.as_str(), "dm_9_10");
    }

    #[test]
    fn text_ids_use_lexicographic_order() {
        let key = compute_key(&text("zoe"), &text("adam")).expect("valid pair");
        assert_eq!(key.as_str(), "dm_adam_zoe");
    }

    #[test]
    fn rejects_self_conversation() {
        let err = compute_key(&7.into(), &7.into()).expect_err("self pair must fail");
        assert_eq!(err.kind, SessionErrorKind::InvalidConversation);
        assert_eq!(err.code, "invalid_conversation");
    }
}
