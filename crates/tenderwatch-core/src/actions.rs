use std::fmt;

/// Closed set of button actions carried in callback tokens.
///
/// The wire format stays the original underscore-delimited shape
/// (`accept_42`, `lot_42_3`), but construction and parsing live here so a
/// handler can never mis-index a positional segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Accept(i64),
    Reject(i64),
    Claim(i64),
    Postpone(i64),
    /// Open the participation conversation for an accepted lead.
    Process(i64),
    View(i64),
    SelectLot(i64, usize),
    CancelParticipation(i64),
}

impl CallbackAction {
    pub fn encode(&self) -> String {
        match self {
            CallbackAction::Accept(id) => format!("accept_{id}"),
            CallbackAction::Reject(id) => format!("reject_{id}"),
            CallbackAction::Claim(id) => format!("claim_{id}"),
            CallbackAction::Postpone(id) => format!("postpone_{id}"),
            CallbackAction::Process(id) => format!("process_{id}"),
            CallbackAction::View(id) => format!("view_{id}"),
            CallbackAction::SelectLot(id, index) => format!("lot_{id}_{index}"),
            CallbackAction::CancelParticipation(id) => format!("partcancel_{id}"),
        }
    }

    pub fn decode(token: &str) -> Option<Self> {
        let mut parts = token.split('_');
        let tag = parts.next()?;
        let id: i64 = parts.next()?.parse().ok()?;
        let action = match tag {
            "accept" => CallbackAction::Accept(id),
            "reject" => CallbackAction::Reject(id),
            "claim" => CallbackAction::Claim(id),
            "postpone" => CallbackAction::Postpone(id),
            "process" => CallbackAction::Process(id),
            "view" => CallbackAction::View(id),
            "partcancel" => CallbackAction::CancelParticipation(id),
            "lot" => {
                let index: usize = parts.next()?.parse().ok()?;
                return match parts.next() {
                    None => Some(CallbackAction::SelectLot(id, index)),
                    Some(_) => None,
                };
            }
            _ => return None,
        };
        match parts.next() {
            None => Some(action),
            Some(_) => None,
        }
    }

}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_round_trips() {
        let actions = [
            CallbackAction::Accept(1),
            CallbackAction::Reject(42),
            CallbackAction::Claim(7),
            CallbackAction::Postpone(99),
            CallbackAction::Process(3),
            CallbackAction::View(12),
            CallbackAction::SelectLot(5, 0),
            CallbackAction::SelectLot(5, 11),
            CallbackAction::CancelParticipation(8),
        ];
        for action in actions {
            let token = action.encode();
            assert_eq!(CallbackAction::decode(&token), Some(action), "{token}");
        }
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for token in [
            "",
            "accept",
            "accept_",
            "accept_x",
            "accept_1_2",
            "lot_1",
            "lot_1_b",
            "lot_1_2_3",
            "unknown_5",
        ] {
            assert_eq!(CallbackAction::decode(token), None, "{token}");
        }
    }
}
