use crate::ids::ChatId;

/// Actions the owner of a selection session can take from the prompt buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Flip one destination in or out of the selection
    Toggle(ChatId),

    /// Select every registered destination
    SelectAll,

    /// Empty the selection
    Clear,

    /// Repost to the current selection and close the session
    Send,
}

impl SessionAction {
    /// Encode as Telegram callback data (at most 64 bytes; an i64 id fits easily).
    pub fn to_callback_data(&self) -> String {
        match self {
            Self::Toggle(id) => format!("t:{}", id.0),
            Self::SelectAll => "all".to_string(),
            Self::Clear => "clear".to_string(),
            Self::Send => "send".to_string(),
        }
    }

    /// Decode callback data. Returns `None` for anything this bot did not emit.
    pub fn from_callback_data(data: &str) -> Option<Self> {
        match data {
            "all" => Some(Self::SelectAll),
            "clear" => Some(Self::Clear),
            "send" => Some(Self::Send),
            other => {
                let id = other.strip_prefix("t:")?.parse::<i64>().ok()?;
                Some(Self::Toggle(ChatId(id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data_roundtrip() {
        for action in [
            SessionAction::Toggle(ChatId(-1001234567890)),
            SessionAction::Toggle(ChatId(42)),
            SessionAction::SelectAll,
            SessionAction::Clear,
            SessionAction::Send,
        ] {
            let data = action.to_callback_data();
            assert!(data.len() <= 64);
            assert_eq!(SessionAction::from_callback_data(&data), Some(action));
        }
    }

    #[test]
    fn rejects_foreign_callback_data() {
        assert_eq!(SessionAction::from_callback_data(""), None);
        assert_eq!(SessionAction::from_callback_data("t:"), None);
        assert_eq!(SessionAction::from_callback_data("t:abc"), None);
        assert_eq!(SessionAction::from_callback_data("toggle:1"), None);
        assert_eq!(SessionAction::from_callback_data("SEND"), None);
    }
}
