use std::str::FromStr;

use thiserror::Error;

use crate::language::Language;

/// Fixed-point values are integers scaled by this factor unless told otherwise.
pub const DEFAULT_FIXED_FACTOR: i16 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    pub language: Language,
    pub factor: i16,
    pub user_events: Vec<UserEvent>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            language: Language::L2,
            factor: DEFAULT_FIXED_FACTOR,
            user_events: Vec::new(),
        }
    }
}

impl CompilerOptions {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            ..Self::default()
        }
    }
    #[must_use]
    pub fn with_factor(mut self, factor: i16) -> Self {
        self.factor = factor;
        self
    }
    #[must_use]
    pub fn with_user_event(mut self, name: impl Into<String>, size: usize) -> Self {
        self.user_events.push(UserEvent {
            name: name.into(),
            size,
        });
        self
    }
    /// Id (declaration index) and declaration of a user event.
    pub fn user_event(&self, name: &str) -> Option<(u16, &UserEvent)> {
        self.user_events
            .iter()
            .enumerate()
            .find(|(_, e)| e.name == name)
            .map(|(i, e)| (i as u16, e))
    }
}

/// Event a program can send to the host with `emit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEvent {
    pub name: String,
    /// Number of data words carried by the event.
    pub size: usize,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UserEventParseError {
    #[error("missing event name")]
    MissingName,
    #[error("invalid event size {0:?}")]
    Size(String),
}

impl FromStr for UserEvent {
    type Err = UserEventParseError;

    /// `name` or `name:size`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, size) = match s.split_once(':') {
            Some((name, size)) => (
                name,
                size.trim()
                    .parse()
                    .map_err(|_| UserEventParseError::Size(size.to_string()))?,
            ),
            None => (s, 0),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(UserEventParseError::MissingName);
        }
        Ok(Self {
            name: name.to_string(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_events() {
        assert_eq!(
            "ping".parse(),
            Ok(UserEvent {
                name: "ping".into(),
                size: 0
            })
        );
        assert_eq!(
            "pos:2".parse(),
            Ok(UserEvent {
                name: "pos".into(),
                size: 2
            })
        );
        assert_eq!(
            ":3".parse::<UserEvent>(),
            Err(UserEventParseError::MissingName)
        );
        assert!(matches!(
            "x:big".parse::<UserEvent>(),
            Err(UserEventParseError::Size(_))
        ));
    }

    #[test]
    fn user_event_ids_follow_declaration_order() {
        let options = CompilerOptions::new(Language::Simple)
            .with_user_event("a", 0)
            .with_user_event("b", 3);
        assert_eq!(options.user_event("b").map(|(id, e)| (id, e.size)), Some((1, 3)));
        assert_eq!(options.factor, DEFAULT_FIXED_FACTOR);
    }
}
