//! Compiled command, ambient and reply matchers.

use std::{collections::HashMap, sync::LazyLock};

use {regex::Regex, warren_config::InputMatcher};

/// One compiled `CommandMatchers` / `MessageMatchers` entry.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub command: String,
    pub regex: Regex,
    pub contexts: Vec<String>,
}

impl Matcher {
    /// Command matchers must cover the whole of the addressed text.
    pub fn command(m: &InputMatcher) -> Result<Self, regex::Error> {
        Ok(Self {
            command: m.command.clone(),
            regex: Regex::new(&anchored(&m.regex))?,
            contexts: m.contexts.clone(),
        })
    }

    /// Ambient matchers may match anywhere in the message.
    pub fn ambient(m: &InputMatcher) -> Result<Self, regex::Error> {
        Ok(Self {
            command: m.command.clone(),
            regex: Regex::new(&m.regex)?,
            contexts: m.contexts.clone(),
        })
    }

    /// Capture groups of a match, `""` for groups that did not take part.
    pub fn captures(&self, text: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(text)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|g| g.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

pub(crate) fn anchored(re: &str) -> String {
    format!(r"^\s*(?:{re})\s*$")
}

/// Reply matchers every task can prompt with, keyed by label.
static STOCK_REPLIES: LazyLock<HashMap<&'static str, Option<Regex>>> = LazyLock::new(|| {
    [
        ("Email", r"[\w.+-]+@(?:[\w-]+\.)+[\w-]+"),
        ("Domain", r"@(?:[\w-]+\.)+[\w-]+"),
        ("OTP", r"\d{6}"),
        ("IPAddr", r"(?:[0-9]{1,3}\.){3}[0-9]{1,3}"),
        ("SimpleString", r#"[-\w .,'"?!]+"#),
        ("YesNo", r"(?i:yes|no|y|n)"),
    ]
    .into_iter()
    .map(|(label, re)| (label, Regex::new(&anchored(re)).ok()))
    .collect()
});

pub fn stock_reply(label: &str) -> Option<Regex> {
    STOCK_REPLIES.get(label).and_then(Clone::clone)
}

/// A task's own reply matchers, anchored like commands.
pub fn compile_replies(matchers: &[InputMatcher]) -> Result<HashMap<String, Regex>, regex::Error> {
    matchers
        .iter()
        .map(|m| Ok((m.label.clone(), Regex::new(&anchored(&m.regex))?)))
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn input(regex: &str, command: &str) -> InputMatcher {
        InputMatcher {
            regex: regex.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    #[test]
    fn commands_are_anchored_ambients_are_not() {
        let cmd = Matcher::command(&input("(?i:ping)", "ping")).unwrap();
        assert!(cmd.captures("  PING ").is_some());
        assert!(cmd.captures("ping pong").is_none());

        let amb = Matcher::ambient(&input(r"(?i:\bbeer\b)", "beer")).unwrap();
        assert!(amb.captures("who wants a beer tonight").is_some());
    }

    #[test]
    fn optional_groups_become_empty_strings() {
        let m = Matcher::command(&input(r"history ([\w-]+)(?: (\d+))?", "history")).unwrap();
        assert_eq!(m.captures("history backup").unwrap(), vec!["backup", ""]);
        assert_eq!(m.captures("history backup 3").unwrap(), vec!["backup", "3"]);
    }

    #[rstest]
    #[case("YesNo", "Yes", true)]
    #[case("YesNo", "n", true)]
    #[case("YesNo", "maybe", false)]
    #[case("OTP", "123456", true)]
    #[case("OTP", "12345", false)]
    #[case("Email", "alice@example.com", true)]
    #[case("IPAddr", "10.0.0.1", true)]
    #[case("SimpleString", "hello, world!", true)]
    fn stock_matchers(#[case] label: &str, #[case] text: &str, #[case] ok: bool) {
        assert_eq!(stock_reply(label).unwrap().is_match(text), ok);
    }

    #[test]
    fn unknown_stock_label() {
        assert!(stock_reply("Nope").is_none());
    }
}
