use {regex::Regex, tracing::debug};

use crate::{Error, Result};

/// Alias characters that need escaping inside a regex.
const ESCAPED_ALIASES: &str = r"*+^$?\[]{}";
const PLAIN_ALIASES: &str = "&!;:-%#@~<>/";
const ALL_ALIASES: &str = r"&!;:-%#@~<>/*+^$?\[]{}";

pub fn valid_alias(alias: char) -> bool {
    PLAIN_ALIASES.contains(alias) || ESCAPED_ALIASES.contains(alias)
}

/// Outcome of address resolution for one message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Addressed {
    /// The robot was spoken to.
    pub addressed: bool,
    /// Used the `/<name>` form; replies should be hidden.
    pub hidden: bool,
    /// Only the robot's name, nothing else.
    pub bare: bool,
    /// Text with any addressing stripped.
    pub command: String,
}

/// Regexes derived from the robot's name, protocol mention and alias.
/// Rebuilt on every reload.
#[derive(Debug, Clone)]
pub struct AddressMatcher {
    hidden: Option<Regex>,
    pre: Option<Regex>,
    post: Option<Regex>,
    bare: Option<Regex>,
}

impl AddressMatcher {
    pub fn new(name: &str, mention: Option<&str>, alias: Option<char>) -> Result<Self> {
        if let Some(a) = alias
            && !valid_alias(a)
        {
            return Err(Error::InvalidAlias {
                alias: a,
                allowed: ALL_ALIASES,
            });
        }
        let name = name.trim();
        let mention = mention.map(str::trim).filter(|m| !m.is_empty());
        if name.is_empty() && alias.is_none() {
            debug!("robot has no name or alias; only direct messages will be addressed");
            return Ok(Self {
                hidden: None,
                pre: None,
                post: None,
                bare: None,
            });
        }

        let mut names = Vec::new();
        let mut bare_names = Vec::new();
        if let Some(a) = alias {
            let a = regex::escape(&a.to_string());
            names.push(a.clone());
            bare_names.push(a);
        }
        let quoted = regex::escape(name);
        if !name.is_empty() {
            names.push(format!(r"@?{quoted}[:, ]"));
            bare_names.push(format!(r"@?{quoted}\??"));
        }
        if let Some(m) = mention {
            let m = regex::escape(m);
            names.push(format!(r"@{m}[:, ]"));
            bare_names.push(format!(r"@{m}\??"));
        }

        let pre = Regex::new(&format!(r"^(?s)(?i:{})\s*(.*)$", names.join("|")))?;
        let (hidden, post, bare) = if name.is_empty() {
            (None, None, None)
        } else {
            (
                Some(Regex::new(&format!(r"^(?s)/(?i:{quoted})[:,]?\s+(.*)$"))?),
                Some(Regex::new(&format!(r"^(?s)([^,@]+),\s+(?i:@?{quoted})([.?!])?$"))?),
                Some(Regex::new(&format!(r"^(?i:{})$", bare_names.join("|")))?),
            )
        };
        debug!(pre = %pre, "compiled address regexes");
        Ok(Self {
            hidden,
            pre: Some(pre),
            post,
            bare,
        })
    }

    pub fn resolve(&self, text: &str) -> Addressed {
        let text = text.trim();
        if let Some(re) = &self.hidden
            && let Some(caps) = re.captures(text)
        {
            return Addressed {
                addressed: true,
                hidden: true,
                bare: false,
                command: caps[1].trim().to_string(),
            };
        }
        if let Some(re) = &self.pre
            && let Some(caps) = re.captures(text)
        {
            return Addressed {
                addressed: true,
                hidden: false,
                bare: false,
                command: caps[1].trim().to_string(),
            };
        }
        if let Some(re) = &self.post
            && let Some(caps) = re.captures(text)
        {
            let tail = caps.get(2).map_or("", |m| m.as_str());
            return Addressed {
                addressed: true,
                hidden: false,
                bare: false,
                command: format!("{}{tail}", caps[1].trim()),
            };
        }
        if let Some(re) = &self.bare
            && re.is_match(text)
        {
            return Addressed {
                addressed: true,
                hidden: false,
                bare: true,
                command: String::new(),
            };
        }
        Addressed {
            addressed: false,
            hidden: false,
            bare: false,
            command: text.to_string(),
        }
    }
}
