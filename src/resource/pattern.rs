//! VISA resource filter patterns
//!
//! `?` matches any single character, `*` repeats the preceding element zero
//! or more times, `+` one or more times, `[...]` is a character class and `\`
//! escapes the next character. `?*` therefore matches every resource.

use regex::{Regex, RegexBuilder};

use crate::common::{Error, Result};

/// A compiled resource filter
#[derive(Debug, Clone)]
pub struct ResourcePattern {
    source: String,
    regex: Regex,
}

impl ResourcePattern {
    /// Compile a VISA-style pattern
    pub fn new(pattern: &str) -> Result<Self> {
        let translated = translate(pattern)?;
        let regex = RegexBuilder::new(&format!("^(?:{})$", translated))
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::invalid_pattern(pattern, e))?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Whether the pattern matches the whole address
    pub fn matches(&self, address: &str) -> bool {
        self.regex.is_match(address)
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn translate(pattern: &str) -> Result<String> {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars();
    let mut in_class = false;

    while let Some(c) = chars.next() {
        if in_class {
            match c {
                ']' => {
                    in_class = false;
                    out.push(']');
                }
                '\\' => {
                    let escaped = chars
                        .next()
                        .ok_or_else(|| Error::invalid_pattern(pattern, "dangling escape"))?;
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
                '[' => out.push_str("\\["),
                _ => out.push(c),
            }
            continue;
        }

        match c {
            '?' => out.push('.'),
            '*' | '+' => out.push(c),
            '[' => {
                in_class = true;
                out.push('[');
            }
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| Error::invalid_pattern(pattern, "dangling escape"))?;
                out.push_str(&regex::escape(&escaped.to_string()));
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    if in_class {
        return Err(Error::invalid_pattern(pattern, "unterminated character class"));
    }

    Ok(out)
}
