use regex::{Regex, RegexBuilder};
use serenity::model::id::UserId;

/// How a message addressed the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation<'a> {
    /// Prefix (or mention) followed by a command line.
    Command(&'a str),
    /// The bot was mentioned and nothing else.
    BareMention,
}

/// Matches `content` against the guild prefixes, then against a mention.
///
/// Prefixes are tried shortest first and case-insensitively; any whitespace
/// after the prefix is skipped. `prefixes` must already hold the defaults when
/// the guild has none of its own.
pub fn resolve_prefix<'a>(content: &'a str, prefixes: &[String], bot_id: UserId) -> Option<Invocation<'a>> {
    let mut ordered: Vec<&String> = prefixes.iter().filter(|p| !p.is_empty()).collect();
    ordered.sort_by_key(|p| p.len());

    for prefix in ordered {
        let pattern = format!(r"^{}\s*", regex::escape(prefix));
        let Ok(re) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
            continue;
        };
        if let Some(found) = re.find(content) {
            return Some(Invocation::Command(&content[found.end()..]));
        }
    }

    let mention = Regex::new(&format!(r"^<@!?{}>\s*", bot_id)).ok()?;
    let found = mention.find(content)?;
    let rest = &content[found.end()..];
    if rest.is_empty() {
        Some(Invocation::BareMention)
    } else {
        Some(Invocation::Command(rest))
    }
}

/// Splits a command line into its lowercased name and the trimmed arguments.
pub fn split_command(line: &str) -> Option<(String, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((name, args)) => Some((name.to_lowercase(), args.trim())),
        None => Some((line.to_lowercase(), "")),
    }
}
