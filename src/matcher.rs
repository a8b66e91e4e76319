//! Template grammar: compiles a date template into an anchored capturing regex
//! and its inverse formatter.
//!
//! | token | renders |
//! |---|---|
//! | `%Y` | 4-digit year |
//! | `%m`, `%d` | 2-digit month, day |
//! | `%H`, `%k` | 2-digit hour |
//! | `%-m`, `%-d`, `%-k` | unpadded month, day, hour |
//! | `%s` | Unix epoch seconds, at least 10 digits, signed before 1970 (hour grain) |
//! | `%Y-s`, `%m-s`, `%d-s`, `%H-s` | epoch seconds at year, month, day, hour grain |
//! | `*` | glob capture, one path segment or more |
//!
//! Everything else is literal.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{PartakeError, Result};
use crate::time::{localize, Grain, Instant};

lazy_static! {
    static ref TOKEN: Regex =
        Regex::new(r"%(?:Y-s|m-s|d-s|H-s|-m|-d|-k|Y|m|d|H|k|s)|\*").unwrap();
}

// ------------- Token -------------
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Year,
    Month { padded: bool },
    Day { padded: bool },
    Hour { padded: bool },
    Epoch(Grain),
    Glob,
}

impl Token {
    fn grain(&self) -> Option<Grain> {
        match self {
            Token::Year => Some(Grain::Year),
            Token::Month { .. } => Some(Grain::Month),
            Token::Day { .. } => Some(Grain::Day),
            Token::Hour { .. } => Some(Grain::Hour),
            Token::Epoch(grain) => Some(*grain),
            Token::Literal(_) | Token::Glob => None,
        }
    }
    fn pattern(&self, group: usize) -> String {
        let body = match self {
            Token::Literal(text) => return regex::escape(text),
            Token::Year => r"\d{4}",
            Token::Month { padded: true }
            | Token::Day { padded: true }
            | Token::Hour { padded: true } => r"\d{2}",
            Token::Month { padded: false }
            | Token::Day { padded: false }
            | Token::Hour { padded: false } => r"[1-9]?\d",
            // ten digits, more only past 2286, a sign before 1970
            Token::Epoch(_) => r"-?(?:\d{10}|[1-9]\d{10,})",
            Token::Glob => r".+?",
        };
        format!("(?P<t{group}>{body})")
    }
}

fn tokenize(template: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for found in TOKEN.find_iter(template) {
        if found.start() > last {
            tokens.push(Token::Literal(template[last..found.start()].to_string()));
        }
        tokens.push(match found.as_str() {
            "%Y" => Token::Year,
            "%m" => Token::Month { padded: true },
            "%-m" => Token::Month { padded: false },
            "%d" => Token::Day { padded: true },
            "%-d" => Token::Day { padded: false },
            "%H" | "%k" => Token::Hour { padded: true },
            "%-k" => Token::Hour { padded: false },
            "%Y-s" => Token::Epoch(Grain::Year),
            "%m-s" => Token::Epoch(Grain::Month),
            "%d-s" => Token::Epoch(Grain::Day),
            "%H-s" | "%s" => Token::Epoch(Grain::Hour),
            _ => Token::Glob,
        });
        last = found.end();
    }
    if last < template.len() {
        tokens.push(Token::Literal(template[last..].to_string()));
    }
    tokens
}

fn finest(tokens: &[Token]) -> Option<Grain> {
    tokens.iter().filter_map(Token::grain).min()
}

/// The finest grain named by any token of `template`, if any.
pub fn infer_grain(template: &str) -> Option<Grain> {
    finest(&tokenize(template))
}

/// Cuts `template` after the shortest `/`-separated prefix whose grain is
/// exactly `grain`.
pub fn truncate_to_grain(template: &str, grain: Grain) -> Option<String> {
    let segments: Vec<&str> = template.split('/').collect();
    (1..=segments.len())
        .map(|n| segments[..n].join("/"))
        .find(|prefix| infer_grain(prefix) == Some(grain))
}

// ------------- Binding -------------
/// What an identifier exposes once matched against a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub instant: Instant,
    /// Glob captures in template order; empty when every glob is still `*`.
    pub globs: Vec<String>,
}

// ------------- Matcher -------------
#[derive(Debug, Clone)]
pub struct Matcher {
    template: String,
    timezone: FixedOffset,
    tokens: Vec<Token>,
    regex: Regex,
}

impl Matcher {
    pub fn new(template: &str, timezone: FixedOffset) -> Result<Self> {
        let tokens = tokenize(template);
        let mut pattern = String::from("^");
        let mut group = 0;
        for token in &tokens {
            if !matches!(token, Token::Literal(_)) {
                group += 1;
            }
            pattern += &token.pattern(group);
        }
        pattern.push('$');
        let regex = Regex::new(&pattern).map_err(|e| PartakeError::Template {
            template: template.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            template: template.to_string(),
            timezone,
            tokens,
            regex,
        })
    }
    pub fn template(&self) -> &str {
        &self.template
    }
    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
    pub fn grain(&self) -> Option<Grain> {
        finest(&self.tokens)
    }
    pub fn has_glob(&self) -> bool {
        self.tokens.contains(&Token::Glob)
    }
    /// Renders `instant` through the template. Globs take the supplied
    /// captures in order and stay `*` once those run out.
    pub fn bind(&self, instant: Instant, globs: &[String]) -> String {
        let local = instant.with_timezone(&self.timezone);
        let mut globs = globs.iter();
        let mut rendered = String::with_capacity(self.template.len() + 8);
        for token in &self.tokens {
            match token {
                Token::Literal(text) => rendered += text,
                Token::Year => rendered += &format!("{:04}", local.year()),
                Token::Month { padded: true } => rendered += &format!("{:02}", local.month()),
                Token::Month { padded: false } => rendered += &local.month().to_string(),
                Token::Day { padded: true } => rendered += &format!("{:02}", local.day()),
                Token::Day { padded: false } => rendered += &local.day().to_string(),
                Token::Hour { padded: true } => rendered += &format!("{:02}", local.hour()),
                Token::Hour { padded: false } => rendered += &local.hour().to_string(),
                Token::Epoch(_) => {
                    let seconds = local.timestamp();
                    if seconds < 0 {
                        rendered.push('-');
                    }
                    rendered += &format!("{:010}", seconds.unsigned_abs());
                }
                Token::Glob => rendered += globs.next().map(String::as_str).unwrap_or("*"),
            }
        }
        rendered
    }
    /// Extracts the instant and glob captures from a concrete identifier.
    /// Repeated fields must agree and the calendar fields must form a real
    /// date, otherwise there is no binding.
    pub fn unbind(&self, identifier: &str) -> Option<Binding> {
        let captures = self.regex.captures(identifier)?;
        let (mut year, mut month, mut day, mut hour, mut epoch) = (None, None, None, None, None);
        let mut globs = Vec::new();
        let fields = self
            .tokens
            .iter()
            .filter(|t| !matches!(t, Token::Literal(_)));
        for (token, capture) in fields.zip(captures.iter().skip(1)) {
            let text = capture?.as_str();
            let agreed = match token {
                Token::Year => agree(&mut year, text.parse().ok()?),
                Token::Month { .. } => agree(&mut month, text.parse().ok()?),
                Token::Day { .. } => agree(&mut day, text.parse().ok()?),
                Token::Hour { .. } => agree(&mut hour, text.parse().ok()?),
                Token::Epoch(_) => agree(&mut epoch, text.parse::<i64>().ok()?),
                Token::Glob => {
                    globs.push(text.to_string());
                    true
                }
                Token::Literal(_) => true,
            };
            if !agreed {
                return None;
            }
        }
        let instant = match epoch {
            Some(seconds) => DateTime::from_timestamp(seconds, 0)?.with_timezone(&self.timezone),
            None => {
                let date = NaiveDate::from_ymd_opt(
                    year.unwrap_or(1970),
                    month.unwrap_or(1),
                    day.unwrap_or(1),
                )?;
                localize(self.timezone, date.and_hms_opt(hour.unwrap_or(0), 0, 0)?)
            }
        };
        if globs.iter().all(|g| g == "*") {
            globs.clear();
        }
        Some(Binding { instant, globs })
    }
    pub fn matches(&self, identifier: &str) -> bool {
        self.unbind(identifier).is_some()
    }
    /// Like [`Matcher::unbind`] for callers that cannot continue without a binding.
    pub fn require(&self, identifier: &str) -> Result<Binding> {
        self.unbind(identifier)
            .ok_or_else(|| PartakeError::UnboundInput {
                identifier: identifier.to_string(),
                template: self.template.clone(),
            })
    }
    /// Re-renders an identifier of this template through `other`, using only
    /// the fields the identifier exposes.
    pub fn translate(&self, identifier: &str, other: &Matcher) -> Option<String> {
        self.unbind(identifier)
            .map(|binding| other.bind(binding.instant, &binding.globs))
    }
}

fn agree<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    match slot {
        Some(existing) => *existing == value,
        None => {
            *slot = Some(value);
            true
        }
    }
}
