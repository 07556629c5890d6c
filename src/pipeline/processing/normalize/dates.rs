//! Date-hint parsing for listing pages.
//!
//! Hints arrive in whatever shape a site prints them: `14 Dec`, `Dec 14`,
//! `14/12/2026`, `14 Δεκεμβρίου`, `25 - 04 Oct - Nov`, often without a year.
//! Parsing resolves them to concrete timestamps using a [`DateContext`].

use super::text::fold;
use crate::constants::{MAX_YEARS_AHEAD, MIN_PLAUSIBLE_YEAR};
use chrono::{
    DateTime, Datelike, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use once_cell::sync::Lazy;
use regex::Regex;

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})\s*(am|pm|a\.m\.|p\.m\.)?").unwrap());
static ISO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})").unwrap());
static DAY_RANGE_NUMERIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})\s*[-–—]\s*(\d{1,2})[/.](\d{1,2})(?:[/.](\d{4}|\d{2}))?\b").unwrap()
});
static NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/.](\d{1,2})(?:[/.](\d{4}|\d{2}))?\b").unwrap());
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+|\p{L}+|[-–—]").unwrap());
static URL_YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\D)(20\d{2})(?:\D|$)").unwrap());

const ENGLISH_MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

// accent-folded nominative and genitive forms
const GREEK_MONTHS: [[&str; 2]; 12] = [
    ["ιανουαριοσ", "ιανουαριου"],
    ["φεβρουαριοσ", "φεβρουαριου"],
    ["μαρτιοσ", "μαρτιου"],
    ["απριλιοσ", "απριλιου"],
    ["μαιοσ", "μαιου"],
    ["ιουνιοσ", "ιουνιου"],
    ["ιουλιοσ", "ιουλιου"],
    ["αυγουστοσ", "αυγουστου"],
    ["σεπτεμβριοσ", "σεπτεμβριου"],
    ["οκτωβριοσ", "οκτωβριου"],
    ["νοεμβριοσ", "νοεμβριου"],
    ["δεκεμβριοσ", "δεκεμβριου"],
];

const RANGE_WORDS: &[&str] = &["to", "until", "till", "through", "εωσ", "μεχρι"];

/// Month number for an English or Greek month word (full or abbreviated).
pub fn month_from_token(token: &str) -> Option<u32> {
    let token = fold(token);
    let token = token.trim_end_matches('.');
    if token.chars().count() < 3 {
        return None;
    }
    if let Some(i) = ENGLISH_MONTHS.iter().position(|m| m.starts_with(token)) {
        return Some(i as u32 + 1);
    }
    GREEK_MONTHS
        .iter()
        .position(|forms| forms.iter().any(|f| f.starts_with(token)))
        .map(|i| i as u32 + 1)
}

/// Everything date inference may lean on besides the hint itself.
#[derive(Debug, Clone)]
pub struct DateContext {
    pub now: DateTime<Utc>,
    /// Year embedded in the source URL
    pub url_year: Option<i32>,
    /// Year scraped from the surrounding page
    pub page_year: Option<i32>,
    /// Offset of wall-clock times printed by the source
    pub offset: FixedOffset,
}

impl DateContext {
    pub fn new(now: DateTime<Utc>, source_url: &str, page_year: Option<i32>, offset: FixedOffset) -> Self {
        let mut ctx = Self { now, url_year: None, page_year: None, offset };
        ctx.url_year = year_in_url(source_url).filter(|y| ctx.is_plausible(*y));
        ctx.page_year = page_year.filter(|y| ctx.is_plausible(*y));
        ctx
    }

    fn today(&self) -> NaiveDate {
        self.now.with_timezone(&self.offset).date_naive()
    }

    fn current_year(&self) -> i32 {
        self.today().year()
    }

    pub fn is_plausible(&self, year: i32) -> bool {
        (MIN_PLAUSIBLE_YEAR..=self.current_year() + MAX_YEARS_AHEAD).contains(&year)
    }

    fn context_year(&self) -> Option<i32> {
        self.url_year.or(self.page_year)
    }

    /// Resolve day/month to a date, inferring the year when the hint lacks one.
    fn resolve(&self, day: u32, month: u32, explicit_year: Option<i32>) -> Option<NaiveDate> {
        let year = match explicit_year.or_else(|| self.context_year()) {
            Some(year) => year,
            None => return self.infer_upcoming(day, month),
        };
        let year = if self.is_plausible(year) {
            year
        } else {
            self.context_year().unwrap_or_else(|| self.current_year())
        };
        NaiveDate::from_ymd_opt(year, month, day)
    }

    /// Current year, unless that lands more than six months back.
    fn infer_upcoming(&self, day: u32, month: u32) -> Option<NaiveDate> {
        let today = self.today();
        let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
        let cutoff = today.checked_sub_months(Months::new(6)).unwrap_or(today);
        match this_year {
            Some(date) if date >= cutoff => Some(date),
            _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day),
        }
    }

    fn to_utc(&self, date: NaiveDate, time: Option<NaiveTime>, end_of_day: bool) -> DateTime<Utc> {
        let time = time.unwrap_or_else(|| {
            if end_of_day {
                NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN)
            } else {
                NaiveTime::MIN
            }
        });
        let local = NaiveDateTime::new(date, time);
        match self.offset.from_local_datetime(&local).single() {
            Some(dt) => dt.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&local),
        }
    }
}

/// First plausible-looking 20xx year in a URL.
pub fn year_in_url(url: &str) -> Option<i32> {
    URL_YEAR_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDates {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

/// Parse a free-form hint: range forms first, then a single date.
pub fn parse_date_hint(hint: &str, ctx: &DateContext) -> Option<ParsedDates> {
    let folded = fold(hint);
    let (times, rest) = extract_times(&folded);
    parse_date_range(&rest, &times, ctx).or_else(|| parse_single_date(&rest, &times, ctx))
}

fn extract_times(input: &str) -> (Vec<NaiveTime>, String) {
    let mut times = Vec::new();
    for caps in TIME_RE.captures_iter(input) {
        let mut hour: u32 = caps[1].parse().unwrap_or(0);
        let minute: u32 = caps[2].parse().unwrap_or(0);
        match caps.get(3).map(|m| m.as_str().starts_with('p')) {
            Some(true) if hour < 12 => hour += 12,
            Some(false) if hour == 12 => hour = 0,
            _ => {}
        }
        if let Some(t) = NaiveTime::from_hms_opt(hour, minute, 0) {
            times.push(t);
        }
    }
    (times, TIME_RE.replace_all(input, " ").into_owned())
}

fn two_digit_year(raw: Option<&str>) -> Option<i32> {
    let raw = raw?;
    let year: i32 = raw.parse().ok()?;
    Some(if raw.len() == 2 { 2000 + year } else { year })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Day(u32),
    Year(i32),
    Month(u32),
    Sep,
}

fn tokenize(input: &str) -> Vec<Token> {
    TOKEN_RE
        .find_iter(input)
        .filter_map(|m| {
            let s = m.as_str();
            if s.chars().all(|c| c.is_ascii_digit()) {
                let n: u32 = s.parse().ok()?;
                match s.len() {
                    1 | 2 if (1..=31).contains(&n) => Some(Token::Day(n)),
                    4 if (1900..=2100).contains(&n) => Some(Token::Year(n as i32)),
                    _ => None,
                }
            } else if matches!(s, "-" | "–" | "—") || RANGE_WORDS.contains(&s) {
                Some(Token::Sep)
            } else {
                month_from_token(s).map(Token::Month)
            }
        })
        .collect()
}

fn parse_date_range(input: &str, times: &[NaiveTime], ctx: &DateContext) -> Option<ParsedDates> {
    let isos: Vec<_> = ISO_RE.captures_iter(input).collect();
    if isos.len() >= 2 {
        let start = NaiveDate::from_ymd_opt(
            isos[0][1].parse().ok()?,
            isos[0][2].parse().ok()?,
            isos[0][3].parse().ok()?,
        )?;
        let end = NaiveDate::from_ymd_opt(
            isos[1][1].parse().ok()?,
            isos[1][2].parse().ok()?,
            isos[1][3].parse().ok()?,
        )?;
        return Some(build_range(start, end, times, ctx));
    }
    if !isos.is_empty() {
        return None;
    }

    // "12 - 03/01" inside "28/12 - 03/01" is two full dates, not a day range
    let day_range = DAY_RANGE_NUMERIC_RE.captures(input).filter(|caps| {
        let before = &input[..caps.get(0).map_or(0, |m| m.start())];
        !before.ends_with(|c: char| c == '/' || c == '.')
    });
    if let Some(caps) = day_range {
        let month: u32 = caps[3].parse().ok()?;
        let year = two_digit_year(caps.get(4).map(|m| m.as_str()));
        let start = ctx.resolve(caps[1].parse().ok()?, month, year)?;
        let end = resolve_end(ctx, caps[2].parse().ok()?, month, year, start)?;
        return Some(build_range(start, end, times, ctx));
    }

    let numerics: Vec<_> = NUMERIC_RE.captures_iter(input).collect();
    if numerics.len() >= 2 {
        let (a, b) = (&numerics[0], &numerics[1]);
        let (start_day, start_month): (u32, u32) = (a[1].parse().ok()?, a[2].parse().ok()?);
        let (end_day, end_month): (u32, u32) = (b[1].parse().ok()?, b[2].parse().ok()?);
        let end_year = two_digit_year(b.get(3).map(|m| m.as_str()));
        let start_year = two_digit_year(a.get(3).map(|m| m.as_str())).or_else(|| {
            end_year.map(|y| year_before_end((start_month, start_day), (end_month, end_day), y))
        });
        let start = ctx.resolve(start_day, start_month, start_year)?;
        let end = resolve_end(ctx, end_day, end_month, end_year.or(start_year), start)?;
        return Some(build_range(start, end, times, ctx));
    }
    if !numerics.is_empty() {
        return None;
    }

    let tokens = tokenize(input);
    if !tokens.contains(&Token::Sep) {
        return None;
    }
    let days: Vec<u32> = tokens.iter().filter_map(day_of).collect();
    let months: Vec<u32> = tokens.iter().filter_map(month_of).collect();
    if days.len() < 2 || months.is_empty() {
        return None;
    }
    let sep = tokens.iter().position(|t| *t == Token::Sep).unwrap_or(tokens.len());
    let start_years: Vec<i32> = tokens[..sep].iter().filter_map(year_of).collect();
    let end_years: Vec<i32> = tokens[sep..].iter().filter_map(year_of).collect();

    let start_month = months[0];
    let end_month = months.get(1).copied().unwrap_or(start_month);
    let end_year = end_years.first().copied();
    // "28 Dec - 3 Jan 2027": the only year belongs to the end
    let start_year = start_years.first().copied().or_else(|| {
        end_year.map(|y| year_before_end((start_month, days[0]), (end_month, days[1]), y))
    });
    let start = ctx.resolve(days[0], start_month, start_year)?;
    let end = resolve_end(ctx, days[1], end_month, end_year.or(start_year), start)?;
    Some(build_range(start, end, times, ctx))
}

fn day_of(token: &Token) -> Option<u32> {
    match token {
        Token::Day(d) => Some(*d),
        _ => None,
    }
}

fn month_of(token: &Token) -> Option<u32> {
    match token {
        Token::Month(m) => Some(*m),
        _ => None,
    }
}

fn year_of(token: &Token) -> Option<i32> {
    match token {
        Token::Year(y) => Some(*y),
        _ => None,
    }
}

/// Start year when only the end carries one: the same year, or the year
/// before when the start's month/day falls after the end's.
fn year_before_end(start: (u32, u32), end: (u32, u32), end_year: i32) -> i32 {
    if start > end {
        end_year - 1
    } else {
        end_year
    }
}

/// End date in the start's year unless stated; rolls over when it would precede the start.
fn resolve_end(
    ctx: &DateContext,
    day: u32,
    month: u32,
    year: Option<i32>,
    start: NaiveDate,
) -> Option<NaiveDate> {
    if let Some(year) = year.filter(|y| ctx.is_plausible(*y)) {
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    let same_year = NaiveDate::from_ymd_opt(start.year(), month, day)?;
    if same_year < start {
        NaiveDate::from_ymd_opt(start.year() + 1, month, day)
    } else {
        Some(same_year)
    }
}

fn build_range(start: NaiveDate, end: NaiveDate, times: &[NaiveTime], ctx: &DateContext) -> ParsedDates {
    let start_at = ctx.to_utc(start, times.first().copied(), false);
    let end_at = ctx.to_utc(end, times.get(1).copied(), times.get(1).is_none());
    ParsedDates {
        start: start_at,
        end: (end_at > start_at).then_some(end_at),
    }
}

fn parse_single_date(input: &str, times: &[NaiveTime], ctx: &DateContext) -> Option<ParsedDates> {
    let date = if let Some(caps) = ISO_RE.captures(input) {
        let year: i32 = caps[1].parse().ok()?;
        ctx.resolve(caps[3].parse().ok()?, caps[2].parse().ok()?, Some(year))?
    } else if let Some(caps) = NUMERIC_RE.captures(input) {
        let year = two_digit_year(caps.get(3).map(|m| m.as_str()));
        ctx.resolve(caps[1].parse().ok()?, caps[2].parse().ok()?, year)?
    } else {
        let tokens = tokenize(input);
        let first_segment: Vec<&Token> = tokens.iter().take_while(|t| **t != Token::Sep).collect();
        let day = first_segment.iter().find_map(|t| day_of(t))?;
        let month = first_segment.iter().find_map(|t| month_of(t))?;
        let year = tokens.iter().find_map(year_of);
        ctx.resolve(day, month, year)?
    };

    let start = ctx.to_utc(date, times.first().copied(), false);
    let end = times
        .get(1)
        .map(|t| ctx.to_utc(date, Some(*t), false))
        .filter(|end| *end > start);
    Some(ParsedDates { start, end })
}
