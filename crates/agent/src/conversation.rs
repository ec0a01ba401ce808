//! Deterministic keyword extraction.
//!
//! `RuleBasedLanguageModel` answers every [`TaskKind`] with the same JSON a
//! hosted model is instructed to return, so the node code cannot tell the two
//! apart. It backs `llm.provider = "rule_based"` and the test suites.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{CompletionRequest, LanguageModel, LlmError, TaskKind};

const STREET_SUFFIXES: [&str; 30] = [
    "street", "st", "avenue", "ave", "road", "rd", "drive", "dr", "lane", "ln", "boulevard",
    "blvd", "court", "ct", "way", "circle", "cir", "place", "pl", "parkway", "pkwy", "trail",
    "trl", "terrace", "ter", "highway", "hwy", "loop", "run", "row",
];

const STATES: [(&str, &str); 51] = [
    ("AL", "alabama"), ("AK", "alaska"), ("AZ", "arizona"), ("AR", "arkansas"),
    ("CA", "california"), ("CO", "colorado"), ("CT", "connecticut"), ("DE", "delaware"),
    ("DC", "district of columbia"), ("FL", "florida"), ("GA", "georgia"), ("HI", "hawaii"),
    ("ID", "idaho"), ("IL", "illinois"), ("IN", "indiana"), ("IA", "iowa"), ("KS", "kansas"),
    ("KY", "kentucky"), ("LA", "louisiana"), ("ME", "maine"), ("MD", "maryland"),
    ("MA", "massachusetts"), ("MI", "michigan"), ("MN", "minnesota"), ("MS", "mississippi"),
    ("MO", "missouri"), ("MT", "montana"), ("NE", "nebraska"), ("NV", "nevada"),
    ("NH", "new hampshire"), ("NJ", "new jersey"), ("NM", "new mexico"), ("NY", "new york"),
    ("NC", "north carolina"), ("ND", "north dakota"), ("OH", "ohio"), ("OK", "oklahoma"),
    ("OR", "oregon"), ("PA", "pennsylvania"), ("RI", "rhode island"), ("SC", "south carolina"),
    ("SD", "south dakota"), ("TN", "tennessee"), ("TX", "texas"), ("UT", "utah"),
    ("VT", "vermont"), ("VA", "virginia"), ("WA", "washington"), ("WV", "west virginia"),
    ("WI", "wisconsin"), ("WY", "wyoming"),
];

const NAME_STOPWORDS: [&str; 24] = [
    "a", "an", "the", "calling", "looking", "interested", "just", "here", "wondering", "trying",
    "not", "so", "very", "sure", "fine", "good", "great", "well", "in", "at", "on", "about",
    "hoping", "needing",
];

const CITY_FILLERS: [&str; 8] = ["in", "the", "city", "of", "is", "it's", "its", "and"];

#[derive(Clone, Copy, Debug, Default)]
pub struct RuleBasedLanguageModel;

impl RuleBasedLanguageModel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LanguageModel for RuleBasedLanguageModel {
    fn name(&self) -> &'static str {
        "rule_based"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let utterance = request.utterance.as_str();
        let payload = match request.task {
            TaskKind::ClassifyIntent => json!({ "intent": classify_intent(utterance) }),
            TaskKind::ExtractName => json!({ "name": extract_name(utterance) }),
            TaskKind::ExtractAddress => address_payload(utterance),
            TaskKind::ExtractFrequency => {
                json!({ "frequency": extract_frequency(utterance, &request.options) })
            }
            TaskKind::ClassifyBookingReply => booking_payload(utterance),
            TaskKind::AnswerQuestion => {
                json!({ "answer": answer_from_facts(&request.system, utterance) })
            }
        };
        Ok(payload.to_string())
    }
}

fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric() || matches!(character, ':' | '\'') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}

fn contains_any(normalized_text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| normalized_text.contains(phrase))
}

fn classify_intent(utterance: &str) -> &'static str {
    let normalized_text = normalize_text(utterance);
    let tokens = tokenize(&normalized_text);

    if contains_any(
        &normalized_text,
        &[
            "quote", "estimate", "book", "schedule", "sign up", "signup", "come out",
            "appointment", "set up service", "start service",
        ],
    ) || parse_address(utterance).street.is_some()
    {
        return "booking_intent";
    }

    let first = tokens.first().map(String::as_str).unwrap_or("");
    let opens_question = matches!(
        first,
        "what" | "what's" | "whats" | "when" | "where" | "which" | "who" | "how" | "why" | "do"
            | "does" | "are" | "is" | "can" | "could"
    );
    if normalized_text.contains('?') || opens_question {
        return "general_question";
    }

    // A yes right after a quote was offered.
    if matches!(first, "yes" | "yeah" | "yep" | "sure" | "ok" | "okay" | "absolutely" | "please") {
        return "booking_intent";
    }

    if contains_any(&normalized_text, &["my name is", "this is ", "i'm ", "i am ", "name's"])
        || matches!(first, "hi" | "hello" | "hey" | "howdy" | "good")
    {
        return "introduction";
    }

    "unclear"
}

fn extract_name(utterance: &str) -> Option<String> {
    let tokens = tokenize(&normalize_text(utterance));
    let markers: [&[&str]; 5] =
        [&["my", "name", "is"], &["name's"], &["this", "is"], &["i'm"], &["i", "am"]];

    for marker in markers {
        let found = tokens.windows(marker.len()).position(|window| {
            window.iter().zip(marker.iter()).all(|(token, expected)| token == expected)
        });
        let Some(position) = found else {
            continue;
        };
        let Some(candidate) = tokens.get(position + marker.len()) else {
            continue;
        };
        if candidate.chars().all(|c| c.is_ascii_alphabetic())
            && candidate.len() > 1
            && !NAME_STOPWORDS.contains(&candidate.as_str())
        {
            return Some(capitalize(candidate));
        }
    }
    None
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ParsedAddress {
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
}

struct AddressToken {
    raw: String,
    lower: String,
    comma_after: bool,
}

fn address_tokens(utterance: &str) -> Vec<AddressToken> {
    utterance
        .split_whitespace()
        .map(|piece| {
            let comma_after = piece.ends_with(',');
            let raw = piece.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-');
            AddressToken { raw: raw.to_string(), lower: raw.to_ascii_lowercase(), comma_after }
        })
        .filter(|token| !token.raw.is_empty())
        .collect()
}

fn is_zip(token: &str) -> bool {
    let digits = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
    match token.split_once('-') {
        Some((five, four)) => five.len() == 5 && digits(five) && four.len() == 4 && digits(four),
        None => token.len() == 5 && digits(token),
    }
}

/// Returns the state abbreviation and how many tokens the match used.
fn state_at(tokens: &[AddressToken], index: usize) -> Option<(&'static str, usize)> {
    for (abbreviation, name) in STATES {
        let words: Vec<&str> = name.split(' ').collect();
        let matches = tokens.len() >= index + words.len()
            && words.iter().enumerate().all(|(offset, word)| tokens[index + offset].lower == *word);
        if matches {
            return Some((abbreviation, words.len()));
        }
    }

    let token = &tokens[index];
    let followed_by_zip = tokens.get(index + 1).is_some_and(|next| is_zip(&next.raw));
    let last = index + 1 == tokens.len();
    let uppercase = token.raw.chars().all(|c| c.is_ascii_uppercase());
    if token.raw.len() == 2 && (uppercase || followed_by_zip || last) {
        let upper = token.raw.to_ascii_uppercase();
        return STATES
            .iter()
            .find(|(abbreviation, _)| *abbreviation == upper)
            .map(|(abbreviation, _)| (*abbreviation, 1));
    }
    None
}

fn parse_address(utterance: &str) -> ParsedAddress {
    let tokens = address_tokens(utterance);
    let mut parsed = ParsedAddress::default();

    let house = tokens.iter().enumerate().position(|(index, token)| {
        token.raw.len() <= 6
            && token.raw.chars().all(|c| c.is_ascii_digit())
            && !is_zip(&token.raw)
            && tokens
                .get(index + 1)
                .is_some_and(|next| next.raw.chars().any(|c| c.is_ascii_alphabetic()))
    });

    // Index of the first token after the street.
    let mut cursor = 0;
    if let Some(start) = house {
        let mut end = start + 1;
        while end < tokens.len() && end - start < 6 {
            let token = &tokens[end];
            let bare_state = token.raw.len() == 2 && state_at(&tokens, end).is_some();
            if is_zip(&token.raw) || (end > start + 1 && bare_state) {
                break;
            }
            end += 1;
            if STREET_SUFFIXES.contains(&token.lower.as_str()) || token.comma_after {
                break;
            }
        }
        let street: Vec<&str> = tokens[start..end].iter().map(|token| token.raw.as_str()).collect();
        if street.len() > 1 {
            parsed.street = Some(street.join(" "));
            cursor = end;
        }
    }

    let zip_index = tokens.iter().rposition(|token| is_zip(&token.raw));
    parsed.zip = zip_index.map(|index| tokens[index].raw.clone());

    let search_end = zip_index.unwrap_or(tokens.len());
    let mut state_index = None;
    let mut index = cursor;
    while index < search_end {
        match state_at(&tokens, index) {
            Some((abbreviation, used)) => {
                parsed.state = Some(abbreviation.to_string());
                state_index = Some(index);
                index += used;
            }
            None => index += 1,
        }
    }

    let city_end = state_index.or(zip_index);
    if let Some(city_end) = city_end {
        let city_start = if parsed.street.is_some() {
            cursor
        } else {
            let mut start = city_end;
            while start > 0 && city_end - start < 3 {
                let previous = &tokens[start - 1];
                if !previous.raw.chars().all(|c| c.is_ascii_alphabetic())
                    || CITY_FILLERS.contains(&previous.lower.as_str())
                {
                    break;
                }
                start -= 1;
                if start > 0 && tokens[start - 1].comma_after {
                    break;
                }
            }
            start
        };
        let city: Vec<String> = tokens[city_start.min(city_end)..city_end]
            .iter()
            .filter(|token| !CITY_FILLERS.contains(&token.lower.as_str()))
            .map(|token| capitalize(&token.lower))
            .collect();
        if !city.is_empty() {
            parsed.city = Some(city.join(" "));
        }
    }

    parsed
}

fn address_payload(utterance: &str) -> Value {
    let parsed = parse_address(utterance);
    json!({
        "name": extract_name(utterance),
        "street": parsed.street,
        "city": parsed.city,
        "state": parsed.state,
        "zip": parsed.zip,
    })
}

fn extract_frequency(utterance: &str, options: &[String]) -> Option<String> {
    let normalized_text = normalize_text(utterance);
    let candidates: [(&str, &[&str]); 4] = [
        (
            "biweekly",
            &[
                "biweekly", "bi-weekly", "bi weekly", "every other week", "every two weeks",
                "every 2 weeks", "twice a month", "fortnight",
            ],
        ),
        ("weekly", &["weekly", "every week", "once a week", "each week"]),
        ("monthly", &["monthly", "once a month", "every month", "each month"]),
        ("one_time", &["one time", "one-time", "onetime", "just once", "once", "single"]),
    ];

    candidates
        .iter()
        .find(|(_, phrases)| contains_any(&normalized_text, phrases))
        .map(|(frequency, _)| frequency.to_string())
        .filter(|frequency| options.is_empty() || options.iter().any(|option| option == frequency))
}

fn booking_payload(utterance: &str) -> Value {
    let normalized_text = normalize_text(utterance);
    let tokens = tokenize(&normalized_text);
    let first = tokens.first().map(String::as_str).unwrap_or("");

    let part_of_day = ["morning", "afternoon", "evening"]
        .into_iter()
        .find(|part| tokens.iter().any(|token| token == part));
    let weekday = ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"]
        .into_iter()
        .find(|day| tokens.iter().any(|token| token == day));
    let hour = extract_hour(&tokens);
    let option_number = extract_option_number(&tokens);
    let has_preference =
        part_of_day.is_some() || weekday.is_some() || hour.is_some() || option_number.is_some();

    let wants_options = contains_any(
        &normalized_text,
        &["what times", "what time", "availability", "available", "what do you have", "what days", "openings", "options"],
    );

    let declined = matches!(first, "no" | "nope" | "nah")
        || contains_any(
            &normalized_text,
            &[
                "not now", "no thanks", "no thank you", "maybe later", "not interested",
                "none of those", "don't book", "do not book", "not right now", "i'll pass",
                "think about it",
            ],
        );
    let accepted = matches!(
        first,
        "yes" | "yeah" | "yep" | "yup" | "sure" | "ok" | "okay" | "absolutely" | "definitely" | "please"
    ) || contains_any(
        &normalized_text,
        &["book", "schedule", "sounds good", "go ahead", "let's do", "lets do", "that works", "works for me", "sign me up"],
    ) || has_preference
        || wants_options;

    let decision = if declined {
        "decline"
    } else if accepted {
        "accept"
    } else {
        "unclear"
    };

    json!({
        "decision": decision,
        "time_preference": {
            "part_of_day": part_of_day,
            "weekday": weekday,
            "hour": hour,
            "option_number": option_number,
        },
        "wants_options": wants_options && !has_preference,
    })
}

fn extract_hour(tokens: &[String]) -> Option<u32> {
    for (index, token) in tokens.iter().enumerate() {
        let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
        let Ok(hour) = digits.parse::<u32>() else {
            continue;
        };
        if !(1..=12).contains(&hour) {
            continue;
        }

        let suffix = &token[digits.len()..];
        let suffix = suffix
            .split_once(':')
            .map(|(_, rest)| rest.trim_start_matches(|c: char| c.is_ascii_digit()))
            .unwrap_or(suffix);
        let next = tokens.get(index + 1).map(String::as_str).unwrap_or("");
        let meridiem = match (suffix, next) {
            ("am", _) | (_, "am") => Some(false),
            ("pm", _) | (_, "pm") => Some(true),
            _ => None,
        };
        let anchored =
            (index > 0 && tokens[index - 1] == "at") || next == "o'clock" || token.contains(':');

        match meridiem {
            Some(true) if hour < 12 => return Some(hour + 12),
            Some(false) if hour == 12 => return Some(0),
            Some(_) => return Some(hour),
            None if anchored => return Some(if hour <= 6 { hour + 12 } else { hour }),
            None => {}
        }
    }
    None
}

fn extract_option_number(tokens: &[String]) -> Option<usize> {
    for (index, token) in tokens.iter().enumerate() {
        let ordinal = match token.as_str() {
            "first" | "1st" => Some(1),
            "second" | "2nd" => Some(2),
            "third" | "3rd" => Some(3),
            "fourth" | "4th" => Some(4),
            "fifth" | "5th" => Some(5),
            _ => None,
        };
        if ordinal.is_some() {
            return ordinal;
        }
        if matches!(token.as_str(), "option" | "number") {
            if let Some(number) = tokens.get(index + 1).and_then(|next| next.parse().ok()) {
                return Some(number);
            }
        }
    }
    None
}

fn fact<'a>(system: &'a str, label: &str) -> Option<&'a str> {
    system.lines().find_map(|line| line.strip_prefix(label)).map(str::trim)
}

fn answer_from_facts(system: &str, utterance: &str) -> String {
    let normalized_text = normalize_text(utterance);
    let topics: [(&[&str], &str, &str, &str); 5] = [
        (&["area", "where", "serve", "near", "come to", "located"], "Service area:", "We serve ", "."),
        (&["hour", "open", "close", "weekend", "saturday", "sunday"], "Hours:", "We're open ", "."),
        (
            &["price", "cost", "much", "charge", "rate", "expensive"],
            "Prices:",
            "Our prices run ",
            ", depending on lot size and how often we come out.",
        ),
        (&["often", "frequenc", "weekly", "monthly"], "Frequencies:", "We can come out ", "."),
        (&["service", "offer", "do you do", "mow", "provide"], "Services:", "We offer ", "."),
    ];

    for (keywords, label, lead, tail) in topics {
        if contains_any(&normalized_text, keywords) {
            if let Some(value) = fact(system, label) {
                return format!("{lead}{value}{tail}");
            }
        }
    }

    match (fact(system, "Business:"), fact(system, "Services:")) {
        (Some(business), Some(services)) => format!("This is {business}. We offer {services}."),
        _ => String::new(),
    }
}

fn capitalize(word: &str) -> String {
    let mut characters = word.chars();
    match characters.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + characters.as_str(),
        None => String::new(),
    }
}
