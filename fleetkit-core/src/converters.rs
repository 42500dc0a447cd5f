//! String, currency and date helpers shared by the services.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::DateTime;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::metadata::Metadata;
use crate::structured_error::{StructuredError, ERROR_DOMAIN};

const ERROR_SUB_DOMAIN: &str = "converters";

pub const ERROR_UNKNOWN_CURRENCY: &str = "unknown_currency";
pub const ERROR_CANNOT_CONVERT_DATE: &str = "cannot_convert_date";

fn first_cap() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("([A-Z])([A-Z][a-z])").expect("valid regex"))
}

fn all_cap() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("([a-z0-9])([A-Z])").expect("valid regex"))
}

fn special_characters() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[^0-9a-zA-Z]+").expect("valid regex"))
}

fn phone_noise() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^+\d]").expect("valid regex"))
}

/// Removes accents: `"Tëst Çôdé"` becomes `"Test Code"`.
pub fn normalise_string(input: &str) -> String {
    input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .nfc()
        .collect()
}

/// Converts `CamelCase`, `HTTPServer` or `kebab-case` to `snake_case`.
pub fn to_snake_case(input: &str) -> String {
    let output = first_cap().replace_all(input, "${1}_${2}");
    let output = all_cap().replace_all(&output, "${1}_${2}");
    output.replace('-', "_").to_lowercase()
}

/// Drops every character that is not an ASCII letter or digit, after
/// removing accents.
pub fn clean_special_characters(input: &str) -> String {
    special_characters()
        .replace_all(&normalise_string(input), "")
        .into_owned()
}

/// Keeps only digits and `+`.
pub fn clean_phone_number(phone_number: &str) -> String {
    phone_noise().replace_all(phone_number, "").into_owned()
}

/// Currencies the formatter knows about (ISO 4217).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Currency {
    Eur,
    Usd,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
        }
    }

    /// Renders an amount that was already localised.
    fn decorate(&self, amount: &str) -> String {
        match self {
            Currency::Eur => format!("{amount} €"),
            Currency::Usd => format!("${amount}"),
        }
    }
}

impl FromStr for Currency {
    type Err = StructuredError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            other => {
                let meta = Metadata::from_iter([("currency", other)]);
                Err(StructuredError::new(
                    500,
                    ERROR_DOMAIN,
                    ERROR_SUB_DOMAIN,
                    ERROR_UNKNOWN_CURRENCY,
                    Some(meta),
                ))
            }
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Languages with dedicated number and date formatting (ISO 639-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    English,
    French,
    Dutch,
}

impl Language {
    /// Resolves a language code case-insensitively. Unknown or empty codes
    /// fall back to English.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "fr" => Language::French,
            "nl" => Language::Dutch,
            _ => Language::English,
        }
    }

    fn decimal_separator(&self) -> char {
        match self {
            Language::English => '.',
            Language::French | Language::Dutch => ',',
        }
    }

    fn group_separator(&self) -> char {
        match self {
            Language::English => ',',
            Language::French => '\u{202f}',
            Language::Dutch => '.',
        }
    }

    fn date_format(&self) -> &'static str {
        match self {
            Language::English | Language::French => "%d/%m/%Y",
            Language::Dutch => "%d-%m-%Y",
        }
    }
}

/// Formats an amount in cents as a human-readable price.
///
/// Fails with `500 unknown_currency` when the currency is not supported.
pub fn convert_cent_to_currency(
    cents: i64,
    currency: &str,
    lang: &str,
) -> Result<String, StructuredError> {
    let currency = Currency::from_str(currency)?;
    let language = Language::from_code(lang);
    Ok(currency.decorate(&format_amount(cents, language)))
}

fn format_amount(cents: i64, language: Language) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let units = (cents / 100).to_string();
    let fraction = cents % 100;

    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (index, digit) in units.chars().enumerate() {
        if index > 0 && (units.len() - index) % 3 == 0 {
            grouped.push(language.group_separator());
        }
        grouped.push(digit);
    }

    format!(
        "{sign}{grouped}{}{fraction:02}",
        language.decimal_separator()
    )
}

/// Converts an ISO 8601 timestamp into a localised date.
///
/// Fails with `500 cannot_convert_date` when the input cannot be parsed.
pub fn convert_to_date(date: &str, lang: &str) -> Result<String, StructuredError> {
    let parsed = DateTime::parse_from_rfc3339(date).map_err(|_| {
        let meta = Metadata::from_iter([("date", date)]);
        StructuredError::new(
            500,
            ERROR_DOMAIN,
            ERROR_SUB_DOMAIN,
            ERROR_CANNOT_CONVERT_DATE,
            Some(meta),
        )
    })?;

    Ok(parsed
        .format(Language::from_code(lang).date_format())
        .to_string())
}
