//! Host locale cache
//!
//! The numeric, monetary and date/time fields of the host locale are read
//! once, eagerly, when the kernel initializes; everything the formatting
//! layers need afterwards comes out of the cache without touching the
//! host again. Day and month names are the exception: they are fetched on
//! demand because of their bulk.
//!
//! Host date/time patterns use the `strftime` alphabet and are translated
//! into the internal token alphabet (`%(D,2,0)`, `%(M,2,0)`, `%(Y)`,
//! `%(H,2,0)`, ...). Monetary formats are composed from the host's
//! (symbol-precedes, separated-by-space, sign-position) triple into
//! pattern strings over `%(v)` value, `%(y)` symbol and `%(s)` sign.

use std::ffi::CStr;

use parking_lot::RwLock;

use crate::time::{Month, Weekday};
use crate::{ErrorKind, KernelError, Result};

/// The measurement system the locale reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureSystem {
    Metric,
    Us,
    Unknown,
}

/// Languages the framework recognizes, keyed by ISO-639 code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Afrikaans,
    Arabic,
    Bulgarian,
    Catalan,
    Chinese,
    Croatian,
    Czech,
    Danish,
    Dutch,
    English,
    Farsi,
    Finnish,
    French,
    German,
    Greek,
    Hebrew,
    Hungarian,
    Icelandic,
    Indonesian,
    Italian,
    Japanese,
    Korean,
    Latvian,
    Lithuanian,
    Norwegian,
    Polish,
    Portuguese,
    Romanian,
    Russian,
    Serbian,
    Slovak,
    Slovenian,
    Spanish,
    Swedish,
    Turkish,
    Ukrainian,
    Vietnamese,
    Other,
}

/// ISO-639 two-letter codes, mapped to the closed language set.
const LANGUAGE_MAP: &[(&str, Language)] = &[
    ("af", Language::Afrikaans),
    ("ar", Language::Arabic),
    ("bg", Language::Bulgarian),
    ("ca", Language::Catalan),
    ("cs", Language::Czech),
    ("da", Language::Danish),
    ("de", Language::German),
    ("el", Language::Greek),
    ("en", Language::English),
    ("es", Language::Spanish),
    ("fa", Language::Farsi),
    ("fi", Language::Finnish),
    ("fr", Language::French),
    ("he", Language::Hebrew),
    ("hr", Language::Croatian),
    ("hu", Language::Hungarian),
    ("id", Language::Indonesian),
    ("is", Language::Icelandic),
    ("it", Language::Italian),
    ("iw", Language::Hebrew),
    ("ja", Language::Japanese),
    ("ko", Language::Korean),
    ("lt", Language::Lithuanian),
    ("lv", Language::Latvian),
    ("nb", Language::Norwegian),
    ("nl", Language::Dutch),
    ("nn", Language::Norwegian),
    ("no", Language::Norwegian),
    ("pl", Language::Polish),
    ("pt", Language::Portuguese),
    ("ro", Language::Romanian),
    ("ru", Language::Russian),
    ("sk", Language::Slovak),
    ("sl", Language::Slovenian),
    ("sr", Language::Serbian),
    ("sv", Language::Swedish),
    ("tr", Language::Turkish),
    ("uk", Language::Ukrainian),
    ("vi", Language::Vietnamese),
    ("zh", Language::Chinese),
];

/// The cached locale fields.
#[derive(Debug, Clone)]
pub struct LocaleInfo {
    /// The host locale name the cache was loaded from.
    pub name: String,
    pub measure: MeasureSystem,
    /// Language from the process environment default.
    pub default_language: Language,
    /// Language of the locale actually in effect.
    pub language: Language,

    // Numeric fields
    pub decimal_digits: u32,
    pub group_size: u32,
    pub decimal_symbol: char,
    pub group_separator: char,
    pub positive_sign: char,
    pub negative_sign: char,

    // Monetary fields
    pub mon_decimal_digits: u32,
    pub mon_group_size: u32,
    pub mon_decimal_symbol: char,
    pub mon_group_separator: char,
    pub currency_symbol: String,
    /// Pattern over `%(v)`/`%(y)`/`%(s)` for non-negative amounts.
    pub positive_mon_format: String,
    /// Pattern over `%(v)`/`%(y)`/`%(s)` for negative amounts.
    pub negative_mon_format: String,

    // Date/time fields
    pub date_separator: char,
    pub time_separator: char,
    pub am_string: String,
    pub pm_string: String,
    /// Short date pattern in the internal token alphabet.
    pub date_format: String,
    /// Time pattern in the internal token alphabet.
    pub time_format: String,
}

impl Default for LocaleInfo {
    fn default() -> Self {
        Self {
            name: "C".to_string(),
            measure: MeasureSystem::Unknown,
            default_language: Language::English,
            language: Language::English,
            decimal_digits: 2,
            group_size: 3,
            decimal_symbol: '.',
            group_separator: ',',
            positive_sign: '+',
            negative_sign: '-',
            mon_decimal_digits: 2,
            mon_group_size: 3,
            mon_decimal_symbol: '.',
            mon_group_separator: ',',
            currency_symbol: "$".to_string(),
            positive_mon_format: "%(y)%(v)".to_string(),
            negative_mon_format: "-%(y)%(v)".to_string(),
            date_separator: '/',
            time_separator: ':',
            am_string: "AM".to_string(),
            pm_string: "PM".to_string(),
            date_format: "%(M,2,0)/%(D,2,0)/%(y,2,0)".to_string(),
            time_format: "%(H,2,0):%(u,2,0):%(s,2,0)".to_string(),
        }
    }
}

static LOCALE: RwLock<Option<LocaleInfo>> = RwLock::new(None);

/// A copy of the cached locale fields.
pub fn info() -> Result<LocaleInfo> {
    LOCALE
        .read()
        .clone()
        .ok_or_else(|| KernelError::new(ErrorKind::NotReady).with_detail("locale cache not loaded"))
}

/// Map an ISO-639 locale or language name to the closed language set.
pub fn map_language(name: &str) -> Language {
    let code: String = name
        .chars()
        .take_while(|ch| ch.is_ascii_alphabetic())
        .take(2)
        .collect::<String>()
        .to_ascii_lowercase();

    LANGUAGE_MAP
        .iter()
        .find(|(iso, _)| *iso == code)
        .map_or(Language::Other, |(_, language)| *language)
}

fn measure_from_name(name: &str) -> MeasureSystem {
    if name.is_empty() || name == "C" || name == "POSIX" {
        return MeasureSystem::Unknown;
    }
    // The US, Liberia and Myanmar are the customary-unit holdouts
    let upper = name.to_ascii_uppercase();
    if upper.contains("_US") || upper.contains("_LR") || upper.contains("_MM") {
        MeasureSystem::Us
    } else {
        MeasureSystem::Metric
    }
}

#[cfg(unix)]
fn langinfo(item: libc::nl_item) -> String {
    unsafe {
        let text = libc::nl_langinfo(item);
        if text.is_null() {
            String::new()
        } else {
            CStr::from_ptr(text).to_string_lossy().into_owned()
        }
    }
}

#[cfg(unix)]
unsafe fn lconv_char(field: *const libc::c_char, fallback: char) -> char {
    if field.is_null() {
        return fallback;
    }
    let bytes = CStr::from_ptr(field).to_bytes();
    match bytes.first() {
        Some(&byte) if byte != 0 => byte as char,
        _ => fallback,
    }
}

#[cfg(unix)]
unsafe fn lconv_string(field: *const libc::c_char) -> String {
    if field.is_null() {
        return String::new();
    }
    CStr::from_ptr(field).to_string_lossy().into_owned()
}

/// Grouping and digit fields use CHAR_MAX for "not specified"
fn checked_count(raw: libc::c_char, fallback: u32) -> u32 {
    let value = raw as i32;
    if (0..=18).contains(&value) {
        value as u32
    } else {
        fallback
    }
}

/// Compose a monetary pattern from the host's layout triple.
fn money_format(precedes: bool, space: bool, sign_posn: u8) -> String {
    let body = match (precedes, space) {
        (true, true) => "%(y) %(v)",
        (true, false) => "%(y)%(v)",
        (false, true) => "%(v) %(y)",
        (false, false) => "%(v)%(y)",
    };

    match sign_posn {
        0 => format!("({body})"),
        1 => format!("%(s){body}"),
        2 => format!("{body}%(s)"),
        3 => body.replace("%(y)", "%(s)%(y)"),
        4 => body.replace("%(y)", "%(y)%(s)"),
        _ => format!("%(s){body}"),
    }
}

/// Translate a `strftime` pattern into the internal token alphabet.
/// Unknown specifiers pass through as literal text.
fn translate_format(host: &str) -> String {
    let mut out = String::with_capacity(host.len() * 3);
    let mut chars = host.chars();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }

        // Skip the E/O modifiers; the base field tells us what to emit
        let mut spec = match chars.next() {
            Some(spec) => spec,
            None => break,
        };
        if spec == 'E' || spec == 'O' {
            spec = match chars.next() {
                Some(spec) => spec,
                None => break,
            };
        }

        match spec {
            'd' => out.push_str("%(D,2,0)"),
            'e' => out.push_str("%(D)"),
            'm' => out.push_str("%(M,2,0)"),
            'y' => out.push_str("%(y,2,0)"),
            'Y' => out.push_str("%(Y)"),
            'H' | 'k' => out.push_str("%(H,2,0)"),
            'I' | 'l' => out.push_str("%(h,2,0)"),
            'M' => out.push_str("%(u,2,0)"),
            'S' => out.push_str("%(s,2,0)"),
            'p' | 'P' => out.push_str("%(t)"),
            'a' => out.push_str("%(a)"),
            'A' => out.push_str("%(w)"),
            'b' | 'h' => out.push_str("%(m)"),
            'B' => out.push_str("%(n)"),
            'T' => out.push_str("%(H,2,0):%(u,2,0):%(s,2,0)"),
            'R' => out.push_str("%(H,2,0):%(u,2,0)"),
            'r' => out.push_str("%(h,2,0):%(u,2,0):%(s,2,0) %(t)"),
            'D' => out.push_str("%(M,2,0)/%(D,2,0)/%(y,2,0)"),
            'F' => out.push_str("%(Y)-%(M,2,0)-%(D,2,0)"),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            '%' => out.push('%'),
            other => out.push(other),
        }
    }
    out
}

/// First separator-looking character of a host date/time pattern.
fn find_separator(pattern: &str, fallback: char) -> char {
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        if ch == '%' {
            // Skip the specifier so its letter is not mistaken for a
            // separator
            chars.next();
            continue;
        }
        if !ch.is_ascii_alphanumeric() && !ch.is_whitespace() {
            return ch;
        }
    }
    fallback
}

#[cfg(unix)]
fn load_host_locale() -> LocaleInfo {
    let mut info = LocaleInfo::default();

    let name = unsafe {
        let name = libc::setlocale(libc::LC_ALL, b"\0".as_ptr().cast());
        if name.is_null() {
            log::warn!("host rejected the environment locale, staying with C");
            String::from("C")
        } else {
            CStr::from_ptr(name).to_string_lossy().into_owned()
        }
    };

    info.name = name.clone();
    info.measure = measure_from_name(&name);
    info.language = map_language(&name);
    info.default_language = std::env::var("LANG")
        .map(|lang| map_language(&lang))
        .unwrap_or(info.language);

    unsafe {
        let conv = libc::localeconv();
        if !conv.is_null() {
            let conv = &*conv;
            info.decimal_symbol = lconv_char(conv.decimal_point, '.');
            info.group_separator = lconv_char(conv.thousands_sep, ',');
            info.group_size = checked_count(
                if conv.grouping.is_null() { 0 } else { *conv.grouping },
                3,
            );
            info.positive_sign = lconv_char(conv.positive_sign, '+');
            info.negative_sign = lconv_char(conv.negative_sign, '-');

            info.mon_decimal_digits = checked_count(conv.frac_digits, 2);
            info.mon_decimal_symbol = lconv_char(conv.mon_decimal_point, info.decimal_symbol);
            info.mon_group_separator = lconv_char(conv.mon_thousands_sep, info.group_separator);
            info.mon_group_size = checked_count(
                if conv.mon_grouping.is_null() { 0 } else { *conv.mon_grouping },
                info.group_size,
            );

            let symbol = lconv_string(conv.currency_symbol);
            if !symbol.is_empty() {
                info.currency_symbol = symbol;
            }

            info.positive_mon_format = money_format(
                conv.p_cs_precedes != 0,
                conv.p_sep_by_space != 0,
                conv.p_sign_posn as u8,
            );
            info.negative_mon_format = money_format(
                conv.n_cs_precedes != 0,
                conv.n_sep_by_space != 0,
                conv.n_sign_posn as u8,
            );
        }
    }

    let date_pattern = langinfo(libc::D_FMT);
    let time_pattern = langinfo(libc::T_FMT);
    info.date_separator = find_separator(&date_pattern, '/');
    info.time_separator = find_separator(&time_pattern, ':');
    if !date_pattern.is_empty() {
        info.date_format = translate_format(&date_pattern);
    }
    if !time_pattern.is_empty() {
        info.time_format = translate_format(&time_pattern);
    }

    let am = langinfo(libc::AM_STR);
    let pm = langinfo(libc::PM_STR);
    if !am.is_empty() {
        info.am_string = am;
    }
    if !pm.is_empty() {
        info.pm_string = pm;
    }

    info
}

/// Full name of a weekday in the current locale, fetched on demand.
#[cfg(unix)]
pub fn day_name(day: Weekday) -> String {
    langinfo(libc::DAY_1 + day.index() as libc::nl_item)
}

/// Abbreviated name of a weekday in the current locale.
#[cfg(unix)]
pub fn abbrev_day_name(day: Weekday) -> String {
    langinfo(libc::ABDAY_1 + day.index() as libc::nl_item)
}

/// Full name of a month in the current locale, fetched on demand.
#[cfg(unix)]
pub fn month_name(month: Month) -> String {
    langinfo(libc::MON_1 + month.index() as libc::nl_item)
}

/// Abbreviated name of a month in the current locale.
#[cfg(unix)]
pub fn abbrev_month_name(month: Month) -> String {
    langinfo(libc::ABMON_1 + month.index() as libc::nl_item)
}

pub(crate) fn initialize() -> Result<()> {
    let mut cache = LOCALE.write();
    if cache.is_some() {
        return Err(KernelError::new(ErrorKind::AlreadyExists)
            .with_detail("locale cache already loaded"));
    }

    #[cfg(unix)]
    let info = load_host_locale();
    #[cfg(not(unix))]
    let info = LocaleInfo::default();

    log::info!(
        "Locale cache loaded: '{}' ({:?}, {:?})",
        info.name,
        info.language,
        info.measure
    );
    *cache = Some(info);
    Ok(())
}

pub(crate) fn shutdown() -> Result<()> {
    *LOCALE.write() = None;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_map() {
        assert_eq!(map_language("en_US.UTF-8"), Language::English);
        assert_eq!(map_language("de_DE"), Language::German);
        assert_eq!(map_language("pt_BR.UTF-8"), Language::Portuguese);
        assert_eq!(map_language("iw_IL"), Language::Hebrew);
        assert_eq!(map_language("xx_XX"), Language::Other);
        assert_eq!(map_language(""), Language::Other);
    }

    #[test]
    fn test_measure_heuristic() {
        assert_eq!(measure_from_name("en_US.UTF-8"), MeasureSystem::Us);
        assert_eq!(measure_from_name("en_GB.UTF-8"), MeasureSystem::Metric);
        assert_eq!(measure_from_name("my_MM"), MeasureSystem::Us);
        assert_eq!(measure_from_name("C"), MeasureSystem::Unknown);
        assert_eq!(measure_from_name(""), MeasureSystem::Unknown);
    }

    #[test]
    fn test_money_formats() {
        // $1.23 style: symbol precedes, no space, sign before everything
        assert_eq!(money_format(true, false, 1), "%(s)%(y)%(v)");
        // 1.23 $ style with parentheses for negatives
        assert_eq!(money_format(false, true, 0), "(%(v) %(y))");
        // Sign glued to the symbol
        assert_eq!(money_format(true, false, 3), "%(s)%(y)%(v)");
        assert_eq!(money_format(true, false, 4), "%(y)%(s)%(v)");
        assert_eq!(money_format(false, false, 2), "%(v)%(y)%(s)");
    }

    #[test]
    fn test_format_translation() {
        assert_eq!(
            translate_format("%m/%d/%y"),
            "%(M,2,0)/%(D,2,0)/%(y,2,0)"
        );
        assert_eq!(
            translate_format("%H:%M:%S"),
            "%(H,2,0):%(u,2,0):%(s,2,0)"
        );
        assert_eq!(
            translate_format("%I:%M %p"),
            "%(h,2,0):%(u,2,0) %(t)"
        );
        assert_eq!(
            translate_format("%A %e %B %Y"),
            "%(w) %(D) %(n) %(Y)"
        );
        // The %T shorthand expands fully
        assert_eq!(translate_format("%T"), "%(H,2,0):%(u,2,0):%(s,2,0)");
        // Literal percent survives
        assert_eq!(translate_format("100%%"), "100%");
    }

    #[test]
    fn test_separator_extraction() {
        assert_eq!(find_separator("%m/%d/%y", '?'), '/');
        assert_eq!(find_separator("%d.%m.%Y", '?'), '.');
        assert_eq!(find_separator("%H:%M", '?'), ':');
        assert_eq!(find_separator("", '?'), '?');
    }

    #[cfg(unix)]
    #[test]
    fn test_host_locale_loads() {
        let info = load_host_locale();
        assert!(!info.date_format.is_empty());
        assert!(!info.time_format.is_empty());
        assert!(!info.currency_symbol.is_empty());

        // Day and month names come straight from the host
        assert!(!day_name(Weekday::Monday).is_empty());
        assert!(!abbrev_month_name(Month::January).is_empty());
    }
}
