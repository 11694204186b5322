//! Title normalization and namespace classification.
//!
//! Every title used as a key (article titles, link targets, redirect targets,
//! category names) goes through [`normalize_title`], so two spellings of the
//! same page always collapse onto one node.

pub const NS_MAIN: i32 = 0;
pub const NS_FILE: i32 = 6;
pub const NS_TEMPLATE: i32 = 10;
pub const NS_CATEGORY: i32 = 14;

/// Canonical and alias prefixes, matched case-insensitively.
const NAMESPACES: &[(&str, i32)] = &[
    ("media", -2),
    ("special", -1),
    ("talk", 1),
    ("user", 2),
    ("user talk", 3),
    ("wikipedia", 4),
    ("wp", 4),
    ("project", 4),
    ("wikipedia talk", 5),
    ("file", NS_FILE),
    ("image", NS_FILE),
    ("file talk", 7),
    ("image talk", 7),
    ("mediawiki", 8),
    ("mediawiki talk", 9),
    ("template", NS_TEMPLATE),
    ("template talk", 11),
    ("help", 12),
    ("help talk", 13),
    ("category", NS_CATEGORY),
    ("category talk", 15),
    ("portal", 100),
    ("portal talk", 101),
    ("draft", 118),
    ("draft talk", 119),
    ("timedtext", 710),
    ("module", 828),
    ("module talk", 829),
];

const ARTICLE_URL_BASE: &str = "https://en.wikipedia.org/wiki/";

/// Sister-project prefixes that make a link leave the wiki.
const INTERWIKI: &[&str] = &[
    "w",
    "wikt",
    "wiktionary",
    "commons",
    "meta",
    "m",
    "mw",
    "s",
    "wikisource",
    "q",
    "wikiquote",
    "b",
    "wikibooks",
    "n",
    "wikinews",
    "v",
    "wikiversity",
    "voy",
    "wikivoyage",
    "species",
    "wikispecies",
    "d",
    "wikidata",
    "foundation",
    "phab",
];

/// Normalizes a title: underscores become spaces, whitespace runs collapse,
/// leading colons are dropped and the first character is upper-cased.
///
/// Idempotent: `normalize_title(&normalize_title(x)) == normalize_title(x)`.
pub fn normalize_title(raw: &str) -> String {
    let spaced = raw.replace(['_', '\u{a0}'], " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_start_matches(|c: char| c == ':' || c.is_whitespace());

    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(trimmed.len());
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

fn lookup_namespace(prefix: &str) -> Option<i32> {
    let prefix = prefix.replace('_', " ");
    let prefix = prefix.split_whitespace().collect::<Vec<_>>().join(" ");
    NAMESPACES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&prefix))
        .map(|(_, ns)| *ns)
}

/// Splits a known namespace prefix off a title.
///
/// Returns `(NS_MAIN, title)` when the text before the first colon is not a
/// namespace name, so titles such as `Star Wars: Episode IV` stay intact.
pub fn split_namespace(title: &str) -> (i32, &str) {
    if let Some(colon) = title.find(':') {
        if let Some(ns) = lookup_namespace(&title[..colon]) {
            return (ns, title[colon + 1..].trim_start());
        }
    }
    (NS_MAIN, title)
}

/// Language editions of Wikipedia; a link prefixed with one of these points
/// at another wiki. Anything else before a colon stays part of the title.
const LANGUAGE_CODES: &[&str] = &[
    "aa", "ab", "ace", "af", "ak", "als", "am", "an", "ang", "ar", "arc", "arz", "as", "ast",
    "av", "ay", "az", "azb", "ba", "bar", "bat-smg", "bcl", "be", "be-tarask", "be-x-old", "bg",
    "bh", "bi", "bjn", "bm", "bn", "bo", "bpy", "br", "bs", "bug", "bxr", "ca", "cbk-zam",
    "cdo", "ce", "ceb", "ch", "cho", "chr", "chy", "ckb", "co", "cr", "crh", "cs", "csb", "cu",
    "cv", "cy", "da", "de", "diq", "dsb", "dv", "dz", "ee", "el", "eml", "en", "eo", "es", "et",
    "eu", "ext", "fa", "ff", "fi", "fiu-vro", "fj", "fo", "fr", "frp", "frr", "fur", "fy", "ga",
    "gag", "gan", "gd", "gl", "glk", "gn", "gom", "got", "gu", "gv", "ha", "hak", "haw", "he",
    "hi", "hif", "ho", "hr", "hsb", "ht", "hu", "hy", "hz", "ia", "id", "ie", "ig", "ii", "ik",
    "ilo", "io", "is", "it", "iu", "ja", "jbo", "jv", "ka", "kaa", "kab", "kbd", "kg", "ki",
    "kj", "kk", "kl", "km", "kn", "ko", "koi", "kr", "krc", "ks", "ksh", "ku", "kv", "kw", "ky",
    "la", "lad", "lb", "lbe", "lez", "lg", "li", "lij", "lmo", "ln", "lo", "lrc", "lt", "ltg",
    "lv", "mai", "map-bms", "mdf", "mg", "mh", "mhr", "mi", "min", "mk", "ml", "mn", "mr",
    "mrj", "ms", "mt", "mus", "mwl", "my", "myv", "mzn", "na", "nah", "nap", "nds", "nds-nl",
    "ne", "new", "ng", "nl", "nn", "no", "nov", "nrm", "nso", "nv", "ny", "oc", "olo", "om",
    "or", "os", "pa", "pag", "pam", "pap", "pcd", "pdc", "pfl", "pi", "pih", "pl", "pms", "pnb",
    "pnt", "ps", "pt", "qu", "rm", "rmy", "rn", "ro", "roa-rup", "roa-tara", "ru", "rue", "rw",
    "sa", "sah", "sc", "scn", "sco", "sd", "se", "sg", "sh", "si", "simple", "sk", "sl", "sm",
    "sn", "so", "sq", "sr", "srn", "ss", "st", "stq", "su", "sv", "sw", "szl", "ta", "tcy", "te",
    "tet", "tg", "th", "ti", "tk", "tl", "tn", "to", "tpi", "tr", "ts", "tt", "tum", "tw", "ty",
    "tyv", "udm", "ug", "uk", "ur", "uz", "ve", "vec", "vep", "vi", "vls", "vo", "wa", "war",
    "wo", "wuu", "xal", "xh", "xmf", "yi", "yo", "yue", "za", "zea", "zh", "zh-classical",
    "zh-min-nan", "zh-yue", "zu",
];

/// True for `de:Foo`, `wikt:foo` and similar links that point off-wiki.
pub fn is_interwiki(target: &str) -> bool {
    let Some(colon) = target.find(':') else {
        return false;
    };
    let prefix = target[..colon].trim();
    INTERWIKI
        .iter()
        .chain(LANGUAGE_CODES)
        .any(|p| p.eq_ignore_ascii_case(prefix))
}

/// True when a normalized title names a page in the article namespace of this wiki.
pub fn is_article_title(title: &str) -> bool {
    split_namespace(title).0 == NS_MAIN && !is_interwiki(title)
}

/// Public page URL for a normalized article title.
pub fn article_url(title: &str) -> String {
    format!("{}{}", ARTICLE_URL_BASE, title.replace(' ', "_"))
}

/// Normalized category name from `Category:Foo`, `category:foo` or a bare `Foo`.
pub fn category_name(title: &str) -> String {
    match split_namespace(title) {
        (NS_CATEGORY, rest) => normalize_title(rest),
        _ => normalize_title(title),
    }
}
