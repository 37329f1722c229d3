//! OCR text post-processing.
//!
//! Everything here is a pure function over strings so the pipeline can be
//! exercised without a Tesseract worker: cleaning, file-name and code-snippet
//! extraction, log-marker cleanup, and the gibberish filter that strips OCR
//! noise while preserving timestamps verbatim.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Delimiter standing in for removed noise.
const DELIMITER: &str = "---";

/// Private-use sentinels bracketing protected timestamp placeholders.
const PH_OPEN: char = '\u{E000}';
const PH_CLOSE: char = '\u{E001}';

const FILE_EXTENSIONS: &[&str] = &[
    "rs", "js", "jsx", "ts", "tsx", "py", "go", "java", "rb", "c", "cpp", "h", "hpp", "cs",
    "css", "html", "json", "yaml", "yml", "toml", "md", "txt", "pdf", "png", "jpg", "jpeg",
    "gif", "svg", "csv", "xlsx", "docx", "zip", "tar", "gz", "sh", "sql", "log", "lock",
];

/// Leading keywords that mark a line as code.
const CODE_KEYWORDS: &[&str] = &["export", "import", "function", "const", "let", "var"];

/// Common English and tech words that fail the consonant heuristics but are
/// perfectly real. Fixed list; additions only.
const PROTECTED_WORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "from", "they", "will", "would", "there", "their",
    "what", "about", "which", "when", "your", "said", "them", "these", "some", "time", "into",
    "only", "over", "also", "back", "after", "work", "first", "well", "even", "want", "because",
    "most", "length", "strength", "months", "things", "thoughts", "words", "worlds", "rights",
    "facts", "parts", "points", "thanks", "myself", "its", "js", "ts", "css", "html", "http",
    "https", "www", "npm", "src", "sql", "api", "cli", "cpu", "gpu", "url", "json", "xml",
    "yml", "png", "jpg", "pdf", "ssh", "tcp", "udp", "dns", "aws", "id", "ok", "vs",
];

static PROTECTED: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| PROTECTED_WORDS.iter().copied().collect());

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    let exts = FILE_EXTENSIONS.join("|");
    Regex::new(&format!(
        r"\b[A-Za-z0-9_][A-Za-z0-9_.-]*\.(?:{exts})\b"
    ))
    .expect("file name pattern is valid")
});

/// `prefix-...suffix.ext` — an ellipsis-truncated name as file managers
/// render it.
static TRUNCATED_INLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z0-9_-]+)-\.{3}\s*([A-Za-z0-9_-]+\.[A-Za-z0-9]{1,6})\b")
        .expect("truncated name pattern is valid")
});

/// `prefix-` at a break followed by a nearby `suffix.ext` token.
static TRUNCATED_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z0-9_-]+)-\s+([A-Za-z0-9_-]+\.[A-Za-z0-9]{1,6})\b")
        .expect("split name pattern is valid")
});

/// `hyphenated-compound MonthName` — a list row pairing a name with a date.
static HYPHEN_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b([a-z0-9]+(?:-[a-z0-9]+)+)\s+(?:January|February|March|April|May|June|July|August|September|October|November|December)\b",
    )
    .expect("hyphen month pattern is valid")
});

static TAG_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[A-Z][A-Z0-9_]*\]").expect("tag marker pattern is valid"));

static BRACKETED_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\]]*\d{1,2}:\d{2}[^\]]*\]").expect("bracketed timestamp pattern is valid")
});

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:\b(?:Mon|Tue|Wed|Thu|Fri|Sat|Sun)[A-Za-z]*\d{1,2}(?:\s+\d{1,2}:\d{2}(?::\d{2})?\s?(?:[AP]M)?)?\b)|(?:\b\d{1,2}:\d{2}(?::\d{2})?\s?(?:[AP]M)?\b)|(?:\b\d{4}-\d{2}-\d{2}\b)",
    )
    .expect("timestamp pattern is valid")
});

static SINGLE_LETTER_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[A-Za-z]\s+){2,}[A-Za-z]\b").expect("letter run pattern is valid")
});

static PUNCT_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[!-/:-@\[-`{-~]{3,}").expect("punct run pattern is valid")
});

static MULTI_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:---\s*){2,}").expect("delimiter collapse pattern is valid"));

/// Fully processed OCR output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedText {
    pub text: String,
    pub files: Vec<String>,
    pub code_snippets: Vec<String>,
}

/// Run the whole post-processing chain: clean, extract file names and code
/// snippets, redact them from the body, strip log markers, filter gibberish.
pub fn process(raw: &str) -> ProcessedText {
    let cleaned = clean_ocr_text(raw);
    let files = extract_file_names(&cleaned);
    let code_snippets = extract_code_snippets(&cleaned);

    let mut body = cleaned;
    for item in files.iter().chain(code_snippets.iter()) {
        body = body.replace(item.as_str(), " ");
    }

    let body = additional_cleanup(&body);
    let text = filter_gibberish(&body);

    ProcessedText {
        text,
        files,
        code_snippets,
    }
}

/// Keep printable ASCII, replace everything else with a space, collapse
/// space runs. Line structure survives so code detection can see line heads.
pub fn clean_ocr_text(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let ascii: String = line
                .chars()
                .map(|c| if (' '..='~').contains(&c) { c } else { ' ' })
                .collect();
            ascii.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// File-name candidates: direct matches against the known extension list,
/// reconstructed ellipsis-truncated names, and hyphenated compounds that sit
/// next to a month name. Deduplicated case-insensitively, then checked
/// against the safety predicate.
pub fn extract_file_names(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut reconstructed_spans: Vec<(usize, usize)> = Vec::new();

    for caps in TRUNCATED_INLINE.captures_iter(text) {
        let whole = caps.get(0).expect("match exists");
        reconstructed_spans.push((whole.start(), whole.end()));
        candidates.push(format!("{}-{}", &caps[1], &caps[2]));
    }
    for caps in TRUNCATED_SPLIT.captures_iter(text) {
        let whole = caps.get(0).expect("match exists");
        reconstructed_spans.push((whole.start(), whole.end()));
        candidates.push(format!("{}-{}", &caps[1], &caps[2]));
    }
    // Direct matches, unless a reconstruction already claimed that span
    // (the bare suffix of a truncated name is not a file of its own).
    for m in FILE_NAME.find_iter(text) {
        let claimed = reconstructed_spans
            .iter()
            .any(|&(start, end)| m.start() >= start && m.end() <= end);
        if !claimed {
            candidates.push(m.as_str().to_string());
        }
    }
    for caps in HYPHEN_MONTH.captures_iter(text) {
        candidates.push(caps[1].to_string());
    }

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.to_lowercase()))
        .filter(|c| is_safe_filename(c))
        .collect()
}

/// A candidate passes when it is shaped like something a filesystem would
/// actually accept.
fn is_safe_filename(candidate: &str) -> bool {
    if candidate.is_empty() || candidate.len() >= 256 {
        return false;
    }
    if candidate.chars().any(|c| c.is_control()) {
        return false;
    }
    const FORBIDDEN: &[char] = &[
        '<', '>', ':', '"', '/', '\\', '|', '?', '*', ',', ';', '=', '(', ')', '[', ']', '{',
        '}', ' ',
    ];
    if candidate.chars().any(|c| FORBIDDEN.contains(&c)) {
        return false;
    }
    // A ".." run is an ellipsis artifact, not a real name.
    if candidate.contains("..") {
        return false;
    }

    let has_extension = candidate
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty() && ext.len() <= 6);
    let hyphenated_compound = candidate.contains('-') && !candidate.starts_with('-');

    has_extension || hyphenated_compound
}

/// Lines whose first token is a JS-ish declaration keyword.
pub fn extract_code_snippets(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|first| CODE_KEYWORDS.contains(&first))
        })
        .map(str::to_string)
        .collect()
}

/// Strip `[TAG]` log markers and bracketed timestamps, collapse the gaps.
pub fn additional_cleanup(text: &str) -> String {
    let without_tags = TAG_MARKER.replace_all(text, " ");
    let without_stamps = BRACKETED_TIMESTAMP.replace_all(&without_tags, " ");
    without_stamps
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove OCR noise while preserving timestamps verbatim.
///
/// Timestamps are substituted with placeholders up front and restored at the
/// end, so no later step can mangle them. Dense single-letter runs and
/// punctuation runs become a literal `---` delimiter; a 6-token sliding
/// window wipes neighborhoods where nonsense dominates; a final per-token
/// pass removes isolated stragglers.
pub fn filter_gibberish(text: &str) -> String {
    // 1. Protect timestamps.
    let mut protected_spans = Vec::new();
    let mut shielded = String::with_capacity(text.len());
    let mut last = 0;
    for m in TIMESTAMP.find_iter(text) {
        shielded.push_str(&text[last..m.start()]);
        shielded.push(PH_OPEN);
        shielded.push_str(&protected_spans.len().to_string());
        shielded.push(PH_CLOSE);
        protected_spans.push(m.as_str().to_string());
        last = m.end();
    }
    shielded.push_str(&text[last..]);

    // 2. Single-letter runs, then punctuation runs, become delimiters.
    let shielded = SINGLE_LETTER_RUN.replace_all(&shielded, DELIMITER);
    let shielded = PUNCT_RUN.replace_all(&shielded, DELIMITER);

    // 3. Sliding window over tokens.
    let tokens: Vec<&str> = shielded.split_whitespace().collect();
    let mut doomed = vec![false; tokens.len()];

    let nonsense: Vec<bool> = tokens.iter().map(|t| is_nonsense_token(t)).collect();
    if tokens.len() >= WINDOW {
        for start in 0..=(tokens.len() - WINDOW) {
            let window_nonsense = (start..start + WINDOW).filter(|&i| nonsense[i]).count();
            if window_nonsense >= WINDOW_THRESHOLD {
                for i in start..start + WINDOW {
                    if !is_placeholder(tokens[i]) && !is_protected(tokens[i]) {
                        doomed[i] = true;
                    }
                }
            }
        }
    }

    // 4. Individual pass for isolated nonsense the window missed.
    for (i, token) in tokens.iter().enumerate() {
        if !doomed[i] && nonsense[i] {
            doomed[i] = true;
        }
    }

    // 5. Rebuild, collapse delimiter runs, restore timestamps.
    let rebuilt = tokens
        .iter()
        .enumerate()
        .map(|(i, t)| if doomed[i] { DELIMITER } else { *t })
        .collect::<Vec<_>>()
        .join(" ");

    let collapsed = MULTI_DELIMITER.replace_all(&rebuilt, "--- ");
    let mut restored = collapsed.into_owned();
    for (index, span) in protected_spans.iter().enumerate() {
        let placeholder = format!("{PH_OPEN}{index}{PH_CLOSE}");
        restored = restored.replace(&placeholder, span);
    }

    restored.split_whitespace().collect::<Vec<_>>().join(" ")
}

const WINDOW: usize = 6;
const WINDOW_THRESHOLD: usize = 4;

fn is_placeholder(token: &str) -> bool {
    token.contains(PH_OPEN)
}

fn is_protected(token: &str) -> bool {
    let core: String = token
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_lowercase();
    PROTECTED.contains(core.as_str())
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// The nonsense predicate from the filtering contract. Evaluated over the
/// alphabetic core of the token; anything carrying digits, placeholders, or
/// a protected word is never nonsense.
fn is_nonsense_token(token: &str) -> bool {
    if token == DELIMITER || is_placeholder(token) {
        return false;
    }
    if token.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }

    let letters: Vec<char> = token
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if letters.is_empty() {
        return false;
    }
    if PROTECTED.contains(letters.iter().collect::<String>().as_str()) {
        return false;
    }

    let len = letters.len();
    let vowels = letters.iter().filter(|&&c| is_vowel(c)).count();

    if vowels == 0 && len >= 3 {
        return true;
    }
    if len <= 4 && (vowels as f32 / len as f32) < 0.2 {
        return true;
    }
    let leading_consonants = letters.iter().take_while(|&&c| !is_vowel(c)).count();
    if leading_consonants >= 3 && len <= 5 {
        return true;
    }
    let trailing_consonants = letters.iter().rev().take_while(|&&c| !is_vowel(c)).count();
    if trailing_consonants >= 4 {
        return true;
    }

    false
}
