//! Text cleanup shared by the extractor and the scriptwriter.
//!
//! Everything here is pure and deterministic; the scriptwriter relies on that
//! for byte-identical output.

use std::collections::HashSet;

use unicode_segmentation::UnicodeSegmentation;

/// Tags whose content is never article text
const DROPPED_BLOCKS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "svg", "template",
    "title",
];

/// Tags kept for their line breaks; every other tag is unwrapped
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Render width, wide enough that paragraphs are never wrapped
const RENDER_WIDTH: usize = 10_000;

/// Collapse whitespace and drop invisible characters
pub fn clean_text(text: &str) -> String {
    let replaced: String = text
        .chars()
        .filter(|c| !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}'))
        .map(|c| if c == '\u{a0}' { ' ' } else { c })
        .collect();

    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a payload looks like HTML rather than plain text
pub fn looks_like_html(payload: &str) -> bool {
    let lower = payload.to_ascii_lowercase();
    ["<html", "<body", "<p", "<div", "<article", "<br", "<title"]
        .iter()
        .any(|tag| lower.contains(tag))
}

/// Extracted document parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlDocument {
    pub title: Option<String>,
    pub body: String,
}

/// Recover readable text from an article page.
///
/// ammonia drops scripts, styles and page chrome and unwraps inline markup;
/// html2text then renders what is left, decoding entities. One line per block.
pub fn html_to_text(html: &str) -> Result<HtmlDocument, html2text::Error> {
    let title = match find_element_text(html, "title") {
        Some(raw) => Some(clean_text(&html2text::from_read(raw.as_bytes(), RENDER_WIDTH)?)),
        None => None,
    }
    .filter(|t| !t.is_empty());

    let sanitized = ammonia::Builder::empty()
        .tags(BLOCK_TAGS.iter().copied().collect::<HashSet<_>>())
        .clean_content_tags(DROPPED_BLOCKS.iter().copied().collect::<HashSet<_>>())
        .clean(html)
        .to_string();

    let rendered = html2text::from_read(sanitized.as_bytes(), RENDER_WIDTH)?;
    let body = rendered
        .lines()
        .map(|line| clean_text(strip_block_marker(line.trim_start())))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(HtmlDocument { title, body })
}

/// Drop the heading and bullet prefixes html2text puts on block lines
fn strip_block_marker(line: &str) -> &str {
    let unheaded = line.trim_start_matches('#');
    if unheaded.len() != line.len() {
        return unheaded.trim_start();
    }
    line.strip_prefix("* ").unwrap_or(line)
}

fn find_element_text(html: &str, name: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find(&format!("<{}", name))?;
    let content_start = open + lower[open..].find('>')? + 1;
    let content_end = content_start + lower[content_start..].find(&format!("</{}", name))?;
    let text = html[content_start..content_end].trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Split text into sentences on Unicode sentence boundaries (UAX #29)
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Remove http(s) and www links from text meant to be spoken
pub fn remove_urls(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| {
            let lower = word.to_ascii_lowercase();
            !(lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www."))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

const EN_UNITS: [&str; 30] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen", "twenty", "twenty-one", "twenty-two", "twenty-three", "twenty-four",
    "twenty-five", "twenty-six", "twenty-seven", "twenty-eight", "twenty-nine",
];

const EN_TENS: [&str; 7] = ["thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety"];

const ES_UNITS: [&str; 30] = [
    "cero", "uno", "dos", "tres", "cuatro", "cinco", "seis", "siete", "ocho", "nueve", "diez",
    "once", "doce", "trece", "catorce", "quince", "dieciséis", "diecisiete", "dieciocho",
    "diecinueve", "veinte", "veintiuno", "veintidós", "veintitrés", "veinticuatro",
    "veinticinco", "veintiséis", "veintisiete", "veintiocho", "veintinueve",
];

const ES_TENS: [&str; 7] = [
    "treinta", "cuarenta", "cincuenta", "sesenta", "setenta", "ochenta", "noventa",
];

/// Spell small integers as words so TTS engines read them naturally.
///
/// Handles 0..=29 and round tens up to 90 in English or Spanish (`language`
/// "es"); four-digit years and everything else are left as digits.
pub fn spell_small_numbers(text: &str, language: &str) -> String {
    let (units, tens) = if language.eq_ignore_ascii_case("es") {
        (&ES_UNITS, &ES_TENS)
    } else {
        (&EN_UNITS, &EN_TENS)
    };

    text.split(' ')
        .map(|word| {
            let digits_end = word
                .char_indices()
                .find(|(_, c)| !c.is_ascii_digit())
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            let (digits, suffix) = word.split_at(digits_end);
            // "2.5" and "3%" are not plain counts
            let suffix_is_punct = suffix
                .chars()
                .all(|c| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')'))
                && !(suffix.starts_with('.') && suffix.len() > 1);

            if digits.is_empty() || !suffix_is_punct || digits.len() > 2 {
                return word.to_string();
            }
            let spelled = match digits.parse::<usize>() {
                Ok(n) if n < units.len() => units[n],
                Ok(n) if n % 10 == 0 && (30..=90).contains(&n) => tens[n / 10 - 3],
                _ => return word.to_string(),
            };
            format!("{}{}", spelled, suffix)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max_chars` characters, preferring a word boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(space) if space > 0 => cut[..space].trim_end().to_string(),
        _ => cut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Hello\u{a0}world\u{200b}!\n\n Bye "), "Hello world! Bye");
    }

    #[test]
    fn test_html_to_text_drops_chrome() {
        let html = r#"<html><head><title>Markets &amp; Money</title>
            <script>var x = "<p>nope</p>";</script><style>p { color: red }</style></head>
            <body><nav>Home | World</nav><article><h1>Markets rise</h1>
            <p>Stocks <em>climbed</em>&nbsp;3% on Monday.</p><!-- ad --><p>Investors cheered.</p>
            <ul><li>Oil fell.</li><li>Gold held.</li></ul></article>
            <footer>Copyright</footer></body></html>"#;

        let doc = html_to_text(html).unwrap();

        assert_eq!(doc.title.as_deref(), Some("Markets & Money"));
        let lines: Vec<&str> = doc.body.lines().collect();
        for expected in [
            "Markets rise",
            "Stocks climbed 3% on Monday.",
            "Investors cheered.",
            "Oil fell.",
            "Gold held.",
        ] {
            assert!(lines.contains(&expected), "missing {:?} in {:?}", expected, lines);
        }
        for dropped in ["nope", "color", "Home", "Copyright", "ad"] {
            assert!(!doc.body.split_whitespace().any(|w| w == dropped), "kept {:?}", dropped);
        }
    }

    #[test]
    fn test_html_to_text_decodes_entities() {
        let doc = html_to_text("<p>caf&#233; &#x41; &lt;b&gt; a &amp; b</p>").unwrap();
        assert_eq!(doc.body, "café A <b> a & b");
        assert_eq!(doc.title, None);
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("Markets rose 2.5 percent. Why? Nobody knows! Tail");
        assert_eq!(
            sentences,
            vec!["Markets rose 2.5 percent.", "Why?", "Nobody knows!", "Tail"]
        );
    }

    #[test]
    fn test_split_sentences_keeps_abbreviations() {
        assert_eq!(
            split_sentences("The U.S. economy grew 3% in 2024. Markets rose."),
            vec!["The U.S. economy grew 3% in 2024.", "Markets rose."]
        );
    }

    #[test]
    fn test_remove_urls() {
        assert_eq!(
            remove_urls("Read more at https://example.com/x or www.example.com today"),
            "Read more at or today"
        );
    }

    #[test]
    fn test_spell_small_numbers() {
        assert_eq!(
            spell_small_numbers("In 2024 there were 3 votes, 40 seats and 45 delegates.", "en"),
            "In 2024 there were three votes, forty seats and 45 delegates."
        );
        assert_eq!(spell_small_numbers("2.5 percent, 3% more", "en"), "2.5 percent, 3% more");
        assert_eq!(
            spell_small_numbers("Hubo 22 votos en 1999.", "es"),
            "Hubo veintidós votos en 1999."
        );
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("one two three", 9), "one two");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
