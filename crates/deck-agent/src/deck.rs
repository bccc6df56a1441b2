//! Slide decks: extraction from model output, linting and export.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static SLIDES_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    // A missing closing marker means the output was cut off, the slides
    // before the cut are still usable.
    Regex::new(r"(?is)<Slides>(.*?)(?:</Slides>|\z)")
        .expect("the slides pattern is valid")
});

/// One slide of a deck.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    /// Identifier of the slide, such as `slide_1`.
    pub id: String,
    /// Title of the slide.
    pub title: String,
    /// A complete HTML document rendering the slide.
    pub html: String,
}

/// Slides in presentation order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Deck {
    slides: Vec<Slide>,
}

/// The error type for [`extract_deck`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeckError {
    /// The text holds no slides block.
    #[error("no slides found in the response")]
    NotFound,
    /// The slides block holds no complete slide.
    #[error("the slides block is malformed: {0}")]
    Malformed(String),
}

/// A problem found by [`Deck::lint`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LintWarning {
    /// Two or more slides share an id.
    DuplicateId {
        /// 0-based index of the later slide.
        index: usize,
        /// The shared id.
        id: String,
    },
    /// A slide has no markup.
    EmptyHtml {
        /// 0-based index of the slide.
        index: usize,
    },
    /// A slide's markup is not a full HTML document.
    NotHtmlDocument {
        /// 0-based index of the slide.
        index: usize,
    },
}

impl Display for LintWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LintWarning::DuplicateId { index, id } => {
                write!(f, "slide {} reuses the id {id:?}", index + 1)
            }
            LintWarning::EmptyHtml { index } => {
                write!(f, "slide {} has no markup", index + 1)
            }
            LintWarning::NotHtmlDocument { index } => {
                write!(f, "slide {} is not a full HTML document", index + 1)
            }
        }
    }
}

impl Deck {
    /// Creates a deck from slides in presentation order.
    #[inline]
    pub fn new(slides: Vec<Slide>) -> Self {
        Self { slides }
    }

    /// Returns the slides.
    #[inline]
    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    /// Returns the number of slides.
    #[inline]
    pub fn len(&self) -> usize {
        self.slides.len()
    }

    /// Returns `true` if the deck has no slides.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    /// Reports problems a viewer may trip on. The deck stays usable as is.
    pub fn lint(&self) -> Vec<LintWarning> {
        let mut warnings = vec![];
        let mut seen_ids = HashSet::new();
        for (index, slide) in self.slides.iter().enumerate() {
            if !seen_ids.insert(slide.id.as_str()) {
                warnings.push(LintWarning::DuplicateId {
                    index,
                    id: slide.id.clone(),
                });
            }
            if slide.html.trim().is_empty() {
                warnings.push(LintWarning::EmptyHtml { index });
            } else if !slide.html.to_ascii_lowercase().contains("<html") {
                warnings.push(LintWarning::NotHtmlDocument { index });
            }
        }
        warnings
    }

    /// Writes the deck into `dir` and returns the path of the preview page.
    ///
    /// The directory receives `deck.json`, one HTML file per slide and an
    /// `index.html` that shows every slide in order.
    pub async fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(dir.join("deck.json"), json).await?;

        let file_names = self.slide_file_names();
        for (slide, file_name) in self.slides.iter().zip(&file_names) {
            tokio::fs::write(dir.join(file_name), &slide.html).await?;
        }

        let index_path = dir.join("index.html");
        tokio::fs::write(&index_path, self.index_page(&file_names)).await?;
        debug!("wrote {} slides to {}", self.len(), dir.display());
        Ok(index_path)
    }

    fn slide_file_names(&self) -> Vec<String> {
        // `index` and `deck` are taken by the other files.
        let mut used: HashSet<String> =
            ["index", "deck"].into_iter().map(String::from).collect();
        self.slides
            .iter()
            .enumerate()
            .map(|(index, slide)| {
                let mut stem = file_stem(&slide.id);
                if stem.is_empty() {
                    stem = format!("slide_{}", index + 1);
                }
                let mut candidate = stem.clone();
                let mut suffix = index + 1;
                while !used.insert(candidate.clone()) {
                    candidate = format!("{stem}_{suffix}");
                    suffix += 1;
                }
                format!("{candidate}.html")
            })
            .collect()
    }

    fn index_page(&self, file_names: &[String]) -> String {
        let total = self.len();
        let mut sections = String::new();
        for (index, (slide, file_name)) in
            self.slides.iter().zip(file_names).enumerate()
        {
            sections.push_str(&format!(
                r#"  <section>
    <h2>{number} / {total} · {title}</h2>
    <iframe src="{file_name}" title="{title}" width="1280" height="720" loading="lazy"></iframe>
  </section>
"#,
                number = index + 1,
                title = escape_html(&slide.title),
                file_name = escape_html(file_name),
            ));
        }
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <style>
    body {{ margin: 0; padding: 24px; background: #111827; color: #e5e7eb; font-family: system-ui, sans-serif; }}
    section {{ margin: 0 auto 32px; width: 1280px; }}
    h2 {{ font-size: 16px; font-weight: 500; }}
    iframe {{ border: 0; border-radius: 8px; background: #fff; }}
  </style>
</head>
<body>
{sections}</body>
</html>
"#,
            title = escape_html(
                self.slides.first().map_or("Slides", |s| s.title.as_str())
            ),
        )
    }
}

/// Extracts the deck from a presentation agent's answer.
///
/// The slides are expected as a JSON array between `<Slides>` and
/// `</Slides>` (markers are case-insensitive). If the array does not parse,
/// every complete slide object in it is kept in order, which recovers
/// decks cut off by an output limit. Without markers, the text is accepted
/// when it is itself an array of slides.
pub fn extract_deck(text: &str) -> Result<Deck, DeckError> {
    if let Some(captures) = SLIDES_BLOCK.captures(text) {
        let body = strip_code_fence(captures.get(1).map_or("", |m| m.as_str()));
        return match serde_json::from_str::<Vec<Slide>>(body) {
            Ok(slides) if !slides.is_empty() => Ok(Deck::new(slides)),
            Ok(_) => Err(DeckError::Malformed("the slide list is empty".into())),
            Err(err) => {
                let slides = salvage_slides(body);
                if slides.is_empty() {
                    return Err(DeckError::Malformed(err.to_string()));
                }
                warn!(
                    "slides block is malformed ({err}), kept {} complete slides",
                    slides.len()
                );
                Ok(Deck::new(slides))
            }
        };
    }

    match serde_json::from_str::<Vec<Slide>>(strip_code_fence(text)) {
        Ok(slides) if slides.first().is_some_and(|s| !s.html.is_empty()) => {
            Ok(Deck::new(slides))
        }
        _ => Err(DeckError::NotFound),
    }
}

/// Collects every complete slide object in `body`, in order.
fn salvage_slides(body: &str) -> Vec<Slide> {
    let mut slides = vec![];
    let mut pos = 0;
    while let Some(offset) = body[pos..].find('{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&body[start..])
            .into_iter::<Slide>();
        match stream.next() {
            Some(Ok(slide)) => {
                slides.push(slide);
                pos = start + stream.byte_offset();
            }
            // Braces inside strings land here too, they never parse as a
            // slide on their own since quotes in strings are escaped.
            _ => pos = start + 1,
        }
    }
    slides
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip the info string, such as `json`.
    let rest = rest.split_once('\n').map_or("", |(_, rest)| rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Turns free text into a lowercase, file-safe name such as
/// `photosynthesis-for-grade-5`.
pub fn topic_slug(topic: &str) -> String {
    let mut slug = String::new();
    for ch in topic.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= 64 {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "deck".to_owned()
    } else {
        slug.to_owned()
    }
}

fn file_stem(id: &str) -> String {
    id.trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn slide(id: &str, title: &str) -> Slide {
        Slide {
            id: id.to_owned(),
            title: title.to_owned(),
            html: format!("<!DOCTYPE html><html><body>{title}</body></html>"),
        }
    }

    fn slides_json(slides: &[Slide]) -> String {
        serde_json::to_string_pretty(slides).unwrap()
    }

    #[test]
    fn test_extract_between_markers() {
        let slides = [slide("slide_1", "Intro"), slide("slide_2", "Cells")];
        let text = format!(
            "Here is your deck.\n<slides>\n{}\n</SLIDES>\nEnjoy!",
            slides_json(&slides)
        );
        let deck = extract_deck(&text).unwrap();
        assert_eq!(deck.slides(), slides);
    }

    #[test]
    fn test_extract_fenced_block() {
        let slides = [slide("slide_1", "Intro")];
        let text =
            format!("<Slides>\n```json\n{}\n```\n</Slides>", slides_json(&slides));
        assert_eq!(extract_deck(&text).unwrap().slides(), slides);
    }

    #[test]
    fn test_salvage_truncated_block() {
        let complete = slides_json(&[slide("slide_1", "Intro")]);
        let complete = complete.trim_end().trim_end_matches(']');
        let text = format!(
            "<Slides>{complete}, {{\"id\": \"slide_2\", \"title\": \"Cut\", \
             \"html\": \"<html><style>body {{ color: red"
        );
        let deck = extract_deck(&text).unwrap();
        assert_eq!(deck.len(), 1);
        assert_eq!(deck.slides()[0].title, "Intro");
    }

    #[test]
    fn test_salvage_skips_incomplete_objects() {
        let text = r#"<Slides>[
            {"id": "slide_1", "title": "A", "html": "<html>{a}</html>"},
            {"id": "slide_2", "title": "B"},
            {"id": "slide_3", "title": "C", "html": "<html></html>"},
        ]</Slides>"#;
        let deck = extract_deck(text).unwrap();
        let ids: Vec<_> = deck.slides().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["slide_1", "slide_3"]);
    }

    #[test]
    fn test_bare_json_array() {
        let slides = [slide("s1", "Only")];
        let deck = extract_deck(&slides_json(&slides)).unwrap();
        assert_eq!(deck.slides(), slides);
    }

    #[test]
    fn test_not_found_and_malformed() {
        assert_eq!(
            extract_deck("I have completed my research."),
            Err(DeckError::NotFound)
        );
        let no_html = json!([{ "id": "a", "title": "b", "html": "" }]);
        assert_eq!(
            extract_deck(&no_html.to_string()),
            Err(DeckError::NotFound)
        );
        assert!(matches!(
            extract_deck("<Slides>not json</Slides>"),
            Err(DeckError::Malformed(_))
        ));
        assert!(matches!(
            extract_deck("<Slides>[]</Slides>"),
            Err(DeckError::Malformed(_))
        ));
    }

    #[test]
    fn test_lint() {
        let mut bare = slide("slide_1", "Again");
        bare.html = "<div>no document</div>".to_owned();
        let mut empty = slide("slide_3", "Empty");
        empty.html = "  ".to_owned();
        let deck = Deck::new(vec![slide("slide_1", "Intro"), bare, empty]);
        assert_eq!(
            deck.lint(),
            [
                LintWarning::DuplicateId {
                    index: 1,
                    id: "slide_1".to_owned()
                },
                LintWarning::NotHtmlDocument { index: 1 },
                LintWarning::EmptyHtml { index: 2 },
            ]
        );
        assert_eq!(
            deck.lint()[0].to_string(),
            "slide 2 reuses the id \"slide_1\""
        );
    }

    #[test]
    fn test_topic_slug() {
        assert_eq!(topic_slug("Photosynthesis for Grade 5!"), "photosynthesis-for-grade-5");
        assert_eq!(topic_slug("  Ünïcode & stuff "), "n-code-stuff");
        assert_eq!(topic_slug("???"), "deck");
    }

    #[tokio::test]
    async fn test_write_to() {
        let dir = tempfile::tempdir().unwrap();
        let mut odd = slide("../index", "<Odd> & \"quoted\"");
        odd.html = "<html>odd</html>".to_owned();
        let deck = Deck::new(vec![
            slide("slide_1", "Intro"),
            slide("slide_1", "Twin"),
            odd,
        ]);

        let index_path = deck.write_to(dir.path()).await.unwrap();
        assert_eq!(index_path, dir.path().join("index.html"));

        let saved: Deck = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("deck.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(saved, deck);

        assert!(dir.path().join("slide_1.html").exists());
        assert!(dir.path().join("slide_1_2.html").exists());
        let odd_html =
            std::fs::read_to_string(dir.path().join("___index.html")).unwrap();
        assert_eq!(odd_html, "<html>odd</html>");

        let index = std::fs::read_to_string(&index_path).unwrap();
        assert!(index.contains(r#"src="slide_1_2.html""#));
        assert!(index.contains("3 / 3 · &lt;Odd&gt; &amp; &quot;quoted&quot;"));
    }

    #[test]
    fn test_file_names_never_collide() {
        let deck = Deck::new(vec![
            slide("b", "First"),
            slide("b_3", "Second"),
            slide("b", "Third"),
            slide("index", "Fourth"),
            slide("", "Fifth"),
        ]);
        let names = deck.slide_file_names();
        assert_eq!(
            names,
            ["b.html", "b_3.html", "b_4.html", "index_4.html", "slide_5.html"]
        );
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
