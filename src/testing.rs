//! Document fixtures for tests and benchmarks.
//!
//! [`passing_body`] produces a deterministic body that clears the default
//! quality gate for every page type. Different seeds draw from disjoint
//! vocabularies (seeds repeat after 25), so fixtures with distinct seeds are
//! neither exact nor near duplicates of each other.

use crate::types::{Document, Faq, PageType, Source, TopicKey};

const SYLLABLES: [&str; 10] = ["ba", "ko", "ri", "mu", "te", "lo", "sa", "vi", "ne", "du"];

const SENTENCE_LENGTHS: [usize; 7] = [5, 12, 8, 18, 10, 22, 7];

const OPENERS: [&str; 5] = ["Cast", "Tie", "Bring", "Watch", "Rig"];

const WORDS_PER_SEED: usize = 400;
const PARAGRAPHS: usize = 14;
const SENTENCES_PER_PARAGRAPH: usize = 6;

/// Opening paragraph with the early call to action.
pub const INTRO: &str = "Book a guided charter with a local captain to learn these waters fast.";

/// Neutral regulatory reminder.
pub const DISCLAIMER: &str = "Always check current regulations with your state wildlife agency before every trip, since rules can change.";

/// Closing paragraph with the late call to action.
pub const CLOSING: &str = "Plan your trip early and come back to this guide before you go.";

fn pseudo_word(n: usize) -> String {
    let n = n % 10_000;
    [n / 1000, n / 100, n / 10, n]
        .iter()
        .map(|d| SYLLABLES[d % 10])
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Body of roughly a thousand words that passes the default gate.
pub fn passing_body(seed: usize) -> String {
    let base = seed * WORDS_PER_SEED;
    let mut counter = 0usize;
    let mut next_word = || {
        let word = pseudo_word(base + counter % WORDS_PER_SEED);
        counter += 1;
        word
    };

    let mut paragraphs = vec![INTRO.to_string()];
    let mut sentence_index = 0usize;
    for p in 0..PARAGRAPHS {
        let mut sentences = Vec::with_capacity(SENTENCES_PER_PARAGRAPH);
        for s in 0..SENTENCES_PER_PARAGRAPH {
            let len = SENTENCE_LENGTHS[sentence_index % SENTENCE_LENGTHS.len()];
            sentence_index += 1;

            let mut words = Vec::with_capacity(len);
            if s == 0 && p % 3 == 0 {
                words.push(OPENERS[(p / 3) % OPENERS.len()].to_string());
            } else {
                words.push(capitalize(&next_word()));
            }
            while words.len() < len {
                words.push(next_word());
            }
            sentences.push(format!("{}.", words.join(" ")));
        }
        paragraphs.push(sentences.join(" "));
    }
    paragraphs.push(DISCLAIMER.to_string());
    paragraphs.push(CLOSING.to_string());

    let mut body = paragraphs.join("\n\n");
    body.push('\n');
    body
}

fn title_case(slug: &str) -> String {
    slug.split('-')
        .filter(|part| !part.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Complete document with a passing body and no advisory warnings.
pub fn sample_document(page_type: PageType, slug: &str, seed: usize) -> Document {
    let name = title_case(slug);
    let mut doc = Document::new(
        slug,
        slug,
        page_type,
        format!("{name} Field Guide"),
        passing_body(seed),
    )
    .with_topic_key(TopicKey::derive(page_type, &[slug]));

    doc.description = format!("Where, when and how to approach {name}.");
    doc.sources = vec![Source {
        title: "State wildlife agency".to_string(),
        url: "https://wildlife.example.gov/saltwater".to_string(),
    }];
    doc.faqs = ["When", "Where", "How"]
        .iter()
        .map(|q| Faq {
            question: format!("{q} should I go?"),
            answer: "Early mornings on a moving tide are a good start.".to_string(),
        })
        .collect();
    doc.keywords = vec![slug.to_string(), format!("{slug} guide")];
    doc.tags = vec![page_type.as_str().to_string()];
    if page_type == PageType::Location {
        doc.state = Some("Texas".to_string());
        doc.city = Some(name);
    }
    doc
}
