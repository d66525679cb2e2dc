//! Descriptive vocabulary for clusters: top terms, shared tags, majority
//! folder and file-type category. Stopwords never survive into any output.

use crate::models::FileMetadata;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

pub const TOP_TERMS_LIMIT: usize = 5;
pub const COMMON_TAGS_LIMIT: usize = 5;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "before", "being", "between", "both", "but", "by", "can", "could", "did",
    "do", "does", "doing", "down", "during", "each", "few", "for", "from", "further", "had",
    "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in",
    "into", "is", "it", "its", "itself", "just", "me", "more", "most", "my", "no", "nor", "not",
    "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "out", "over", "own",
    "same", "she", "should", "so", "some", "such", "than", "that", "the", "their", "theirs",
    "them", "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "until", "up", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "would", "you", "your", "yours",
    // filler common in file names and generated summaries
    "copy", "doc", "docs", "document", "documents", "draft", "file", "files", "final", "misc",
    "new", "old", "untitled", "various", "version", "contains", "related", "image", "img",
];

pub fn is_stopword(term: &str) -> bool {
    STOPWORDS.contains(&term)
}

/// Lowercased tokens worth keeping: two or more chars, not purely numeric, not a stopword.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| keep_term(t))
}

fn keep_term(term: &str) -> bool {
    term.chars().count() >= 2
        && !term.chars().all(|c| c.is_ascii_digit())
        && !is_stopword(term)
}

fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim().to_lowercase();
    keep_term(&tag).then_some(tag)
}

fn name_stem(meta: &FileMetadata) -> Option<String> {
    let name = meta.resolved_name()?;
    Some(
        Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(name),
    )
}

fn member_terms(meta: &FileMetadata) -> HashSet<String> {
    let mut terms = HashSet::new();
    let sources = [
        name_stem(meta),
        meta.subject.clone(),
        meta.summary.clone(),
        meta.category.clone(),
    ];
    for text in sources.iter().flatten() {
        terms.extend(tokenize(text));
    }
    for tag in &meta.tags {
        terms.extend(tokenize(tag));
    }
    terms
}

/// Highest count first, then alphabetical.
fn ranked(counts: HashMap<String, usize>, min_count: usize, limit: usize) -> Vec<String> {
    let mut entries: Vec<(String, usize)> =
        counts.into_iter().filter(|(_, c)| *c >= min_count).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.into_iter().take(limit).map(|(t, _)| t).collect()
}

/// Most frequent vocabulary across members, counting each member once per term.
pub fn top_terms<'a>(members: impl IntoIterator<Item = &'a FileMetadata>, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for meta in members {
        for term in member_terms(meta) {
            *counts.entry(term).or_default() += 1;
        }
    }
    ranked(counts, 1, limit)
}

/// Tags shared by at least two members (any tag, for a single-member cluster).
pub fn common_tags<'a>(members: impl IntoIterator<Item = &'a FileMetadata>, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;
    for meta in members {
        total += 1;
        let unique: HashSet<String> = meta.tags.iter().filter_map(|t| normalize_tag(t)).collect();
        for tag in unique {
            *counts.entry(tag).or_default() += 1;
        }
    }
    let min_count = if total <= 1 { 1 } else { 2 };
    ranked(counts, min_count, limit)
}

/// Overlap between two clusters' descriptors, minus stopwords, sorted.
pub fn shared_terms(
    a_terms: &[String],
    a_tags: &[String],
    b_terms: &[String],
    b_tags: &[String],
) -> Vec<String> {
    let a: BTreeSet<&str> = a_terms.iter().chain(a_tags).map(String::as_str).collect();
    let b: HashSet<&str> = b_terms.iter().chain(b_tags).map(String::as_str).collect();
    a.into_iter()
        .filter(|t| b.contains(t) && keep_term(t))
        .map(str::to_string)
        .collect()
}

/// Most common value; ties resolve to the smallest value.
fn majority(values: impl IntoIterator<Item = String>) -> Option<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    let mut best: Option<(String, usize)> = None;
    for (value, count) in counts {
        if best.as_ref().map_or(true, |(_, c)| count > *c) {
            best = Some((value, count));
        }
    }
    best.map(|(v, _)| v)
}

pub fn dominant_folder<'a>(members: impl IntoIterator<Item = &'a FileMetadata>) -> Option<String> {
    majority(members.into_iter().filter_map(FileMetadata::parent_folder))
}

pub fn dominant_category<'a>(members: impl IntoIterator<Item = &'a FileMetadata>) -> Option<String> {
    majority(members.into_iter().map(file_category))
}

/// Stored category, or one derived from the file extension.
pub fn file_category(meta: &FileMetadata) -> String {
    if let Some(category) = meta.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        return category.to_string();
    }
    let ext = meta.extension().unwrap_or_default();
    let label = match ext.as_str() {
        "pdf" => "document/pdf",
        "doc" | "docx" | "ppt" | "pptx" | "xls" | "xlsx" | "odt" | "ods" => "document/office",
        "jpg" | "jpeg" | "png" | "gif" | "heic" | "webp" | "bmp" | "tiff" => "image",
        "txt" | "md" | "rtf" | "csv" | "log" => "text",
        "zip" | "rar" | "7z" | "tar" | "gz" => "archive",
        "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "h" | "json" | "toml"
        | "yaml" | "yml" => "code",
        _ => "other",
    };
    label.to_string()
}
