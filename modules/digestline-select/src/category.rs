//! Keyword/alias category grouping and out-of-domain filtering.

use std::collections::HashSet;

use regex::Regex;
use tracing::{debug, info, warn};

use digestline_common::config::{CategorySpec, ExclusionConfig};
use digestline_common::{CategoryGroup, RawItem, OTHER_CATEGORY};

/// A compiled match term. `label` indexes the owning category (or keyword).
struct Term {
    label: usize,
    regex: Regex,
}

/// Case-insensitive pattern for one term. ASCII terms are word-bounded;
/// `\b` means nothing inside CJK runs, so other scripts match as substrings.
fn compile_term(term: &str) -> Option<Regex> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    let escaped = regex::escape(term);
    let pattern = if term.is_ascii() {
        format!(r"(?i)\b{escaped}\b")
    } else {
        format!("(?i){escaped}")
    };
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(term, error = %e, "Skipping uncompilable match term");
            None
        }
    }
}

/// Label of the term matching earliest in `text`.
fn earliest_match(terms: &[Term], text: &str) -> Option<usize> {
    terms
        .iter()
        .filter_map(|t| t.regex.find(text).map(|m| (m.start(), t.label)))
        .min()
        .map(|(_, label)| label)
}

fn distinct_hits(terms: &[Term], text: &str) -> usize {
    terms
        .iter()
        .filter(|t| t.regex.is_match(text))
        .map(|t| t.label)
        .collect::<HashSet<_>>()
        .len()
}

fn full_text(item: &RawItem) -> String {
    match item.title.as_deref() {
        Some(title) => format!("{title}\n{}", item.content),
        None => item.content.clone(),
    }
}

// --- Catalog ---

/// Canonical category names with their aliases, compiled once per run.
pub struct CategoryCatalog {
    names: Vec<String>,
    terms: Vec<Term>,
}

impl CategoryCatalog {
    pub fn new(specs: &[CategorySpec]) -> Self {
        let mut names = Vec::with_capacity(specs.len());
        let mut terms = Vec::new();
        for (label, spec) in specs.iter().enumerate() {
            names.push(spec.name.clone());
            for term in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
                if let Some(regex) = compile_term(term) {
                    terms.push(Term { label, regex });
                }
            }
        }
        Self { names, terms }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Canonical name for a category hint, if the hint names a known
    /// category or one of its aliases.
    pub fn resolve_hint(&self, hint: &str) -> Option<&str> {
        let hint = hint.trim();
        if hint.is_empty() {
            return None;
        }
        self.terms
            .iter()
            .find(|t| {
                t.regex
                    .find(hint)
                    .is_some_and(|m| m.start() == 0 && m.end() == hint.len())
            })
            .map(|t| self.names[t.label].as_str())
    }

    /// Category for one item: hint, then title, then body, then "Other".
    pub fn classify<'a>(&'a self, item: &RawItem) -> &'a str {
        if let Some(name) = item.category_hint.as_deref().and_then(|h| self.resolve_hint(h)) {
            return name;
        }
        if let Some(label) = item
            .title
            .as_deref()
            .and_then(|title| earliest_match(&self.terms, title))
        {
            return &self.names[label];
        }
        if let Some(label) = earliest_match(&self.terms, &item.content) {
            return &self.names[label];
        }
        OTHER_CATEGORY
    }

    /// Number of distinct catalog categories mentioned anywhere in the item.
    pub fn domain_hits(&self, item: &RawItem) -> usize {
        distinct_hits(&self.terms, &full_text(item))
    }

    /// Partition items into groups, in order of first appearance.
    pub fn group(&self, items: Vec<RawItem>) -> Vec<CategoryGroup> {
        let mut groups: Vec<CategoryGroup> = Vec::new();
        for item in items {
            let name = self.classify(&item);
            match groups.iter_mut().find(|g| g.name == name) {
                Some(group) => group.items.push(item),
                None => {
                    let mut group = CategoryGroup::new(name);
                    group.items.push(item);
                    groups.push(group);
                }
            }
        }
        info!(
            groups = groups.len(),
            other = groups
                .iter()
                .find(|g| g.is_other())
                .map(|g| g.items.len())
                .unwrap_or(0),
            "Grouped raw items by category"
        );
        groups
    }
}

// --- Domain filter ---

/// Drops items dominated by another domain's vocabulary before grouping.
///
/// An item is excluded when it hits at least `min_hits` distinct excluded
/// keywords and those hits outnumber its in-domain catalog hits. A single
/// keyword never excludes on its own.
pub struct DomainFilter {
    terms: Vec<Term>,
    min_hits: usize,
}

impl DomainFilter {
    pub fn new(config: &ExclusionConfig) -> Self {
        let terms = config
            .keywords
            .iter()
            .enumerate()
            .filter_map(|(label, kw)| compile_term(kw).map(|regex| Term { label, regex }))
            .collect();
        Self {
            terms,
            min_hits: config.min_hits.max(2),
        }
    }

    pub fn excluded_hits(&self, item: &RawItem) -> usize {
        distinct_hits(&self.terms, &full_text(item))
    }

    pub fn is_excluded(&self, item: &RawItem, catalog: &CategoryCatalog) -> bool {
        let hits = self.excluded_hits(item);
        hits >= self.min_hits && hits > catalog.domain_hits(item)
    }

    /// Split items into `(kept, excluded)`.
    pub fn apply(
        &self,
        items: Vec<RawItem>,
        catalog: &CategoryCatalog,
    ) -> (Vec<RawItem>, Vec<RawItem>) {
        let (excluded, kept): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| self.is_excluded(item, catalog));
        for item in &excluded {
            debug!(id = %item.id, headline = item.headline(), "Excluded out-of-domain item");
        }
        if !excluded.is_empty() {
            info!(excluded = excluded.len(), kept = kept.len(), "Domain filter applied");
        }
        (kept, excluded)
    }
}
