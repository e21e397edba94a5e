//! Canonical paper index: unified deduplication across API and SERP
//! sources.
//!
//! Every record — whether it arrived from an academic API or as an opaque
//! SERP hit — resolves to a canonical ID. One [`CanonicalEntry`] exists per
//! canonical ID; merging is lossless (counts take the MAX, populated fields
//! are never clobbered) and keeps the highest-priority provider's record.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use crate::ids::{md5_hex, IdentifierExtractor, PaperIdentifier};
use crate::models::{Paper, SerpResult};

/// Where an entry's evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    Api,
    Serp,
    Both,
}

impl EntrySource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::Api => "api",
            EntrySource::Serp => "serp",
            EntrySource::Both => "both",
        }
    }
}

/// One deduplicated paper: the best API record seen so far plus every SERP
/// result that resolved to the same identity.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEntry {
    pub canonical_id: String,
    pub paper: Option<Paper>,
    pub serp_results: Vec<SerpResult>,
    pub source: EntrySource,
    pub best_url: Option<String>,
}

impl CanonicalEntry {
    fn refresh(&mut self) {
        self.source = match (&self.paper, self.serp_results.is_empty()) {
            (Some(_), false) => EntrySource::Both,
            (Some(_), true) => EntrySource::Api,
            (None, _) => EntrySource::Serp,
        };
        self.best_url = self.compute_best_url();
    }

    /// Prefer the DOI URL for DOI identities, then the provider page for
    /// provider identities, then whatever URL evidence exists.
    fn compute_best_url(&self) -> Option<String> {
        let cid = &self.canonical_id;
        if let Some(doi) = cid.strip_prefix("doi:") {
            return Some(format!("https://doi.org/{doi}"));
        }
        if let Some(work_id) = cid.strip_prefix("openalex:") {
            return Some(format!("https://openalex.org/{work_id}"));
        }
        if let Some(arxiv_id) = cid.strip_prefix("arxiv:") {
            return Some(format!("https://arxiv.org/abs/{arxiv_id}"));
        }
        if let Some(pmid) = cid.strip_prefix("pmid:") {
            return Some(format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"));
        }
        if let Some(pmcid) = cid.strip_prefix("pmcid:") {
            return Some(format!("https://pmc.ncbi.nlm.nih.gov/articles/PMC{pmcid}/"));
        }
        if let Some(hash) = cid.strip_prefix("s2:") {
            return Some(format!("https://www.semanticscholar.org/paper/{hash}"));
        }
        self.serp_results
            .first()
            .map(|s| s.url.clone())
            .or_else(|| self.paper.as_ref().and_then(|p| p.oa_url.clone()))
    }
}

/// API priority for keeping the best record when one paper arrives from
/// several providers (lower wins).
pub(crate) fn provider_priority(source_api: &str) -> u8 {
    match source_api {
        "semantic_scholar" => 1,
        "openalex" => 2,
        "crossref" => 3,
        "arxiv" => 4,
        "unpaywall" => 5,
        _ => 99,
    }
}

/// Resolves a paper's canonical identity from its bibliographic fields.
pub struct PaperIdentityResolver {
    similarity_threshold: f64,
    title_index: HashMap<String, String>,
    punctuation: Regex,
    articles: Regex,
    whitespace: Regex,
}

impl PaperIdentityResolver {
    #[must_use]
    pub fn new(similarity_threshold: f64) -> Self {
        let compile = |pattern: &str| {
            Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
        };
        Self {
            similarity_threshold,
            title_index: HashMap::new(),
            punctuation: compile(r"[^\w\s]"),
            articles: compile(r"\b(the|a|an)\b"),
            whitespace: compile(r"\s+"),
        }
    }

    /// Canonical identity ladder: DOI, then the metadata composite
    /// (title | first-author surname | year), then title similarity
    /// against everything seen so far, then a fresh title hash, then a
    /// unique fallback.
    pub fn resolve_identity(&mut self, paper: &Paper) -> String {
        if let Some(doi) = &paper.doi {
            return format!("doi:{}", doi.trim().to_lowercase());
        }

        let normalized_title = self.normalize_title(&paper.title);
        let first_author = Self::first_author_surname(&paper.authors);

        if !normalized_title.is_empty() {
            if let (Some(surname), Some(year)) = (&first_author, paper.year) {
                let key = format!("{normalized_title}|{surname}|{year}");
                return format!("meta:{}", &md5_hex(&key)[..12]);
            }

            if let Some(existing) = self.find_similar_title(&normalized_title) {
                return existing;
            }

            let new_id = format!("title:{}", &md5_hex(&normalized_title)[..12]);
            self.title_index.insert(normalized_title, new_id.clone());
            return new_id;
        }

        format!("unknown:{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
    }

    /// Lowercase, strip punctuation, drop leading articles, collapse
    /// whitespace.
    #[must_use]
    pub fn normalize_title(&self, title: &str) -> String {
        let lowered = title.to_lowercase();
        let no_punct = self.punctuation.replace_all(&lowered, " ");
        let no_articles = self.articles.replace_all(&no_punct, "");
        self.whitespace
            .replace_all(no_articles.trim(), " ")
            .into_owned()
    }

    /// `"Last, First"` takes the part before the comma; `"First Last"`
    /// takes the last whitespace token; a single token is used as-is.
    #[must_use]
    pub fn first_author_surname(authors: &[crate::models::Author]) -> Option<String> {
        let name = authors.first().map(|a| a.name.as_str())?;
        let surname = if let Some((last, _)) = name.split_once(',') {
            last.trim().to_string()
        } else {
            name.split_whitespace().last().unwrap_or("").to_string()
        };
        if surname.is_empty() {
            None
        } else {
            Some(surname.to_lowercase())
        }
    }

    /// Jaccard similarity over whitespace tokens against the title index.
    fn find_similar_title(&self, normalized_title: &str) -> Option<String> {
        Self::scan_similar(&self.title_index, normalized_title, self.similarity_threshold)
    }

    fn scan_similar(
        title_index: &HashMap<String, String>,
        normalized_title: &str,
        threshold: f64,
    ) -> Option<String> {
        let target: std::collections::HashSet<&str> =
            normalized_title.split_whitespace().collect();
        for (existing_title, canonical_id) in title_index {
            let existing: std::collections::HashSet<&str> =
                existing_title.split_whitespace().collect();
            let intersection = target.intersection(&existing).count();
            let union = target.union(&existing).count();
            if union > 0 && intersection as f64 / union as f64 >= threshold {
                return Some(canonical_id.clone());
            }
        }
        None
    }

    fn clear(&mut self) {
        self.title_index.clear();
    }
}

/// Unified deduplication index.
pub struct CanonicalPaperIndex {
    index: HashMap<String, CanonicalEntry>,
    resolver: PaperIdentityResolver,
    extractor: IdentifierExtractor,
}

/// Dedup statistics by evidence source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub total: usize,
    pub api_only: usize,
    pub serp_only: usize,
    pub both: usize,
}

impl Default for CanonicalPaperIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl CanonicalPaperIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::with_threshold(0.9)
    }

    #[must_use]
    pub fn with_threshold(similarity_threshold: f64) -> Self {
        Self {
            index: HashMap::new(),
            resolver: PaperIdentityResolver::new(similarity_threshold),
            extractor: IdentifierExtractor::new(),
        }
    }

    /// Drop all entries and the title index.
    pub fn clear(&mut self) {
        self.index.clear();
        self.resolver.clear();
        debug!("canonical paper index cleared");
    }

    /// Register a paper from an academic API. Returns its canonical ID.
    pub fn register_paper(&mut self, paper: Paper, source_api: &str) -> String {
        let canonical_id = self.resolver.resolve_identity(&paper);
        self.merge_paper_into(canonical_id.clone(), paper, source_api);
        canonical_id
    }

    /// Register a SERP result, extracting its identifier when not
    /// supplied. Always appends the SERP record to the entry.
    pub fn register_serp_result(
        &mut self,
        serp_result: SerpResult,
        identifier: Option<&PaperIdentifier>,
    ) -> String {
        let canonical_id = match identifier {
            Some(ident) => ident.get_canonical_id(),
            None => self.extractor.extract(&serp_result.url).get_canonical_id(),
        };

        if let Some(entry) = self.index.get_mut(&canonical_id) {
            entry.serp_results.push(serp_result);
            entry.refresh();
            debug!(canonical_id = %canonical_id, "SERP result linked to existing entry");
        } else {
            let mut entry = CanonicalEntry {
                canonical_id: canonical_id.clone(),
                paper: None,
                serp_results: vec![serp_result],
                source: EntrySource::Serp,
                best_url: None,
            };
            entry.refresh();
            self.index.insert(canonical_id.clone(), entry);
            debug!(canonical_id = %canonical_id, "registered new SERP entry");
        }
        canonical_id
    }

    /// Attach an API paper to an entry originally registered from SERP
    /// evidence. If the paper's own identity differs, the entry is rekeyed
    /// (or folded into an existing target entry, transferring its SERP
    /// results). Entry count never increases.
    pub fn attach_paper_to_entry(
        &mut self,
        serp_canonical_id: &str,
        paper: Paper,
        source_api: &str,
    ) -> String {
        if !self.index.contains_key(serp_canonical_id) {
            debug!(
                serp_canonical_id,
                "attach target missing, registering paper independently"
            );
            return self.register_paper(paper, source_api);
        }

        let new_canonical_id = self.resolver.resolve_identity(&paper);
        if new_canonical_id == serp_canonical_id {
            self.merge_paper_into(new_canonical_id.clone(), paper, source_api);
            return new_canonical_id;
        }

        // Identity moved (typically onto a DOI). Fold the SERP entry into
        // the target, or rekey it when no target exists.
        let old_entry = match self.index.remove(serp_canonical_id) {
            Some(e) => e,
            None => {
                return self.register_paper(paper, source_api);
            }
        };

        if let Some(target) = self.index.get_mut(&new_canonical_id) {
            target.serp_results.extend(old_entry.serp_results);
            if let Some(old_paper) = old_entry.paper {
                let old_source = old_paper.source_api.clone();
                merge_into_entry(target, old_paper, &old_source);
            }
            target.refresh();
            debug!(
                from = serp_canonical_id,
                to = %new_canonical_id,
                "merged SERP entry into existing canonical entry"
            );
        } else {
            let mut entry = old_entry;
            entry.canonical_id = new_canonical_id.clone();
            entry.refresh();
            self.index.insert(new_canonical_id.clone(), entry);
            debug!(
                from = serp_canonical_id,
                to = %new_canonical_id,
                "rekeyed SERP entry to paper identity"
            );
        }

        self.merge_paper_into(new_canonical_id.clone(), paper, source_api);
        new_canonical_id
    }

    fn merge_paper_into(&mut self, canonical_id: String, paper: Paper, source_api: &str) {
        if let Some(entry) = self.index.get_mut(&canonical_id) {
            merge_into_entry(entry, paper, source_api);
            entry.refresh();
            debug!(canonical_id = %canonical_id, source_api, "merged paper into existing entry");
        } else {
            let mut entry = CanonicalEntry {
                canonical_id: canonical_id.clone(),
                paper: Some(paper),
                serp_results: Vec::new(),
                source: EntrySource::Api,
                best_url: None,
            };
            entry.refresh();
            self.index.insert(canonical_id.clone(), entry);
            debug!(canonical_id = %canonical_id, source_api, "registered new paper entry");
        }
    }

    /// Entry whose normalized title is Jaccard-similar to the given one.
    #[must_use]
    pub fn find_by_title_similarity(
        &self,
        normalized_title: &str,
        threshold: f64,
    ) -> Option<&CanonicalEntry> {
        let canonical_id = PaperIdentityResolver::scan_similar(
            &self.resolver.title_index,
            normalized_title,
            threshold,
        )?;
        self.index.get(&canonical_id)
    }

    #[must_use]
    pub fn get_entry(&self, canonical_id: &str) -> Option<&CanonicalEntry> {
        self.index.get(canonical_id)
    }

    #[must_use]
    pub fn get_all_entries(&self) -> Vec<&CanonicalEntry> {
        self.index.values().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn get_stats(&self) -> IndexStats {
        let mut stats = IndexStats {
            total: self.index.len(),
            ..IndexStats::default()
        };
        for entry in self.index.values() {
            match entry.source {
                EntrySource::Api => stats.api_only += 1,
                EntrySource::Serp => stats.serp_only += 1,
                EntrySource::Both => stats.both += 1,
            }
        }
        stats
    }
}

/// Merge `paper` into `entry`, keeping the higher-priority provider's
/// record and backfilling the winner from the loser.
fn merge_into_entry(entry: &mut CanonicalEntry, paper: Paper, source_api: &str) {
    match entry.paper.take() {
        None => entry.paper = Some(paper),
        Some(mut existing) => {
            let existing_priority = provider_priority(&existing.source_api);
            let new_priority = provider_priority(source_api);
            if new_priority < existing_priority {
                let mut winner = paper;
                winner.merge_from(&existing);
                entry.paper = Some(winner);
            } else {
                existing.merge_from(&paper);
                entry.paper = Some(existing);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Author;

    fn paper(id: &str, doi: Option<&str>, source_api: &str) -> Paper {
        let mut p = Paper::new(id, "Example", source_api);
        p.doi = doi.map(str::to_string);
        p
    }

    fn serp(url: &str) -> SerpResult {
        SerpResult {
            title: "Result".to_string(),
            url: url.to_string(),
            snippet: String::new(),
            engine: "debug".to_string(),
            rank: 1,
            date: None,
        }
    }

    #[test]
    fn doi_deduplicates_across_providers_keeping_priority_and_max_counts() {
        let mut index = CanonicalPaperIndex::new();

        let mut s2 = paper("s2:A", Some("10.1234/x"), "semantic_scholar");
        s2.citation_count = 100;
        let mut oa = paper("openalex:W1", Some("10.1234/x"), "openalex");
        oa.citation_count = 95;
        oa.venue = Some("PeerJ".to_string());

        let cid1 = index.register_paper(s2, "semantic_scholar");
        let cid2 = index.register_paper(oa, "openalex");

        assert_eq!(cid1, "doi:10.1234/x");
        assert_eq!(cid1, cid2);
        assert_eq!(index.len(), 1);

        let entry = index.get_entry("doi:10.1234/x").unwrap();
        let kept = entry.paper.as_ref().unwrap();
        assert_eq!(kept.source_api, "semantic_scholar");
        assert_eq!(kept.id, "s2:A");
        assert_eq!(kept.citation_count, 100);
        // Backfilled from the lower-priority record
        assert_eq!(kept.venue.as_deref(), Some("PeerJ"));
    }

    #[test]
    fn lower_priority_provider_first_is_replaced_but_backfilled() {
        let mut index = CanonicalPaperIndex::new();
        let mut oa = paper("openalex:W1", Some("10.1234/x"), "openalex");
        oa.abstract_text = Some("from openalex".to_string());
        index.register_paper(oa, "openalex");

        let s2 = paper("s2:A", Some("10.1234/x"), "semantic_scholar");
        index.register_paper(s2, "semantic_scholar");

        let entry = index.get_entry("doi:10.1234/x").unwrap();
        let kept = entry.paper.as_ref().unwrap();
        assert_eq!(kept.source_api, "semantic_scholar");
        assert_eq!(kept.abstract_text.as_deref(), Some("from openalex"));
    }

    #[test]
    fn doi_paper_always_yields_doi_canonical_id() {
        let mut index = CanonicalPaperIndex::new();
        let cid = index.register_paper(paper("s2:A", Some("10.1234/UPPER"), "semantic_scholar"), "semantic_scholar");
        assert!(cid.starts_with("doi:"));
        assert_eq!(cid, "doi:10.1234/upper");
    }

    #[test]
    fn entry_count_tracks_distinct_canonical_ids() {
        let mut index = CanonicalPaperIndex::new();
        let mut ids = std::collections::HashSet::new();
        ids.insert(index.register_paper(paper("s2:A", Some("10.1/a"), "semantic_scholar"), "semantic_scholar"));
        ids.insert(index.register_paper(paper("s2:B", Some("10.1/b"), "semantic_scholar"), "semantic_scholar"));
        ids.insert(index.register_paper(paper("openalex:W1", Some("10.1/a"), "openalex"), "openalex"));
        ids.insert(index.register_serp_result(serp("https://doi.org/10.1/b"), None));
        assert_eq!(index.len(), ids.len());
        assert!(index.len() <= 4);
    }

    #[test]
    fn serp_then_api_promotes_to_both() {
        let mut index = CanonicalPaperIndex::new();
        let cid = index.register_serp_result(serp("https://doi.org/10.1234/x"), None);
        assert_eq!(cid, "doi:10.1234/x");
        assert_eq!(index.get_entry(&cid).unwrap().source, EntrySource::Serp);

        index.register_paper(paper("s2:A", Some("10.1234/x"), "semantic_scholar"), "semantic_scholar");
        let entry = index.get_entry(&cid).unwrap();
        assert_eq!(entry.source, EntrySource::Both);
        assert_eq!(entry.serp_results.len(), 1);
    }

    #[test]
    fn attach_merges_serp_entry_into_doi_identity() {
        let mut index = CanonicalPaperIndex::new();
        let ident = PaperIdentifier {
            openalex_work_id: Some("W2741809807".to_string()),
            url: Some("https://openalex.org/W2741809807".to_string()),
            ..PaperIdentifier::default()
        };
        let serp_cid =
            index.register_serp_result(serp("https://openalex.org/W2741809807"), Some(&ident));
        assert_eq!(serp_cid, "openalex:W2741809807");

        let mut api_paper = paper("openalex:W2741809807", Some("10.7717/peerj.4375"), "openalex");
        api_paper.abstract_text = Some("Abstract".to_string());
        let merged = index.attach_paper_to_entry(&serp_cid, api_paper, "openalex");

        assert_eq!(merged, "doi:10.7717/peerj.4375");
        assert_eq!(index.len(), 1);
        let entry = index.get_entry(&merged).unwrap();
        assert_eq!(entry.source, EntrySource::Both);
        assert_eq!(entry.serp_results.len(), 1);
        assert_eq!(
            entry.best_url.as_deref(),
            Some("https://doi.org/10.7717/peerj.4375")
        );
    }

    #[test]
    fn attach_into_existing_target_transfers_serp_results() {
        let mut index = CanonicalPaperIndex::new();
        index.register_paper(paper("s2:A", Some("10.7717/peerj.4375"), "semantic_scholar"), "semantic_scholar");

        let ident = PaperIdentifier {
            openalex_work_id: Some("W2741809807".to_string()),
            ..PaperIdentifier::default()
        };
        let serp_cid =
            index.register_serp_result(serp("https://openalex.org/W2741809807"), Some(&ident));
        assert_eq!(index.len(), 2);

        let api_paper = paper("openalex:W2741809807", Some("10.7717/peerj.4375"), "openalex");
        let merged = index.attach_paper_to_entry(&serp_cid, api_paper, "openalex");

        assert_eq!(merged, "doi:10.7717/peerj.4375");
        assert_eq!(index.len(), 1);
        let entry = index.get_entry(&merged).unwrap();
        assert_eq!(entry.serp_results.len(), 1);
        assert_eq!(entry.paper.as_ref().unwrap().source_api, "semantic_scholar");
    }

    #[test]
    fn attach_to_missing_entry_registers_independently() {
        let mut index = CanonicalPaperIndex::new();
        let p = paper("openalex:W999", Some("10.9999/orphan"), "openalex");
        let merged = index.attach_paper_to_entry("openalex:W999", p, "openalex");
        assert_eq!(merged, "doi:10.9999/orphan");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn attach_without_doi_uses_meta_identity() {
        let mut index = CanonicalPaperIndex::new();
        let ident = PaperIdentifier {
            openalex_work_id: Some("W1".to_string()),
            ..PaperIdentifier::default()
        };
        let serp_cid = index.register_serp_result(serp("https://openalex.org/W1"), Some(&ident));

        let mut p = Paper::new("openalex:W1", "Some Title", "openalex");
        p.year = Some(2020);
        p.authors = vec![Author::new("Jane Doe")];
        let merged = index.attach_paper_to_entry(&serp_cid, p, "openalex");

        assert_eq!(index.len(), 1);
        assert!(merged.starts_with("meta:"));
        let entry = index.get_entry(&merged).unwrap();
        assert!(entry.paper.is_some());
        assert_eq!(entry.source, EntrySource::Both);
    }

    #[test]
    fn meta_identity_is_stable_across_name_formats() {
        let mut resolver = PaperIdentityResolver::new(0.9);
        let mut a = Paper::new("s2:A", "Deep Learning", "semantic_scholar");
        a.year = Some(2015);
        a.authors = vec![Author::new("Yann LeCun")];

        let mut b = Paper::new("openalex:W1", "Deep learning!", "openalex");
        b.year = Some(2015);
        b.authors = vec![Author::new("LeCun, Yann")];

        assert_eq!(resolver.resolve_identity(&a), resolver.resolve_identity(&b));
    }

    #[test]
    fn title_normalization_drops_articles_and_punctuation() {
        let resolver = PaperIdentityResolver::new(0.9);
        assert_eq!(
            resolver.normalize_title("The Origin of Species: a Review"),
            "origin of species review"
        );
    }

    #[test]
    fn surname_extraction_variants() {
        let one = |name: &str| {
            PaperIdentityResolver::first_author_surname(&[Author::new(name)])
        };
        assert_eq!(one("Smith, John").as_deref(), Some("smith"));
        assert_eq!(one("John Smith").as_deref(), Some("smith"));
        assert_eq!(one("Madonna").as_deref(), Some("madonna"));
        assert_eq!(one(""), None);
        assert_eq!(PaperIdentityResolver::first_author_surname(&[]), None);
    }

    #[test]
    fn similar_titles_collapse_to_one_identity() {
        let mut resolver = PaperIdentityResolver::new(0.9);
        let a = Paper::new("s2:A", "attention is all you need", "semantic_scholar");
        let b = Paper::new("openalex:W1", "Attention is all you need.", "openalex");
        let id_a = resolver.resolve_identity(&a);
        let id_b = resolver.resolve_identity(&b);
        assert!(id_a.starts_with("title:"));
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn untitled_paper_gets_unknown_identity() {
        let mut resolver = PaperIdentityResolver::new(0.9);
        let p = Paper::new("s2:A", "", "semantic_scholar");
        assert!(resolver.resolve_identity(&p).starts_with("unknown:"));
    }

    #[test]
    fn stats_track_sources() {
        let mut index = CanonicalPaperIndex::new();
        index.register_paper(paper("s2:A", Some("10.1/a"), "semantic_scholar"), "semantic_scholar");
        index.register_serp_result(serp("https://example.com/page"), None);
        index.register_serp_result(serp("https://doi.org/10.1/a"), None);

        let stats = index.get_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.serp_only, 1);
        assert_eq!(stats.both, 1);
        assert_eq!(stats.api_only, 0);
    }
}
