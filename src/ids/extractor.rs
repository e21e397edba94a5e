//! Identifier extraction from paper URLs.
//!
//! Recovers DOI, PMID, PMCID, arXiv ID, CiNii CRID, OpenAlex Work ID, and
//! Semantic Scholar paper ID from SERP result URLs without any network
//! traffic. URLs on known academic domains that carry no structured ID are
//! flagged `needs_meta_extraction` so a later page fetch can pull the DOI
//! from meta tags.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::ids::md5_hex;

/// Structured identifiers recovered from one URL.
///
/// Multiple fields may be populated for a single URL (e.g. a DOI link that
/// also references an OpenAlex work); canonical-ID derivation applies a
/// fixed priority ladder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperIdentifier {
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
    pub arxiv_id: Option<String>,
    pub openalex_work_id: Option<String>,
    pub s2_paper_id: Option<String>,
    pub crid: Option<String>,
    pub url: Option<String>,
    /// The URL belongs to an academic site but the DOI must be recovered
    /// from page metadata (or a remote crosswalk).
    pub needs_meta_extraction: bool,
}

impl PaperIdentifier {
    /// Identifier carrying only the source URL.
    #[must_use]
    pub fn from_url(url: Option<String>) -> Self {
        Self {
            url,
            ..Self::default()
        }
    }

    /// Whether any structured provider ID was recovered.
    #[must_use]
    pub fn has_any_id(&self) -> bool {
        self.doi.is_some()
            || self.pmid.is_some()
            || self.pmcid.is_some()
            || self.arxiv_id.is_some()
            || self.openalex_work_id.is_some()
            || self.s2_paper_id.is_some()
            || self.crid.is_some()
    }

    /// Canonical ID with the fixed priority ladder:
    /// `doi:` > `pmid:` > `pmcid:` > `arxiv:` > `openalex:` > `s2:` >
    /// `crid:` > `url:` hash > `unknown:` uuid.
    ///
    /// DOIs are lowercased; arXiv IDs lose any `arXiv:` prefix. The result
    /// is stable across calls for the same identifier (the `unknown:` arm
    /// only triggers when even the URL is absent).
    #[must_use]
    pub fn get_canonical_id(&self) -> String {
        if let Some(doi) = &self.doi {
            return format!("doi:{}", doi.trim().to_lowercase());
        }
        if let Some(pmid) = &self.pmid {
            return format!("pmid:{pmid}");
        }
        if let Some(pmcid) = &self.pmcid {
            return format!("pmcid:{pmcid}");
        }
        if let Some(arxiv_id) = &self.arxiv_id {
            let bare = arxiv_id
                .strip_prefix("arXiv:")
                .or_else(|| arxiv_id.strip_prefix("arxiv:"))
                .unwrap_or(arxiv_id);
            return format!("arxiv:{bare}");
        }
        if let Some(work_id) = &self.openalex_work_id {
            return format!("openalex:{}", work_id.to_uppercase());
        }
        if let Some(s2_id) = &self.s2_paper_id {
            return format!("s2:{s2_id}");
        }
        if let Some(crid) = &self.crid {
            return format!("crid:{crid}");
        }
        if let Some(url) = self.url.as_deref() {
            return format!("url:{}", &md5_hex(url)[..12]);
        }
        format!("unknown:{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
    }
}

/// Stateless URL-to-identifier extractor with compiled patterns.
pub struct IdentifierExtractor {
    doi: Regex,
    pmid: Regex,
    pmcid: Regex,
    arxiv: Regex,
    jstage_doi: Regex,
    cinii_crid: Regex,
    openalex: Regex,
    s2: Regex,
    nature: Regex,
    sciencedirect: Regex,
    doi_in_text: Regex,
}

/// Domains whose pages carry scholarly metadata even when the URL itself
/// has no structured identifier.
const ACADEMIC_DOMAINS: &[&str] = &[
    "pubmed.gov",
    "ncbi.nlm.nih.gov",
    "arxiv.org",
    "jstage.jst.go.jp",
    "cir.nii.ac.jp",
    "nature.com",
    "sciencedirect.com",
    "ieee.org",
    "acm.org",
    "springer.com",
    "wiley.com",
];

impl Default for IdentifierExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierExtractor {
    /// Compile the pattern cascade. The patterns are fixed, so the
    /// constructor cannot fail.
    #[must_use]
    pub fn new() -> Self {
        let compile = |pattern: &str| {
            Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
        };
        Self {
            doi: compile(r"(?i)doi\.org/(10\.\d{4,}/[^\s?#]+)"),
            pmid: compile(r"(?i)pubmed\.ncbi\.nlm\.nih\.gov/(\d+)"),
            pmcid: compile(r"(?i)pmc\.ncbi\.nlm\.nih\.gov/articles/PMC(\d+)"),
            arxiv: compile(r"(?i)arxiv\.org/(?:abs|pdf)/(\d{4}\.\d{4,5})"),
            jstage_doi: compile(r"(?i)jstage\.jst\.go\.jp/.*/(10\.\d+/[^/?#]+)"),
            cinii_crid: compile(r"(?i)cir\.nii\.ac\.jp/crid/(\d+)"),
            openalex: compile(r"(?i)openalex\.org/(W\d+)"),
            // The hash component is exactly 40 hex chars; 39 or 41 must not
            // match.
            s2: compile(r"(?i)semanticscholar\.org/paper/[^/]+/([0-9a-f]{40})(?:[/?#]|$)"),
            nature: compile(r"(?i)nature\.com/articles/(s\d+-\d+-\d+-\w+)"),
            sciencedirect: compile(r"(?i)sciencedirect\.com/science/article/pii/([A-Z0-9]+)"),
            doi_in_text: compile(r#"(?i)10\.\d{4,}/[^\s<>"']+"#),
        }
    }

    /// Extract identifiers from a URL. Every matching pattern populates its
    /// field; canonical priority is resolved later by
    /// [`PaperIdentifier::get_canonical_id`].
    #[must_use]
    pub fn extract(&self, url: &str) -> PaperIdentifier {
        if url.is_empty() {
            return PaperIdentifier::from_url(Some(url.to_string()));
        }

        let mut identifier = PaperIdentifier::from_url(Some(url.to_string()));

        if let Some(m) = self.doi.captures(url) {
            identifier.doi = Some(m[1].to_string());
            debug!(doi = %m[1].to_string(), url, "extracted DOI from URL");
        }
        if let Some(m) = self.pmid.captures(url) {
            identifier.pmid = Some(m[1].to_string());
            debug!(pmid = %m[1].to_string(), url, "extracted PMID from URL");
        }
        if let Some(m) = self.pmcid.captures(url) {
            identifier.pmcid = Some(m[1].to_string());
            debug!(pmcid = %m[1].to_string(), url, "extracted PMCID from URL");
        }
        if let Some(m) = self.arxiv.captures(url) {
            identifier.arxiv_id = Some(m[1].to_string());
            debug!(arxiv_id = %m[1].to_string(), url, "extracted arXiv ID from URL");
        }
        if identifier.doi.is_none() {
            if let Some(m) = self.jstage_doi.captures(url) {
                identifier.doi = Some(m[1].to_string());
                debug!(doi = %m[1].to_string(), url, "extracted DOI from J-Stage URL");
            }
        }
        if let Some(m) = self.cinii_crid.captures(url) {
            identifier.crid = Some(m[1].to_string());
            debug!(crid = %m[1].to_string(), url, "extracted CRID from URL");
        }
        if let Some(m) = self.openalex.captures(url) {
            identifier.openalex_work_id = Some(m[1].to_uppercase());
            debug!(work_id = %m[1].to_string(), url, "extracted OpenAlex work ID from URL");
        }
        if let Some(m) = self.s2.captures(url) {
            identifier.s2_paper_id = Some(m[1].to_lowercase());
            debug!(paper_id = %m[1].to_string(), url, "extracted Semantic Scholar paper ID from URL");
        }

        // IDs that still need a DOI crosswalk before they are citable.
        if identifier.doi.is_none()
            && (identifier.pmid.is_some()
                || identifier.pmcid.is_some()
                || identifier.arxiv_id.is_some()
                || identifier.crid.is_some())
        {
            identifier.needs_meta_extraction = true;
        }

        // Domain-only matches: no structured ID, but the page metadata will
        // have one.
        if !identifier.has_any_id() {
            if self.nature.is_match(url) || self.sciencedirect.is_match(url) {
                identifier.needs_meta_extraction = true;
                debug!(url, "detected article URL requiring meta extraction");
            } else if let Ok(parsed) = Url::parse(url) {
                let host = parsed.host_str().unwrap_or_default().to_lowercase();
                if ACADEMIC_DOMAINS.iter().any(|d| host.contains(d)) {
                    identifier.needs_meta_extraction = true;
                    debug!(domain = %host, url, "detected academic domain, needs meta extraction");
                }
            }
        }

        identifier
    }

    /// Extract a bare DOI from free text (meta tags and the like).
    #[must_use]
    pub fn extract_doi_from_text(&self, text: &str) -> Option<String> {
        self.doi_in_text.find(text).map(|m| m.as_str().to_string())
    }
}
