//! Output row schema and record assembly.
//!
//! [`Column`] is the one ordered definition of the persisted layout; both the
//! header and every row are produced from it.

use crate::crossref::doi_url;
use crate::demographics::Demographics;
use crate::gscholar::scholar_link;
use crate::reconcile::{MatchStatus, ReconciledAuthor, ReconciliationResult};
use crate::session::RawEntry;

/// Columns of the persisted table, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Rank,
    Status,
    Authors,
    FirstAuthor,
    LastAuthor,
    AuthorIds,
    Year,
    Title,
    ScholarLink,
    PubUrl,
    Citations,
    SuggestedDoi,
    FirstAuthorGender,
    FirstAuthorGenderProbability,
    FirstAuthorNation,
    FirstAuthorNationProbability,
    LastAuthorGender,
    LastAuthorGenderProbability,
    LastAuthorNation,
    LastAuthorNationProbability,
}

impl Column {
    pub const ALL: [Column; 20] = [
        Column::Rank,
        Column::Status,
        Column::Authors,
        Column::FirstAuthor,
        Column::LastAuthor,
        Column::AuthorIds,
        Column::Year,
        Column::Title,
        Column::ScholarLink,
        Column::PubUrl,
        Column::Citations,
        Column::SuggestedDoi,
        Column::FirstAuthorGender,
        Column::FirstAuthorGenderProbability,
        Column::FirstAuthorNation,
        Column::FirstAuthorNationProbability,
        Column::LastAuthorGender,
        Column::LastAuthorGenderProbability,
        Column::LastAuthorNation,
        Column::LastAuthorNationProbability,
    ];

    /// Header text
    pub fn header(self) -> &'static str {
        match self {
            Column::Rank => "GSRANK",
            Column::Status => "STATUS",
            Column::Authors => "AUTHOR",
            Column::FirstAuthor => "FIRST_AUTHOR",
            Column::LastAuthor => "LAST_AUTHOR",
            Column::AuthorIds => "AUTHOR_ID",
            Column::Year => "PUB_YEAR",
            Column::Title => "TITLE",
            Column::ScholarLink => "SCHOLAR_LINK",
            Column::PubUrl => "PUB_URL",
            Column::Citations => "NUM_CITATIONS",
            Column::SuggestedDoi => "SUGGESTED_DOI",
            Column::FirstAuthorGender => "FIRST_AUTHOR_GENDER",
            Column::FirstAuthorGenderProbability => "FIRST_AUTHOR_GENDER_PROBABILITY",
            Column::FirstAuthorNation => "FIRST_AUTHOR_NATION",
            Column::FirstAuthorNationProbability => "FIRST_AUTHOR_COUNTRY_PROBABILITY",
            Column::LastAuthorGender => "LAST_AUTHOR_GENDER",
            Column::LastAuthorGenderProbability => "LAST_AUTHOR_GENDER_PROBABILITY",
            Column::LastAuthorNation => "LAST_AUTHOR_NATION",
            Column::LastAuthorNationProbability => "LAST_AUTHOR_COUNTRY_PROBABILITY",
        }
    }

    /// Position of the column in a row
    pub fn index(self) -> usize {
        Column::ALL.iter().position(|c| *c == self).unwrap_or_default()
    }

    /// Header names in column order
    pub fn header_row() -> Vec<&'static str> {
        Column::ALL.iter().map(|c| c.header()).collect()
    }
}

/// Display name and predictions for a first or last author
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorProfile {
    pub name: String,
    pub demographics: Demographics,
}

impl AuthorProfile {
    /// Profile for `author` with its predictions.
    pub fn new(author: &ReconciledAuthor, demographics: Demographics) -> Self {
        Self {
            name: author.full_name(),
            demographics,
        }
    }

    fn gender(&self) -> String {
        self.demographics.gender.gender.clone()
    }

    fn gender_probability(&self) -> String {
        self.demographics
            .gender
            .probability
            .map(|p| p.to_string())
            .unwrap_or_default()
    }

    fn nation(&self) -> String {
        self.demographics.nation.country_code.clone()
    }

    fn nation_probability(&self) -> String {
        self.demographics.nation.probability.to_string()
    }
}

/// One fully processed hit, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub rank: u32,
    pub status: MatchStatus,
    pub authors: String,
    pub author_ids: String,
    pub year: String,
    pub title: String,
    pub scholar_link: String,
    pub pub_url: String,
    pub citations: u32,
    pub doi_url: String,
    pub first_author: AuthorProfile,
    pub last_author: AuthorProfile,
}

impl EnrichedRecord {
    /// Combine a raw hit with its reconciliation and author predictions.
    pub fn assemble(
        entry: &RawEntry,
        reconciliation: &ReconciliationResult,
        first_author: AuthorProfile,
        last_author: AuthorProfile,
        scholar_base: &str,
    ) -> Self {
        Self {
            rank: entry.rank,
            status: reconciliation.status,
            authors: reconciliation.full_names(),
            author_ids: entry.author_ids.join("; "),
            year: entry.year.clone(),
            title: entry.title.clone(),
            scholar_link: entry
                .cite_link
                .as_deref()
                .map(|link| scholar_link(scholar_base, link))
                .unwrap_or_default(),
            pub_url: entry.pub_url.clone().unwrap_or_default(),
            citations: entry.citations,
            doi_url: doi_url(&reconciliation.doi),
            first_author,
            last_author,
        }
    }

    /// Rendered value of one column
    pub fn field(&self, column: Column) -> String {
        match column {
            Column::Rank => self.rank.to_string(),
            Column::Status => self.status.to_string(),
            Column::Authors => self.authors.clone(),
            Column::FirstAuthor => self.first_author.name.clone(),
            Column::LastAuthor => self.last_author.name.clone(),
            Column::AuthorIds => self.author_ids.clone(),
            Column::Year => self.year.clone(),
            Column::Title => self.title.clone(),
            Column::ScholarLink => self.scholar_link.clone(),
            Column::PubUrl => self.pub_url.clone(),
            Column::Citations => self.citations.to_string(),
            Column::SuggestedDoi => self.doi_url.clone(),
            Column::FirstAuthorGender => self.first_author.gender(),
            Column::FirstAuthorGenderProbability => self.first_author.gender_probability(),
            Column::FirstAuthorNation => self.first_author.nation(),
            Column::FirstAuthorNationProbability => self.first_author.nation_probability(),
            Column::LastAuthorGender => self.last_author.gender(),
            Column::LastAuthorGenderProbability => self.last_author.gender_probability(),
            Column::LastAuthorNation => self.last_author.nation(),
            Column::LastAuthorNationProbability => self.last_author.nation_probability(),
        }
    }

    /// All fields in column order
    pub fn to_row(&self) -> Vec<String> {
        Column::ALL.iter().map(|c| self.field(*c)).collect()
    }
}
