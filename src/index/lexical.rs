//! Inverted full-text index over derived lexical documents.
//!
//! Backed by tantivy with one text field per weight tier, so matches in the
//! name outrank matches in tags, neighborhood, description, and finally the
//! aggregated review text. The `en_stem` analyzer lower-cases, strips
//! English stop words, and stems; `AND`/`OR`/`NOT` composition comes from
//! tantivy's query parser (parsed leniently, so a malformed query degrades
//! to its parseable part instead of failing).
//!
//! When tantivy cannot serve a query, [`scan_rank`] provides the degraded
//! full-scan path over the stored lexical documents.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

use tantivy::{
    Index, IndexReader, IndexWriter, TantivyDocument,
    collector::TopDocs,
    doc,
    query::{BooleanQuery, Occur, QueryParser, TermSetQuery},
    schema::{
        Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions, Value,
    },
    tokenizer::{
        Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter,
        TextAnalyzer,
    },
};

use crate::config::LexicalConfig;
use crate::error::{StoreError, StoreResult};
use crate::types::LexicalDocument;

/// Field names used in the schema.
mod fields {
    pub const PLACE_ID: &str = "place_id";
    pub const NAME: &str = "name";
    pub const CLASSIFICATION: &str = "classification";
    pub const NEIGHBORHOOD: &str = "neighborhood";
    pub const DESCRIPTION: &str = "description";
    pub const REVIEWS: &str = "reviews";
}

/// Resolved field handles, one per weight tier plus the stored id.
#[derive(Clone, Copy)]
struct TierFields {
    place_id: Field,
    name: Field,
    classification: Field,
    neighborhood: Field,
    description: Field,
    reviews: Field,
}

fn build_schema() -> (Schema, TierFields) {
    let mut builder = Schema::builder();

    let place_id = builder.add_text_field(fields::PLACE_ID, STRING | STORED);

    let tier = || {
        TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
    };
    let name = builder.add_text_field(fields::NAME, tier());
    let classification = builder.add_text_field(fields::CLASSIFICATION, tier());
    let neighborhood = builder.add_text_field(fields::NEIGHBORHOOD, tier());
    let description = builder.add_text_field(fields::DESCRIPTION, tier());
    let reviews = builder.add_text_field(fields::REVIEWS, tier());

    let schema = builder.build();
    let fields = TierFields {
        place_id,
        name,
        classification,
        neighborhood,
        description,
        reviews,
    };
    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let stop_words = StopWordFilter::new(Language::English)
        .unwrap_or_else(|| StopWordFilter::remove(Vec::<String>::new()));
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(stop_words)
        .filter(Stemmer::new(Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

/// Rank-aware inverted index over place lexical documents.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: TierFields,
    boosts: LexicalConfig,
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex").finish_non_exhaustive()
    }
}

impl LexicalIndex {
    /// Create an in-memory index.
    pub fn in_ram(boosts: LexicalConfig) -> StoreResult<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::finish(index, fields, boosts)
    }

    /// Open or create an on-disk index under `dir`.
    pub fn open(dir: &Path, boosts: LexicalConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::IndexUnavailable {
            index: "lexical",
            reason: format!("cannot create '{}': {e}", dir.display()),
        })?;
        let (schema, fields) = build_schema();
        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };
        Self::finish(index, fields, boosts)
    }

    fn finish(index: Index, fields: TierFields, boosts: LexicalConfig) -> StoreResult<Self> {
        register_tokenizers(&index);
        let reader = index.reader()?;
        let writer = Mutex::new(index.writer(boosts.writer_memory_bytes)?);
        Ok(Self {
            index,
            reader,
            writer,
            fields,
            boosts,
        })
    }

    /// Insert or replace the document for a place.
    pub fn upsert(&self, place_id: &str, document: &LexicalDocument) -> StoreResult<()> {
        let f = self.fields;
        let mut writer = self.writer.lock();
        writer.delete_term(tantivy::Term::from_field_text(f.place_id, place_id));
        writer.add_document(doc!(
            f.place_id => place_id,
            f.name => document.name.as_str(),
            f.classification => document.classification.as_str(),
            f.neighborhood => document.neighborhood.as_str(),
            f.description => document.description.as_str(),
            f.reviews => document.reviews.as_str(),
        ))?;
        writer.commit()?;
        Ok(())
    }

    /// Remove a place's document.
    pub fn remove(&self, place_id: &str) -> StoreResult<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(tantivy::Term::from_field_text(self.fields.place_id, place_id));
        writer.commit()?;
        Ok(())
    }

    fn parser(&self) -> QueryParser {
        let f = self.fields;
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![
                f.name,
                f.classification,
                f.neighborhood,
                f.description,
                f.reviews,
            ],
        );
        parser.set_field_boost(f.name, self.boosts.name_boost);
        parser.set_field_boost(f.classification, self.boosts.classification_boost);
        parser.set_field_boost(f.neighborhood, self.boosts.neighborhood_boost);
        parser.set_field_boost(f.description, self.boosts.description_boost);
        parser.set_field_boost(f.reviews, self.boosts.reviews_boost);
        parser
    }

    /// BM25 search across all tiers. Returns `(place_id, score)` ordered by
    /// descending score.
    pub fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<(String, f32)>> {
        let (parsed, _errors) = self.parser().parse_query_lenient(query);
        self.run(parsed, limit)
    }

    /// BM25 search restricted to an explicit id universe. Used by the hybrid
    /// planner to rank only the already-filtered candidate set.
    pub fn search_within(
        &self,
        query: &str,
        allowed: impl IntoIterator<Item = impl AsRef<str>>,
        limit: usize,
    ) -> StoreResult<Vec<(String, f32)>> {
        let (parsed, _errors) = self.parser().parse_query_lenient(query);
        let terms: Vec<tantivy::Term> = allowed
            .into_iter()
            .map(|id| tantivy::Term::from_field_text(self.fields.place_id, id.as_ref()))
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let restricted = BooleanQuery::new(vec![
            (Occur::Must, parsed),
            (Occur::Must, Box::new(TermSetQuery::new(terms))),
        ]);
        self.run(Box::new(restricted), limit)
    }

    fn run(
        &self,
        query: Box<dyn tantivy::query::Query>,
        limit: usize,
    ) -> StoreResult<Vec<(String, f32)>> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&*query, &TopDocs::with_limit(limit.max(1)))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let stored: TantivyDocument = searcher.doc(address)?;
            let place_id = stored
                .get_first(self.fields.place_id)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            results.push((place_id, score));
        }
        Ok(results)
    }

    /// Number of committed documents.
    pub fn doc_count(&self) -> StoreResult<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }
}

/// Degraded-mode scorer: a linear scan over stored lexical documents with
/// tier-boosted term frequency, normalized by document length. Slower but
/// dependency-free, so a broken tantivy index degrades instead of dropping
/// results.
pub fn scan_rank(
    query: &str,
    documents: &[(String, LexicalDocument)],
    boosts: &LexicalConfig,
) -> Vec<(String, f32)> {
    let terms: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect();
    if terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(String, f32)> = documents
        .iter()
        .filter_map(|(id, document)| {
            let tiers = [
                (&document.name, boosts.name_boost),
                (&document.classification, boosts.classification_boost),
                (&document.neighborhood, boosts.neighborhood_boost),
                (&document.description, boosts.description_boost),
                (&document.reviews, boosts.reviews_boost),
            ];
            let mut score = 0.0f32;
            let mut length = 0usize;
            for (text, boost) in tiers {
                let tokens: Vec<&str> = text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                    .collect();
                length += tokens.len();
                let mut frequency: HashMap<&str, usize> = HashMap::new();
                for token in tokens {
                    *frequency.entry(token).or_insert(0) += 1;
                }
                for term in &terms {
                    if let Some(&count) = frequency.get(term.as_str()) {
                        score += boost * count as f32;
                    }
                }
            }
            if score > 0.0 {
                Some((id.clone(), score / (1.0 + length as f32)))
            } else {
                None
            }
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored
}
