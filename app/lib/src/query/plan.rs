//! Query compilation: wildcard text to sub-query plans.
//!
//! A query matches a message if the pattern, implicitly wrapped in `*…*`,
//! wildcard-matches the reconstructed text. Compilation fans the pattern
//! out over the possible variable classifications of each
//! whitespace-separated sub-token:
//!
//! - a sub-token without wildcards classifies exactly as the encoder
//!   would have classified it, giving a single interpretation;
//! - a sub-token with wildcards may be an integer variable, a float
//!   variable, or a dictionary variable, and contributes one candidate per
//!   plausible kind.
//!
//! Each combination becomes a [`SubQuery`]: a log-type wildcard (the query
//! text with sub-tokens replaced by placeholder bytes) resolved to a
//! log-type ID set, plus one variable predicate per sub-token.
//!
//! A sub-token with an interior `*`, or consisting only of wildcards,
//! could bridge template/variable boundaries; such queries are routed to
//! the textual fallback scan so no match is lost.

use std::collections::HashSet;

use log::debug;

use crate::dict::{DictionaryId, DictionaryReader, LogTypeDictionaryReader};
use crate::encode::{
    classify_token, decode_float_var, decode_integer_var, PlaceholderKind, TokenClass,
};
use crate::error::Result;
use crate::query::wildcard::{has_wildcards, wildcard_match};
use crate::time::EpochTimeMs;

/// Sub-query fan-out cap; past this the textual fallback is cheaper.
const MAX_SUB_QUERIES: usize = 128;

/// Predicate over one variable slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarPredicate {
    /// Integer variable equal to the literal.
    IntLiteral(i64),
    /// Float variable with exactly this packed spelling.
    FloatLiteral(u64),
    /// Integer variable whose spelling matches the wildcard.
    IntWildcard(String),
    /// Float variable whose spelling matches the wildcard.
    FloatWildcard(String),
    /// Dictionary variable within the resolved ID set.
    DictIds(HashSet<DictionaryId>),
}

impl VarPredicate {
    /// Tests one variable slot of the given kind.
    pub fn matches(&self, kind: PlaceholderKind, slot: u64, case_sensitive: bool) -> bool {
        match self {
            VarPredicate::IntLiteral(value) => {
                kind == PlaceholderKind::Int && slot as i64 == *value
            }
            VarPredicate::FloatLiteral(packed) => {
                kind == PlaceholderKind::Float && slot == *packed
            }
            VarPredicate::IntWildcard(pattern) => {
                kind == PlaceholderKind::Int
                    && wildcard_match(
                        decode_integer_var(slot).as_bytes(),
                        pattern.as_bytes(),
                        case_sensitive,
                    )
            }
            VarPredicate::FloatWildcard(pattern) => {
                kind == PlaceholderKind::Float
                    && wildcard_match(
                        decode_float_var(slot).as_bytes(),
                        pattern.as_bytes(),
                        case_sensitive,
                    )
            }
            VarPredicate::DictIds(ids) => kind == PlaceholderKind::Dict && ids.contains(&slot),
        }
    }
}

/// One branch of the query fan-out.
#[derive(Debug, Clone)]
pub struct SubQuery {
    /// Log-types this branch can match.
    pub logtype_ids: HashSet<DictionaryId>,
    /// Per-sub-token predicates, in query order.
    pub var_predicates: Vec<VarPredicate>,
}

/// A compiled query.
#[derive(Debug, Clone)]
pub struct Query {
    raw: String,
    case_sensitive: bool,
    ts_range: (EpochTimeMs, EpochTimeMs),
    sub_queries: Vec<SubQuery>,
    needs_textual_fallback: bool,
    verify_pattern: String,
}

impl Query {
    /// Compiles `raw` against an archive's dictionaries.
    ///
    /// `ts_range` bounds matching messages' timestamps, inclusive.
    pub fn compile(
        raw: &str,
        case_sensitive: bool,
        ts_range: Option<(EpochTimeMs, EpochTimeMs)>,
        logtypes: &LogTypeDictionaryReader,
        vars: &DictionaryReader,
    ) -> Result<Self> {
        // Substring semantics: wrap in stars unless already anchored.
        let mut effective = String::with_capacity(raw.len() + 2);
        if !raw.starts_with('*') {
            effective.push('*');
        }
        effective.push_str(raw);
        if !raw.ends_with('*') {
            effective.push('*');
        }

        let mut query = Self {
            raw: raw.to_string(),
            case_sensitive,
            ts_range: ts_range.unwrap_or((i64::MIN, i64::MAX)),
            sub_queries: Vec::new(),
            needs_textual_fallback: false,
            verify_pattern: effective.clone(),
        };

        // Per-token interpretation lists.
        let mut token_interps: Vec<Vec<(PlaceholderKind, VarPredicate)>> = Vec::new();
        let mut skeleton: Vec<TokenOrGap> = Vec::new();
        for piece in split_tokens(&effective) {
            match piece {
                TokenOrGap::Gap(gap) => skeleton.push(TokenOrGap::Gap(gap)),
                TokenOrGap::Token(token) => {
                    if is_degenerate(token) {
                        debug!("query token {:?} spans boundaries; using fallback", token);
                        query.needs_textual_fallback = true;
                        return Ok(query);
                    }
                    let interps = interpret_token(token, vars, case_sensitive);
                    if interps.is_empty() {
                        // No classification can produce this token; the
                        // dictionary path has nothing to find.
                        return Ok(query);
                    }
                    token_interps.push(interps);
                    skeleton.push(TokenOrGap::Token(token));
                }
            }
        }

        let combinations: usize = token_interps.iter().map(Vec::len).product();
        if combinations > MAX_SUB_QUERIES {
            debug!("query fans out to {} sub-queries; using fallback", combinations);
            query.needs_textual_fallback = true;
            return Ok(query);
        }

        // Cartesian product over the interpretation lists.
        let mut choice = vec![0usize; token_interps.len()];
        loop {
            let mut logtype_pattern = Vec::with_capacity(effective.len());
            let mut predicates = Vec::with_capacity(token_interps.len());
            let mut token_ix = 0;
            for piece in &skeleton {
                match piece {
                    TokenOrGap::Gap(gap) => logtype_pattern.extend_from_slice(gap.as_bytes()),
                    TokenOrGap::Token(token) => {
                        let (kind, predicate) = &token_interps[token_ix][choice[token_ix]];
                        // A token-edge `*` may also absorb template text
                        // around the variable, so it stays in the log-type
                        // pattern beside the placeholder.
                        if token.starts_with('*') {
                            logtype_pattern.push(b'*');
                        }
                        logtype_pattern.push(kind.as_byte());
                        if token.len() > 1 && token.ends_with('*') {
                            logtype_pattern.push(b'*');
                        }
                        predicates.push(predicate.clone());
                        token_ix += 1;
                    }
                }
            }

            let logtype_ids = logtypes.search_templates(&logtype_pattern, case_sensitive);
            if !logtype_ids.is_empty() {
                query.sub_queries.push(SubQuery {
                    logtype_ids,
                    var_predicates: predicates,
                });
            }

            // Advance the odometer.
            let mut pos = 0;
            loop {
                if pos == choice.len() {
                    debug!(
                        "compiled {:?} into {} sub-queries",
                        raw,
                        query.sub_queries.len()
                    );
                    return Ok(query);
                }
                choice[pos] += 1;
                if choice[pos] < token_interps[pos].len() {
                    break;
                }
                choice[pos] = 0;
                pos += 1;
            }
        }
    }

    /// The original query text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Case sensitivity of this query.
    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Inclusive timestamp bounds.
    pub fn ts_range(&self) -> (EpochTimeMs, EpochTimeMs) {
        self.ts_range
    }

    /// True if any timestamp bound was given.
    pub fn has_ts_range(&self) -> bool {
        self.ts_range != (i64::MIN, i64::MAX)
    }

    /// Compiled sub-queries (empty when the fallback is in use or nothing
    /// can match).
    pub fn sub_queries(&self) -> &[SubQuery] {
        &self.sub_queries
    }

    /// True when matching must scan message text instead of dictionary
    /// IDs.
    pub fn needs_textual_fallback(&self) -> bool {
        self.needs_textual_fallback
    }

    /// Verifies a reconstructed message against the full wildcard; the
    /// dictionary resolution may over-approximate, this never does.
    pub fn verify_text(&self, text: &str) -> bool {
        let trimmed = text.strip_suffix('\n').unwrap_or(text);
        wildcard_match(
            trimmed.as_bytes(),
            self.verify_pattern.as_bytes(),
            self.case_sensitive,
        )
    }
}

enum TokenOrGap<'a> {
    Token(&'a str),
    Gap(&'a str),
}

/// Splits a query into alternating whitespace gaps and tokens, preserving
/// the gap text so the log-type wildcard keeps the query's whitespace.
fn split_tokens(query: &str) -> Vec<TokenOrGap<'_>> {
    let bytes = query.as_bytes();
    let mut pieces = Vec::new();
    let mut ix = 0;
    while ix < bytes.len() {
        let start = ix;
        if bytes[ix].is_ascii_whitespace() {
            while ix < bytes.len() && bytes[ix].is_ascii_whitespace() {
                ix += 1;
            }
            pieces.push(TokenOrGap::Gap(&query[start..ix]));
        } else {
            while ix < bytes.len() && !bytes[ix].is_ascii_whitespace() {
                ix += 1;
            }
            pieces.push(TokenOrGap::Token(&query[start..ix]));
        }
    }
    pieces
}

/// True if the token cannot be pinned to a single variable slot: interior
/// `*` can bridge tokens, and an all-wildcard token matches anything.
fn is_degenerate(token: &str) -> bool {
    if token.bytes().all(|b| b == b'*' || b == b'?') {
        return true;
    }
    let bytes = token.as_bytes();
    bytes
        .iter()
        .enumerate()
        .any(|(ix, &b)| b == b'*' && ix != 0 && ix != bytes.len() - 1)
}

/// Enumerates the classifications this sub-token could have had at encode
/// time.
fn interpret_token(
    token: &str,
    vars: &DictionaryReader,
    case_sensitive: bool,
) -> Vec<(PlaceholderKind, VarPredicate)> {
    if !has_wildcards(token) {
        // The encoder classifies concrete tokens deterministically.
        return match classify_token(token) {
            TokenClass::Int(value) => {
                vec![(PlaceholderKind::Int, VarPredicate::IntLiteral(value))]
            }
            TokenClass::Float(packed) => {
                vec![(PlaceholderKind::Float, VarPredicate::FloatLiteral(packed))]
            }
            TokenClass::Dict => {
                let ids = vars.search(token, case_sensitive);
                if ids.is_empty() {
                    Vec::new()
                } else {
                    vec![(PlaceholderKind::Dict, VarPredicate::DictIds(ids))]
                }
            }
        };
    }

    let mut interps = Vec::new();
    let int_compatible = token
        .bytes()
        .all(|b| b.is_ascii_digit() || b == b'-' || b == b'*' || b == b'?');
    if int_compatible {
        interps.push((
            PlaceholderKind::Int,
            VarPredicate::IntWildcard(token.to_string()),
        ));
    }
    let float_compatible = token
        .bytes()
        .all(|b| b.is_ascii_digit() || b == b'-' || b == b'.' || b == b'*' || b == b'?');
    if float_compatible {
        interps.push((
            PlaceholderKind::Float,
            VarPredicate::FloatWildcard(token.to_string()),
        ));
    }
    let dict_ids = vars.search(token, case_sensitive);
    if !dict_ids.is_empty() {
        interps.push((PlaceholderKind::Dict, VarPredicate::DictIds(dict_ids)));
    }
    interps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Codec;
    use crate::dict::DictionaryWriter;
    use crate::parse::encode_message;
    use tempfile::TempDir;

    /// Builds dictionaries over a few encoded messages and returns the
    /// readers.
    fn build_dicts(messages: &[&str]) -> (TempDir, LogTypeDictionaryReader, DictionaryReader) {
        let dir = TempDir::new().unwrap();
        let var_path = dir.path().join("var.dict");
        let logtype_path = dir.path().join("logtype.dict");
        let mut var_dict = DictionaryWriter::open(&var_path, Codec::Zstd(3)).unwrap();
        let mut logtype_dict = DictionaryWriter::open(&logtype_path, Codec::Zstd(3)).unwrap();
        for message in messages {
            let (template, _) = encode_message(message, &mut var_dict).unwrap();
            logtype_dict.add_or_get(&template).unwrap();
        }
        var_dict.close().unwrap();
        logtype_dict.close().unwrap();
        let logtypes = LogTypeDictionaryReader::open(&logtype_path, Codec::Zstd(3)).unwrap();
        let vars = DictionaryReader::open(&var_path, Codec::Zstd(3)).unwrap();
        (dir, logtypes, vars)
    }

    #[test]
    fn test_concrete_tokens_single_interpretation() {
        let (_dir, logtypes, vars) =
            build_dicts(&[" connected to server 42\n", " disconnected from server 42\n"]);
        let query =
            Query::compile("connected to server 42", true, None, &logtypes, &vars).unwrap();

        assert!(!query.needs_textual_fallback());
        assert_eq!(query.sub_queries().len(), 1);
        let sub_query = &query.sub_queries()[0];
        assert_eq!(sub_query.var_predicates.len(), 4);
        // Edge tokens carry the implicit substring stars.
        assert_eq!(
            sub_query.var_predicates[3],
            VarPredicate::IntWildcard("42*".to_string())
        );
        // "*connected" reaches both "connected" and "disconnected".
        assert!(matches!(
            &sub_query.var_predicates[0],
            VarPredicate::DictIds(ids) if ids.len() == 2
        ));
        // Middle tokens are concrete and resolve to single entries.
        assert!(matches!(
            &sub_query.var_predicates[1],
            VarPredicate::DictIds(ids) if ids.len() == 1
        ));
    }

    #[test]
    fn test_unknown_token_yields_no_sub_queries() {
        let (_dir, logtypes, vars) = build_dicts(&[" connected to server 42\n"]);
        let query = Query::compile("zebra", true, None, &logtypes, &vars).unwrap();
        assert!(!query.needs_textual_fallback());
        assert!(query.sub_queries().is_empty());
    }

    #[test]
    fn test_wildcard_token_fans_out() {
        let (_dir, logtypes, vars) = build_dicts(&[" task 42 finished\n", " task 17 aborted\n"]);
        // "4?" could be an int, float, or dictionary variable.
        let query = Query::compile("task 4?", true, None, &logtypes, &vars).unwrap();
        assert!(!query.needs_textual_fallback());
        // Dictionary candidates are empty (no entry matches "4?"), so only
        // int and float interpretations survive; only int resolves to a
        // log-type.
        assert_eq!(query.sub_queries().len(), 1);
        assert_eq!(
            query.sub_queries()[0].var_predicates[1],
            VarPredicate::IntWildcard("4?*".to_string())
        );
    }

    #[test]
    fn test_interior_star_falls_back() {
        let (_dir, logtypes, vars) = build_dicts(&[" anything\n"]);
        let query = Query::compile("*foo*bar*", true, None, &logtypes, &vars).unwrap();
        assert!(query.needs_textual_fallback());
        assert!(query.sub_queries().is_empty());
    }

    #[test]
    fn test_all_wildcard_token_falls_back() {
        let (_dir, logtypes, vars) = build_dicts(&[" anything\n"]);
        let query = Query::compile("foo * bar", true, None, &logtypes, &vars).unwrap();
        assert!(query.needs_textual_fallback());
    }

    #[test]
    fn test_edge_stars_stay_on_dictionary_path() {
        let (_dir, logtypes, vars) = build_dicts(&[" connection from host17\n"]);
        let query = Query::compile("host*", true, None, &logtypes, &vars).unwrap();
        assert!(!query.needs_textual_fallback());
        assert_eq!(query.sub_queries().len(), 1);
    }

    #[test]
    fn test_substring_semantics_on_first_and_last_token() {
        let (_dir, logtypes, vars) = build_dicts(&[" hello world\n"]);
        // "llo wor" is a substring of "hello world"; the implicit stars
        // attach to the edge tokens.
        let query = Query::compile("llo wor", true, None, &logtypes, &vars).unwrap();
        assert!(!query.needs_textual_fallback());
        assert_eq!(query.sub_queries().len(), 1);
    }

    #[test]
    fn test_verify_text() {
        let (_dir, logtypes, vars) = build_dicts(&[" hello world\n"]);
        let query = Query::compile("llo wor", true, None, &logtypes, &vars).unwrap();
        assert!(query.verify_text("x hello world y\n"));
        assert!(!query.verify_text("hello, word\n"));
    }

    #[test]
    fn test_ts_range_defaults_open() {
        let (_dir, logtypes, vars) = build_dicts(&[" x\n"]);
        let query = Query::compile("x", true, None, &logtypes, &vars).unwrap();
        assert!(!query.has_ts_range());
        let query = Query::compile("x", true, Some((0, 10)), &logtypes, &vars).unwrap();
        assert!(query.has_ts_range());
    }
}
