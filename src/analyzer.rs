//! Language-aware text analysis: normalization, tokenization, keyword
//! extraction
//!
//! Handles the mixed CJK + ASCII text found in construction documents.
//! ASCII runs split on word boundaries; CJK runs are segmented against a
//! small domain lexicon with overlapping-subword fallback so that BM25
//! recall works for compound terms.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tracing::debug;

/// Tokenization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizeMode {
    /// Lexicon segmentation, whole runs for unmatched CJK spans
    Default,
    /// Adds overlapping CJK bigrams for recall (BM25 indexing and queries)
    Search,
    /// Emits every plausible subword (bigrams and trigrams)
    All,
}

/// Keyword extraction method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordMethod {
    TfIdf,
    TextRank,
}

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s]+").unwrap())
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap())
}

const DEFAULT_STOPWORDS: &[&str] = &[
    "的", "了", "和", "与", "及", "或", "是", "在", "为", "对", "中", "等", "有", "将", "按",
    "应", "由", "其", "被", "并", "可", "这", "那", "a", "an", "the", "of", "to", "and", "or",
    "in", "on", "for", "is", "are", "was", "be", "by", "with", "at", "from", "that", "this",
];

/// Domain lexicon used for greedy longest-match CJK segmentation.
/// Construction vocabulary that must survive as whole tokens.
const DOMAIN_LEXICON: &[&str] = &[
    "混凝土", "钢筋", "强度", "等级", "标准值", "构件", "框架梁", "框架柱", "楼板", "剪力墙",
    "基础", "楼梯", "规范", "标准", "图纸", "施工", "项目", "合同", "进度", "成本", "安全",
    "隐患", "整改", "验收", "质量", "截面", "跨度", "厚度", "高度", "宽度", "间距", "抗压",
    "抗震", "荷载", "配筋", "保护层", "预算", "工期", "延期", "超支", "风险", "周报",
];

/// Language-aware tokenizer and keyword extractor.
///
/// Configured at startup; the stopword set and lexicon are fixed for the
/// lifetime of the analyzer.
pub struct TextAnalyzer {
    stopwords: HashSet<String>,
    lexicon: Vec<String>,
    max_lexicon_len: usize,
}

impl Default for TextAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextAnalyzer {
    /// Create an analyzer with the built-in stopword set and lexicon
    pub fn new() -> Self {
        Self::with_extra_stopwords(&[])
    }

    /// Create an analyzer with additional stopwords
    pub fn with_extra_stopwords(extra: &[&str]) -> Self {
        let mut stopwords: HashSet<String> =
            DEFAULT_STOPWORDS.iter().map(|s| s.to_string()).collect();
        stopwords.extend(extra.iter().map(|s| s.to_string()));

        let mut lexicon: Vec<String> = DOMAIN_LEXICON.iter().map(|s| s.to_string()).collect();
        // Longest-match segmentation wants longer entries tried first
        lexicon.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));
        let max_lexicon_len = lexicon
            .first()
            .map(|w| w.chars().count())
            .unwrap_or(0);

        Self {
            stopwords,
            lexicon,
            max_lexicon_len,
        }
    }

    /// Normalize raw text before tokenization.
    ///
    /// Lowercases, strips URLs, emails and zero-width characters, maps
    /// full-width punctuation to half-width, and collapses whitespace.
    pub fn normalize(&self, text: &str) -> String {
        let text = url_pattern().replace_all(text, " ");
        let text = email_pattern().replace_all(&text, " ");

        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            match ch {
                '\u{200B}'..='\u{200D}' | '\u{FEFF}' => {}
                // Full-width ASCII block maps onto the half-width range
                '\u{FF01}'..='\u{FF5E}' => {
                    let mapped = char::from_u32(ch as u32 - 0xFF01 + 0x21).unwrap_or(ch);
                    out.extend(mapped.to_lowercase());
                }
                '\u{3000}' => out.push(' '),
                _ => out.extend(ch.to_lowercase()),
            }
        }

        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Tokenize text into an ordered token sequence
    pub fn tokenize(&self, text: &str, mode: TokenizeMode) -> Vec<String> {
        let normalized = self.normalize(text);
        let mut tokens = Vec::new();

        for run in segment_runs(&normalized) {
            match run {
                Run::Ascii(word) => tokens.push(word),
                Run::Cjk(chars) => self.emit_cjk_tokens(&chars, mode, &mut tokens),
            }
        }

        tokens.retain(|t| self.keep_token(t));
        debug!("Tokenized {} chars into {} tokens", text.len(), tokens.len());
        tokens
    }

    fn emit_cjk_tokens(&self, chars: &[char], mode: TokenizeMode, out: &mut Vec<String>) {
        // Greedy longest-match against the domain lexicon
        let mut segments: Vec<(usize, usize)> = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let mut matched = 0;
            let upper = self.max_lexicon_len.min(chars.len() - i);
            for len in (2..=upper).rev() {
                let candidate: String = chars[i..i + len].iter().collect();
                if self.lexicon.iter().any(|w| *w == candidate) {
                    matched = len;
                    break;
                }
            }
            if matched > 0 {
                segments.push((i, matched));
                i += matched;
            } else {
                segments.push((i, 1));
                i += 1;
            }
        }

        match mode {
            TokenizeMode::Default => {
                for (start, len) in segments {
                    out.push(chars[start..start + len].iter().collect());
                }
            }
            TokenizeMode::Search | TokenizeMode::All => {
                for (start, len) in &segments {
                    out.push(chars[*start..start + len].iter().collect());
                }
                // Overlapping bigrams across the whole run for recall
                if chars.len() >= 2 {
                    for window in chars.windows(2) {
                        out.push(window.iter().collect());
                    }
                }
                if mode == TokenizeMode::All && chars.len() >= 3 {
                    for window in chars.windows(3) {
                        out.push(window.iter().collect());
                    }
                }
                // The whole run itself, so exact compounds stay searchable
                if chars.len() >= 3 && chars.len() <= 8 {
                    out.push(chars.iter().collect());
                }
            }
        }
    }

    fn keep_token(&self, token: &str) -> bool {
        if token.is_empty() || self.stopwords.contains(token) {
            return false;
        }
        let mut chars = token.chars();
        let first = match chars.next() {
            Some(c) => c,
            None => return false,
        };
        let single = chars.next().is_none();
        if single && !is_cjk(first) && !first.is_ascii_alphabetic() {
            return false;
        }
        // Pure-punctuation tokens carry no signal
        token.chars().any(|c| c.is_alphanumeric() || is_cjk(c))
    }

    /// Extract the top-k keywords from text
    pub fn extract_keywords(
        &self,
        text: &str,
        top_k: usize,
        method: KeywordMethod,
    ) -> Vec<String> {
        if top_k == 0 {
            return Vec::new();
        }
        match method {
            KeywordMethod::TfIdf => self.tfidf_keywords(text, top_k),
            KeywordMethod::TextRank => self.textrank_keywords(text, top_k),
        }
    }

    /// TF-IDF over sentence-level pseudo-documents within the text
    fn tfidf_keywords(&self, text: &str, top_k: usize) -> Vec<String> {
        let sentences: Vec<&str> = text
            .split(['。', '！', '？', '\n', '.', '!', '?', ';'])
            .filter(|s| !s.trim().is_empty())
            .collect();
        if sentences.is_empty() {
            return Vec::new();
        }

        let mut tf: HashMap<String, f64> = HashMap::new();
        let mut df: HashMap<String, usize> = HashMap::new();

        for sentence in &sentences {
            let tokens = self.tokenize(sentence, TokenizeMode::Default);
            let mut seen = HashSet::new();
            for token in tokens {
                *tf.entry(token.clone()).or_insert(0.0) += 1.0;
                if seen.insert(token.clone()) {
                    *df.entry(token).or_insert(0) += 1;
                }
            }
        }

        let n = sentences.len() as f64;
        let mut scored: Vec<(String, f64)> = tf
            .into_iter()
            .map(|(token, freq)| {
                let doc_freq = *df.get(&token).unwrap_or(&1) as f64;
                let idf = (n / doc_freq).ln() + 1.0;
                // Longer terms are more informative than fallback chars
                let length_boost = 1.0 + 0.1 * (token.chars().count().saturating_sub(1) as f64);
                (token, freq * idf * length_boost)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(top_k).map(|(t, _)| t).collect()
    }

    /// TextRank over a co-occurrence window graph
    fn textrank_keywords(&self, text: &str, top_k: usize) -> Vec<String> {
        const WINDOW: usize = 5;
        const DAMPING: f64 = 0.85;
        const ITERATIONS: usize = 20;

        let tokens = self.tokenize(text, TokenizeMode::Default);
        if tokens.is_empty() {
            return Vec::new();
        }

        let vocab: Vec<String> = {
            let mut seen = HashSet::new();
            tokens
                .iter()
                .filter(|t| seen.insert((*t).clone()))
                .cloned()
                .collect()
        };
        let index: HashMap<&String, usize> =
            vocab.iter().enumerate().map(|(i, t)| (t, i)).collect();

        let mut edges: HashMap<(usize, usize), f64> = HashMap::new();
        for (i, token) in tokens.iter().enumerate() {
            let a = index[token];
            for other in tokens.iter().skip(i + 1).take(WINDOW - 1) {
                let b = index[other];
                if a != b {
                    *edges.entry((a.min(b), a.max(b))).or_insert(0.0) += 1.0;
                }
            }
        }

        let n = vocab.len();
        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for (&(a, b), &w) in &edges {
            adjacency[a].push((b, w));
            adjacency[b].push((a, w));
        }
        let out_weight: Vec<f64> = adjacency
            .iter()
            .map(|nbrs| nbrs.iter().map(|(_, w)| w).sum::<f64>().max(1.0))
            .collect();

        let mut scores = vec![1.0f64; n];
        for _ in 0..ITERATIONS {
            let mut next = vec![1.0 - DAMPING; n];
            for (node, nbrs) in adjacency.iter().enumerate() {
                for &(nbr, w) in nbrs {
                    next[node] += DAMPING * scores[nbr] * w / out_weight[nbr];
                }
            }
            scores = next;
        }

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
            .into_iter()
            .take(top_k)
            .map(|(i, _)| vocab[i].clone())
            .collect()
    }
}

enum Run {
    Ascii(String),
    Cjk(Vec<char>),
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
    )
}

/// Split normalized text into homogeneous ASCII-word and CJK runs
fn segment_runs(text: &str) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut ascii = String::new();
    let mut cjk: Vec<char> = Vec::new();

    let flush_ascii = |buf: &mut String, runs: &mut Vec<Run>| {
        if !buf.is_empty() {
            runs.push(Run::Ascii(std::mem::take(buf)));
        }
    };

    for ch in text.chars() {
        if is_cjk(ch) {
            flush_ascii(&mut ascii, &mut runs);
            cjk.push(ch);
        } else if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            if !cjk.is_empty() {
                runs.push(Run::Cjk(std::mem::take(&mut cjk)));
            }
            ascii.push(ch);
        } else {
            flush_ascii(&mut ascii, &mut runs);
            if !cjk.is_empty() {
                runs.push(Run::Cjk(std::mem::take(&mut cjk)));
            }
        }
    }
    flush_ascii(&mut ascii, &mut runs);
    if !cjk.is_empty() {
        runs.push(Run::Cjk(cjk));
    }

    // Trim stray joiners left on ASCII word edges
    runs.into_iter()
        .filter_map(|run| match run {
            Run::Ascii(word) => {
                let trimmed = word.trim_matches(|c| c == '-' || c == '_' || c == '.');
                if trimmed.is_empty() {
                    None
                } else {
                    Some(Run::Ascii(trimmed.to_string()))
                }
            }
            other => Some(other),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_noise() {
        let analyzer = TextAnalyzer::new();
        let text = "See https://example.com/spec  or mail a@b.com\u{200B}，ＴＥＳＴ！  ok";
        let normalized = analyzer.normalize(text);
        assert!(!normalized.contains("http"));
        assert!(!normalized.contains('@'));
        assert!(!normalized.contains('\u{200B}'));
        assert!(normalized.contains("test!"));
        assert!(!normalized.contains("  "));
    }

    #[test]
    fn test_mixed_cjk_ascii_segmentation() {
        let analyzer = TextAnalyzer::new();
        let tokens = analyzer.tokenize("KL-1梁使用C30混凝土", TokenizeMode::Default);
        assert!(tokens.contains(&"kl-1".to_string()));
        assert!(tokens.contains(&"c30".to_string()));
        assert!(tokens.contains(&"混凝土".to_string()));
    }

    #[test]
    fn test_search_mode_emits_compound_and_subwords() {
        let analyzer = TextAnalyzer::new();
        let tokens = analyzer.tokenize("地下结构", TokenizeMode::Search);
        // The whole 4-char compound and its meaningful bigrams both appear
        assert!(tokens.contains(&"地下结构".to_string()));
        assert!(tokens.contains(&"地下".to_string()));
        assert!(tokens.contains(&"结构".to_string()));
    }

    #[test]
    fn test_stopwords_and_singles_dropped() {
        let analyzer = TextAnalyzer::new();
        let tokens = analyzer.tokenize("the strength of C30", TokenizeMode::Default);
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"of".to_string()));
        assert!(tokens.contains(&"strength".to_string()));

        // Single ASCII digits are dropped, single CJK chars kept
        let tokens = analyzer.tokenize("梁 7", TokenizeMode::Default);
        assert!(tokens.contains(&"梁".to_string()));
        assert!(!tokens.contains(&"7".to_string()));
    }

    #[test]
    fn test_punctuation_tokens_dropped() {
        let analyzer = TextAnalyzer::new();
        let tokens = analyzer.tokenize("a -- b ——", TokenizeMode::Default);
        assert!(tokens.iter().all(|t| t.chars().any(|c| c.is_alphanumeric() || is_cjk(c))));
    }

    #[test]
    fn test_tfidf_keywords() {
        let analyzer = TextAnalyzer::new();
        let text = "混凝土强度等级为C30。混凝土应按规范验收。钢筋采用HRB400。";
        let keywords = analyzer.extract_keywords(text, 3, KeywordMethod::TfIdf);
        assert!(!keywords.is_empty());
        assert!(keywords.len() <= 3);
        assert!(keywords.contains(&"混凝土".to_string()));
    }

    #[test]
    fn test_textrank_keywords() {
        let analyzer = TextAnalyzer::new();
        let text = "进度延期导致成本超支，成本超支又引起进度压缩，进度是关键。";
        let keywords = analyzer.extract_keywords(text, 5, KeywordMethod::TextRank);
        assert!(!keywords.is_empty());
        assert!(keywords.contains(&"进度".to_string()) || keywords.contains(&"成本".to_string()));
    }

    #[test]
    fn test_empty_input() {
        let analyzer = TextAnalyzer::new();
        assert!(analyzer.tokenize("", TokenizeMode::Search).is_empty());
        assert!(analyzer
            .extract_keywords("", 5, KeywordMethod::TfIdf)
            .is_empty());
        assert!(analyzer
            .extract_keywords("text", 0, KeywordMethod::TextRank)
            .is_empty());
    }
}
