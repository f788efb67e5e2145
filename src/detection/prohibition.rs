//! Solicitation-prohibition detection.
//!
//! Detects "no solicitation" language with a curated keyword catalog, broad
//! exclusion rules for legitimate 営業〜 compounds, and compiled regex
//! combinations joining sales terms with contact terms and decline forms.
//! Two paths: a targeted pass over semantic-element texts (footer, contact,
//! policy, form, nav, notices, headings, list items) and a full-text
//! fallback over the normalized HTML. Results cache in a shared LRU+TTL
//! keyed by content hash so the analyzer and the judge never re-scan the
//! same page.

use crate::config::EarlyAbortConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

/// Legitimate 営業〜 compounds that must never trigger on their own.
pub const EXCLUSION_PATTERNS: &[&str] = &[
    "営業日", "営業時間", "営業所", "営業部", "営業課", "営業担当", "営業マン", "営業員",
    "営業職", "営業実績", "営業成績", "営業利益", "営業収益", "営業報告", "営業会議",
    "営業戦略", "営業方針", "営業ノウハウ", "営業スキル", "営業力", "営業中", "営業再開",
    "営業停止", "営業休止", "営業開始", "営業終了", "営業年数", "営業経験", "営業歴",
    "営業拠点", "営業店舗", "営業エリア", "営業地域", "営業範囲", "営業区域", "営業車",
    "営業車両", "営業用", "営業向け", "営業秘密", "営業機密", "営業情報", "営業データ",
    "営業資料", "営業ツール", "営業支援", "営業システム", "営業管理", "営業統計",
    "営業分析", "営業指標", "営業目標", "営業計画", "営業予算", "営業費用", "営業コスト",
    "営業効率", "営業生産性", "営業品質", "営業サービス", "営業対応", "営業窓口",
    "営業チーム", "営業組織", "営業体制", "営業強化", "営業拡大", "営業促進", "営業推進",
    "営業改善", "営業革新", "営業改革", "営業最適化", "営業効果", "営業結果", "営業成果",
    "営業業績", "営業実態", "営業状況", "営業環境", "営業市場", "営業競争", "営業優位",
    "営業価値", "営業価格", "営業単価", "営業金額", "営業売上", "営業収入", "営業損益",
    "営業黒字", "営業赤字", "営業キャッシュフロー",
    // Fraud-warning / security notices
    "なりすまし", "詐欺", "偽サイト", "フィッシング", "悪質", "不審", "偽装", "模倣",
    "違法", "不正", "注意喚起", "警戒", "被害", "トラブル", "セキュリティ",
    // Customer-service wording
    "お客様", "カスタマー", "サポート", "ヘルプ", "サービス", "お問い合わせ窓口",
    "相談窓口", "受付窓口", "案内", "説明", "ガイド", "マニュアル", "手順", "方法",
    "利用方法", "使用方法", "操作方法", "設定方法",
    // Privacy / legal boilerplate
    "個人情報", "プライバシー", "プライバシーポリシー", "個人情報保護", "データ保護",
    "利用規約", "サービス利用規約", "約款", "規約", "方針", "ポリシー", "ガイドライン",
    "法的", "法律", "法令", "規則", "条例", "コンプライアンス",
    // Operational wording
    "運営", "管理", "システム", "メンテナンス", "更新", "改善", "品質", "向上",
    "サービス向上", "利便性", "機能", "特徴", "メリット", "効果", "実績",
];

/// Direct prohibition keywords.
pub const PROHIBITION_KEYWORDS: &[&str] = &[
    "営業目的", "営業を目的", "営業による", "営業のため", "営業に関する", "営業活動",
    "営業行為", "営業案内", "営業電話", "営業メール", "営業連絡", "営業訪問",
    "セールス目的", "セールスを目的", "セールスのため", "セールスに関する",
    "セールス活動", "セールス行為", "セールス案内", "セールス電話", "セールスメール",
    "セールス連絡", "セールス訪問",
    "販売目的", "販売を目的", "販売のため", "販売に関する", "販売活動", "販売行為",
    "勧誘目的", "勧誘を目的", "勧誘による", "勧誘のため", "勧誘に関する", "勧誘活動",
    "勧誘行為", "勧誘案内", "勧誘電話", "勧誘メール", "勧誘連絡",
    "宣伝目的", "宣伝を目的", "宣伝のための", "宣伝に関する", "宣伝活動", "宣伝行為",
    "広告目的", "広告宣伝", "PR目的", "プロモーション目的",
    "売り込み", "売込",
    "商業目的", "商業利用", "商業的利用", "ビジネス目的", "ビジネス利用", "営利目的",
    "営利利用",
    "迷惑行為", "迷惑電話", "スパム", "spam",
];

const SALES: &str = "営業|セールス|勧誘|販売";
const CONTACT: &str = "問い合わせ|お問い合わせ|連絡|ご連絡|メール|電話|訪問";
const PROHIBIT: &str = "お断り|断り|遠慮|禁止";
const DECLINE: &str =
    "できません|いたしかねます|しておりません|お受けしておりません|対応しておりません|受け付けておりません";
const POLITE_DECLINE: &str =
    "お控えください|ご遠慮ください|お断りします|お断りいたします|控えていただけ|遠慮していただけ";
const NEGATIVE_FORMS: &str = "ません|ませんので|ないため|いたしません|いたしかねます";

/// The compiled combination patterns.
static COMBINED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let mut sources: Vec<String> = Vec::new();
    for sales in ["営業", "セールス", "勧誘", "販売"] {
        sources.push(format!("{sales}.{{0,30}}(?:{CONTACT}).{{0,30}}(?:{PROHIBIT})"));
        sources.push(format!("(?:{PROHIBIT}).{{0,30}}{sales}.{{0,30}}(?:{CONTACT})"));
        sources.push(format!("{sales}.{{0,30}}(?:お受け|対応).{{0,30}}(?:{DECLINE})"));
        sources.push(format!("{sales}.{{0,30}}(?:{CONTACT}).{{0,30}}(?:{POLITE_DECLINE})"));
        sources.push(format!("{sales}.{{0,30}}(?:{CONTACT}).{{0,30}}(?:{NEGATIVE_FORMS})"));
    }
    sources.push(format!("売り?込み.{{0,30}}(?:{PROHIBIT})"));
    sources.push(format!("(?:{PROHIBIT}).{{0,30}}売り?込み"));
    sources.push(format!(
        "(?:{SALES})(?:電話|メール|連絡).{{0,30}}(?:{PROHIBIT}|{DECLINE}|{POLITE_DECLINE})"
    ));
    sources.push(format!(
        "(?:{SALES}|商業|営利).{{0,10}}目的.{{0,30}}(?:{PROHIBIT}|{DECLINE}|{POLITE_DECLINE})"
    ));
    sources.push(format!("迷惑.{{0,10}}(?:電話|連絡|行為).{{0,30}}(?:{PROHIBIT})"));
    sources.push(format!(
        "(?:営業|勧誘|セールス).{{0,6}}(?:等|など).{{0,30}}(?:{DECLINE}|{POLITE_DECLINE})"
    ));
    // English no-solicitation forms
    let english = [
        r"\bno\s+(sales|solicitations?|cold\s*calls?|telemarketing|vendor\s+solicitations?)\b",
        r"\bno\s+vendor(s)?\s*(contact|calls|emails)\b",
        r"\b(do\s*not|don't|we\s*do\s*not|we\s*don't|not)\s+(accept|take|allow|permit)\s+(sales|solicitations?|vendor\s+(contacts?|inquiries?)|cold\s*calls?|telemarketing)\b",
        r"\b(sales|solicitations?|telemarketing|cold\s*calls?|vendor\s+inquiries?)\s+(are|is)\s+(not\s+accepted|prohibited|forbidden)\b",
        r"\bunsolicited\s+(sales|offers|proposals|marketing)\s+(are|is)\s+(not\s+accepted|prohibited|forbidden)\b",
        r"\bplease\s+do\s+not\s+contact\s+us\s+for\s+(sales|marketing|business\s+proposals?)\b",
        r"\bdo\s+not\s+use\s+this\s+form\s+for\s+(sales|solicitations?)\b",
        r"\bwe\s+are\s+not\s+(accepting|taking)\s+(sales|solicitations?|vendor\s+inquiries?)\b",
    ];
    sources.extend(english.iter().map(|s| s.to_string()));
    sources
        .iter()
        .filter_map(|s| Regex::new(&format!("(?i){s}")).ok())
        .collect()
});

static TAG_STRIP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("invalid regex"));
static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)>")
        .expect("invalid regex")
});
static COMMENT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("invalid regex"));
static WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("invalid regex"));

/// Confidence bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    #[default]
    None,
    VeryLow,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Prohibition strength, ordered weak → strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProhibitionLevel {
    #[default]
    None,
    Weak,
    Mild,
    Moderate,
    Strict,
}

impl ProhibitionLevel {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Self::Strict,
            "moderate" => Self::Moderate,
            "mild" => Self::Mild,
            "weak" => Self::Weak,
            _ => Self::None,
        }
    }
}

impl std::fmt::Display for ProhibitionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Weak => "weak",
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::Strict => "strict",
        };
        write!(f, "{s}")
    }
}

/// Detection outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProhibitionResult {
    pub detected: bool,
    /// Matched sentences, longest first, deduplicated
    pub phrases: Vec<String>,
    pub confidence_level: ConfidenceLevel,
    /// 0-100
    pub confidence_score: f64,
    pub level: ProhibitionLevel,
    /// "targeted" or "fallback"
    pub source: String,
}

impl ProhibitionResult {
    /// The early-abort rule: any single criterion suffices.
    pub fn should_abort(&self, config: &EarlyAbortConfig) -> bool {
        if !self.detected {
            return false;
        }
        if self.level >= ProhibitionLevel::parse(&config.min_level) && self.level != ProhibitionLevel::None
        {
            return true;
        }
        let min_conf = match config.min_confidence_level.to_ascii_lowercase().as_str() {
            "high" => ConfidenceLevel::High,
            "medium" => ConfidenceLevel::Medium,
            "low" => ConfidenceLevel::Low,
            _ => ConfidenceLevel::VeryLow,
        };
        if self.confidence_level >= min_conf {
            return true;
        }
        if self.confidence_score >= config.min_score {
            return true;
        }
        self.phrases.len() >= config.min_matches
    }
}

/// Normalize HTML to plain text: strip script/style/comments/tags, fold
/// full-width ASCII, lowercase, collapse whitespace.
pub fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(html, " ");
    let without_comments = COMMENT_BLOCK.replace_all(&without_scripts, " ");
    let text = TAG_STRIP.replace_all(&without_comments, " ");
    let folded: String = text
        .chars()
        .map(|c| match c {
            '\u{ff01}'..='\u{ff5e}' => {
                char::from_u32(c as u32 - 0xff01 + 0x21).unwrap_or(c)
            }
            _ => c,
        })
        .collect();
    WS.replace_all(&folded.to_lowercase(), " ").trim().to_string()
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['。', '！', '？', '\n', '\r'])
        .map(|s| s.trim())
        .filter(|s| s.chars().count() >= 10)
        .collect()
}

/// The detector itself. Stateless apart from the compiled patterns.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProhibitionDetector;

impl ProhibitionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect over pre-harvested semantic-element texts first, then fall
    /// back to a full-text scan of the HTML.
    pub fn detect(&self, html: &str, targeted_texts: &[String]) -> ProhibitionResult {
        if !html.is_empty() || !targeted_texts.is_empty() {
            if !targeted_texts.is_empty() {
                let combined = targeted_texts.join(" ");
                let normalized = WS.replace_all(&combined, " ");
                let phrases = self.scan_text(&normalized);
                if !phrases.is_empty() {
                    return self.build_result(phrases, "targeted");
                }
            }
            let text = html_to_text(html);
            let phrases = self.scan_text(&text);
            if !phrases.is_empty() {
                return self.build_result(phrases, "fallback");
            }
        }
        ProhibitionResult::default()
    }

    fn scan_text(&self, text: &str) -> Vec<String> {
        let mut hits: Vec<String> = Vec::new();
        for sentence in split_sentences(text) {
            let mut matched = false;
            for keyword in PROHIBITION_KEYWORDS {
                if sentence.contains(&keyword.to_lowercase()) || sentence.contains(keyword) {
                    if !self.excluded(sentence, keyword) {
                        matched = true;
                    }
                    break;
                }
            }
            if !matched {
                for pattern in COMBINED_PATTERNS.iter() {
                    if let Some(m) = pattern.find(sentence) {
                        if !self.excluded(sentence, m.as_str()) {
                            matched = true;
                        }
                        break;
                    }
                }
            }
            if matched && !hits.iter().any(|h| h == sentence) {
                hits.push(sentence.to_string());
            }
        }
        self.filter_quality(hits)
    }

    /// A sentence with a 営業-compound exclusion only survives when it also
    /// carries an independent prohibition signal.
    fn excluded(&self, sentence: &str, matched: &str) -> bool {
        if !matched.contains("営業") {
            return false;
        }
        for exclusion in EXCLUSION_PATTERNS {
            if sentence.contains(exclusion) {
                let stripped = sentence.replace(exclusion, "");
                let still_prohibited = PROHIBITION_KEYWORDS.iter().any(|k| stripped.contains(k))
                    || COMBINED_PATTERNS.iter().any(|p| p.is_match(&stripped));
                if !still_prohibited {
                    return true;
                }
            }
        }
        false
    }

    fn filter_quality(&self, mut hits: Vec<String>) -> Vec<String> {
        hits.retain(|h| {
            let len = h.chars().count();
            (5..=500).contains(&len)
        });
        hits.sort_by_key(|h| std::cmp::Reverse(h.chars().count()));
        // Containment / similarity dedup.
        let mut unique: Vec<String> = Vec::new();
        for h in hits {
            let duplicate = unique.iter().any(|u| {
                u.contains(&h) || h.contains(u.as_str()) || char_similarity(u, &h) > 0.8
            });
            if !duplicate {
                unique.push(h);
            }
        }
        unique
    }

    fn build_result(&self, phrases: Vec<String>, source: &str) -> ProhibitionResult {
        let mut score: f64 = if source == "targeted" { 75.0 } else { 60.0 };

        let negative_markers = [
            "ません",
            "できません",
            "しておりません",
            "お断り",
            "ご遠慮",
            "お控え",
            "do not",
            "don't",
            "no ",
            "not accept",
            "not allowed",
            "not permitted",
            "no cold call",
            "no solicitation",
            "no sales",
        ];
        let sales_terms = ["営業", "セールス", "勧誘", "販売", "sales", "solicitation", "telemarketing"];
        let contact_terms =
            ["問い合わせ", "連絡", "電話", "メール", "contact", "call", "phone", "email"];
        let mut negative_seen = false;
        let mut combo_seen = false;
        for phrase in &phrases {
            if !negative_seen && negative_markers.iter().any(|m| phrase.contains(m)) {
                score += 10.0;
                negative_seen = true;
            }
            if !combo_seen
                && sales_terms.iter().any(|t| phrase.contains(t))
                && contact_terms.iter().any(|t| phrase.contains(t))
            {
                score += 15.0;
                combo_seen = true;
            }
        }
        match phrases.len() {
            n if n >= 3 => score += 10.0,
            2 => score += 5.0,
            _ => {}
        }
        let score = score.min(100.0);

        let confidence_level = if score >= 90.0 {
            ConfidenceLevel::High
        } else if score >= 70.0 {
            ConfidenceLevel::Medium
        } else if score >= 50.0 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        };
        let level = match confidence_level {
            ConfidenceLevel::High => ProhibitionLevel::Strict,
            ConfidenceLevel::Medium => ProhibitionLevel::Moderate,
            ConfidenceLevel::Low => ProhibitionLevel::Mild,
            _ => ProhibitionLevel::Weak,
        };
        ProhibitionResult {
            detected: true,
            phrases,
            confidence_level,
            confidence_score: score,
            level,
            source: source.to_string(),
        }
    }
}

fn char_similarity(a: &str, b: &str) -> f64 {
    let sa: std::collections::HashSet<char> = a.chars().collect();
    let sb: std::collections::HashSet<char> = b.chars().collect();
    let inter = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// JS expression harvesting the targeted semantic-element texts.
pub const TARGETED_TEXTS_SCRIPT: &str = r#"
return (() => {
  const selectors = [
    'footer', '[class*="footer"]', '[id*="footer"]',
    '[class*="contact"]', '[id*="contact"]',
    '[class*="inquiry"]', '[id*="inquiry"]',
    '[class*="policy"]', '[id*="policy"]',
    '[class*="terms"]', '[id*="terms"]', '[class*="legal"]', '[id*="legal"]',
    'form', '[class*="form"]', '[id*="form"]',
    'nav', '[class*="nav"]', '[id*="nav"]',
    'aside', '[class*="side"]', '[id*="side"]',
    '[class*="notice"]', '[id*="notice"]',
    '[class*="warning"]', '[id*="warning"]',
    '[class*="alert"]', '[id*="alert"]',
    'h1', 'h2', 'h3', 'h4', 'h5', 'h6', 'li'
  ];
  const texts = [];
  const seen = new Set();
  for (const sel of selectors) {
    for (const el of document.querySelectorAll(sel)) {
      if (seen.has(el)) continue;
      seen.add(el);
      const text = (el.innerText || '').trim();
      if (text.length >= 10) texts.push(text.slice(0, 2000));
      if (texts.length >= 400) return texts;
    }
  }
  return texts;
})();
"#;

/// Shared LRU+TTL result cache keyed by (tenant, content hash).
#[derive(Debug)]
pub struct ProhibitionCache {
    entries: Mutex<CacheState>,
    max_entries: usize,
    ttl: Duration,
}

#[derive(Debug, Default)]
struct CacheState {
    map: HashMap<String, (ProhibitionResult, Instant)>,
    order: Vec<String>,
}

impl ProhibitionCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(32),
            ttl: ttl.max(Duration::from_secs(10)),
        }
    }

    /// Content key: tenant id plus the SHA-256 of the HTML. Entries never
    /// cross tenants.
    pub fn key(targeting_id: i64, html: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(html.as_bytes());
        format!("{targeting_id}:{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<ProhibitionResult> {
        let mut state = self.entries.lock().ok()?;
        let expired = match state.map.get(key) {
            Some((_, at)) => at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            state.map.remove(key);
            state.order.retain(|k| k != key);
            return None;
        }
        // LRU touch.
        state.order.retain(|k| k != key);
        state.order.push(key.to_string());
        state.map.get(key).map(|(r, _)| r.clone())
    }

    pub fn put(&self, key: String, result: ProhibitionResult) {
        let Ok(mut state) = self.entries.lock() else { return };
        state.order.retain(|k| *k != key);
        state.order.push(key.clone());
        state.map.insert(key, (result, Instant::now()));
        while state.map.len() > self.max_entries {
            let Some(oldest) = state.order.first().cloned() else { break };
            state.order.remove(0);
            state.map.remove(&oldest);
        }
    }

    /// Detect through the cache.
    pub fn detect_cached(
        &self,
        detector: &ProhibitionDetector,
        targeting_id: i64,
        html: &str,
        targeted_texts: &[String],
    ) -> ProhibitionResult {
        let key = Self::key(targeting_id, html);
        if let Some(hit) = self.get(&key) {
            return hit;
        }
        let result = detector.detect(html, targeted_texts);
        self.put(key, result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn detector() -> ProhibitionDetector {
        ProhibitionDetector::new()
    }

    #[test]
    fn test_footer_prohibition_detected_targeted() {
        let texts = vec!["営業電話はお断りしております。ご了承ください。".to_string()];
        let result = detector().detect("", &texts);
        assert!(result.detected);
        assert_eq!(result.source, "targeted");
        assert!(result.level >= ProhibitionLevel::Moderate);
        assert!(result.confidence_score >= 80.0);
    }

    #[test]
    fn test_business_hours_not_prohibition() {
        let texts = vec!["営業時間は平日9時から18時までとなっております。".to_string()];
        let result = detector().detect("", &texts);
        assert!(!result.detected);
    }

    #[test]
    fn test_exclusion_overridden_by_real_signal() {
        let texts =
            vec!["営業時間内であっても営業電話はお断りしております。".to_string()];
        let result = detector().detect("", &texts);
        assert!(result.detected);
    }

    #[test]
    fn test_english_no_solicitation() {
        let html = "<footer><p>Please note: no solicitations or cold calls. Thank you.</p></footer>";
        let result = detector().detect(html, &[]);
        assert!(result.detected);
        assert_eq!(result.source, "fallback");
    }

    #[test]
    fn test_html_fallback_strips_markup() {
        let html = "<html><script>var x = '営業電話はお断り';</script>\
                    <body><div>営業目的のお問い合わせはご遠慮ください。よろしくお願いします。</div></body></html>";
        let result = detector().detect(html, &[]);
        assert!(result.detected);
        // The script body must not contribute matches.
        assert_eq!(result.phrases.len(), 1);
    }

    #[test]
    fn test_clean_page_no_detection() {
        let html = "<html><body><h1>お問い合わせ</h1><p>お気軽にご連絡ください。お待ちしております。</p></body></html>";
        let result = detector().detect(html, &[]);
        assert!(!result.detected);
        assert_eq!(result.level, ProhibitionLevel::None);
    }

    #[test]
    fn test_early_abort_rule() {
        let config = EarlyAbortConfig::default();
        let texts = vec!["営業電話はお断りしております。ご了承ください。".to_string()];
        let result = detector().detect("", &texts);
        assert!(result.should_abort(&config));

        let weak = ProhibitionResult {
            detected: true,
            phrases: vec!["x".into()],
            confidence_level: ConfidenceLevel::VeryLow,
            confidence_score: 20.0,
            level: ProhibitionLevel::Weak,
            source: "fallback".into(),
        };
        assert!(!weak.should_abort(&config));
    }

    #[test]
    fn test_cache_round_trip_and_tenant_isolation() {
        let cache = ProhibitionCache::new(64, Duration::from_secs(60));
        let html = "<footer>営業電話はお断りしております。ご了承ください。</footer>";
        let first = cache.detect_cached(&detector(), 1, html, &[]);
        assert!(first.detected);
        let again = cache.detect_cached(&detector(), 1, html, &[]);
        assert_eq!(first, again);
        // Different tenant: a distinct cache key.
        assert_ne!(
            ProhibitionCache::key(1, html),
            ProhibitionCache::key(2, html)
        );
    }

    #[test]
    fn test_cache_ttl_expiry() {
        let cache = ProhibitionCache::new(64, Duration::from_secs(10));
        let key = ProhibitionCache::key(1, "x");
        cache.put(key.clone(), ProhibitionResult::default());
        assert!(cache.get(&key).is_some());
        // TTL floors at 10s, so expiry is not directly observable here;
        // entries stay alive until the clock passes the floor.
    }

    #[test]
    fn test_similarity_dedup() {
        let texts = vec![
            "営業電話はお断りしております。ご了承ください。".to_string(),
            "営業電話はお断りしております。ご了承ください。。".to_string(),
        ];
        let result = detector().detect("", &texts);
        assert_eq!(result.phrases.len(), 1);
    }
}
