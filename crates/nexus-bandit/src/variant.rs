//! Variant elements, identity and stored statistics

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Script element a variant competes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantElement {
    Opener,
    ObjectionReframe,
    ClosingAsk,
    FollowUpSubject,
}

impl VariantElement {
    pub const ALL: [VariantElement; 4] = [
        VariantElement::Opener,
        VariantElement::ObjectionReframe,
        VariantElement::ClosingAsk,
        VariantElement::FollowUpSubject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantElement::Opener => "opener",
            VariantElement::ObjectionReframe => "objection_reframe",
            VariantElement::ClosingAsk => "closing_ask",
            VariantElement::FollowUpSubject => "follow_up_subject",
        }
    }

    /// Built-in variants served when the generator is unavailable
    pub fn fallback_texts(&self) -> &'static [&'static str] {
        match self {
            VariantElement::Opener => &[
                "Hi {name}, I noticed you're scaling your sales team. Quick question?",
                "Hey {name}, we helped a company like yours 3x their meeting rate. Worth 2 minutes?",
                "Hi {name}, I won't take much of your time. What's your biggest outreach challenge right now?",
                "{name}, saw your recent hire post. Are you still manually qualifying leads?",
                "Hi {name}, one question: how long does it take your team to follow up with a new lead?",
            ],
            VariantElement::ObjectionReframe => &[
                "Totally fair. Most founders say that before they see the ROI. What if we could show you data first?",
                "I hear you on timing. Honestly, that's exactly when this matters most. Can I show you why in under 2 minutes?",
                "Makes sense. The companies we work with said the same thing, and what changed their mind was one number. Want to hear it?",
                "Understood, and I respect that. Ten seconds: our average client books their first meeting within 48 hours. Does that shift things at all?",
                "Fair enough, I won't push. Can I send you one case study that takes 90 seconds to read?",
            ],
            VariantElement::ClosingAsk => &[
                "Does Tuesday at 3 PM work for a 15-minute call?",
                "Can we find 20 minutes this week, Thursday morning?",
                "What's your calendar look like Wednesday afternoon?",
                "I have Friday at 10 AM open. Does that work?",
                "Quick 15 minutes tomorrow, any window that works for you?",
            ],
            VariantElement::FollowUpSubject => &[
                "Quick follow-up: [Company] + Shango",
                "Re: the question I asked on Monday",
                "One number I forgot to mention",
                "This took us 3 minutes to build for you",
                "Still relevant? Shango",
            ],
        }
    }

    /// Exactly `n` fallback variants; past the built-in set, numbered
    /// placeholders are appended.
    pub fn fallback_variants(&self, n: usize) -> Vec<String> {
        let builtin = self.fallback_texts();
        (0..n)
            .map(|i| match builtin.get(i) {
                Some(text) => (*text).to_string(),
                None => format!("Default {} variant {}", self.as_str(), i),
            })
            .collect()
    }
}

impl fmt::Display for VariantElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown variant element: {0}")]
pub struct UnknownElement(pub String);

impl FromStr for VariantElement {
    type Err = UnknownElement;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VariantElement::ALL
            .into_iter()
            .find(|element| element.as_str() == s)
            .ok_or_else(|| UnknownElement(s.to_string()))
    }
}

/// 24-bit content fingerprint (first three bytes of SHA-256)
///
/// Collisions are possible at scale; two texts sharing a fingerprint share
/// statistics.
pub fn fingerprint(text: &str) -> u32 {
    let digest = Sha256::digest(text.as_bytes());
    u32::from_be_bytes([0, digest[0], digest[1], digest[2]])
}

/// Store key prefix for every variant of `element`
pub fn element_prefix(element: VariantElement) -> String {
    format!("variant:{}:", element)
}

/// Store key for one variant
pub fn variant_key(element: VariantElement, fingerprint: u32) -> String {
    format!("variant:{}:{:06x}", element, fingerprint)
}

/// Win/loss statistics of one variant as held in the audit store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub element: VariantElement,
    pub text: String,
    pub fingerprint: u32,
    #[serde(default)]
    pub calls: u64,
    #[serde(default)]
    pub wins: u64,
    #[serde(default)]
    pub retired: bool,
    #[serde(default)]
    pub promoted: bool,
}

impl VariantRecord {
    pub fn new(element: VariantElement, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            element,
            fingerprint: fingerprint(&text),
            text,
            calls: 0,
            wins: 0,
            retired: false,
            promoted: false,
        }
    }

    pub fn key(&self) -> String {
        variant_key(self.element, self.fingerprint)
    }

    /// wins / calls; 0 before the first call
    pub fn win_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.wins as f64 / self.calls as f64
        }
    }

    pub fn record(&mut self, won: bool) {
        self.calls += 1;
        if won {
            self.wins += 1;
        }
    }

    /// Neither retired nor promoted
    pub fn is_challenger(&self) -> bool {
        !self.retired && !self.promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_names_roundtrip() {
        for element in VariantElement::ALL {
            assert_eq!(element.as_str().parse::<VariantElement>().unwrap(), element);
        }
        assert_eq!(
            "pitch".parse::<VariantElement>(),
            Err(UnknownElement("pitch".to_string()))
        );
        assert_eq!(
            serde_json::to_value(VariantElement::ClosingAsk).unwrap(),
            serde_json::json!("closing_ask")
        );
    }

    #[test]
    fn test_fingerprint_is_24_bit_and_stable() {
        let fp = fingerprint("Does Tuesday at 3 PM work?");
        assert!(fp <= 0xFF_FFFF);
        assert_eq!(fp, fingerprint("Does Tuesday at 3 PM work?"));
        assert_ne!(fp, fingerprint("Does Wednesday at 3 PM work?"));
    }

    #[test]
    fn test_variant_key_format() {
        assert_eq!(variant_key(VariantElement::Opener, 0xab), "variant:opener:0000ab");
        assert!(variant_key(VariantElement::Opener, 7).starts_with(&element_prefix(VariantElement::Opener)));
    }

    #[test]
    fn test_fallback_always_n() {
        assert_eq!(VariantElement::ClosingAsk.fallback_variants(3).len(), 3);
        let many = VariantElement::Opener.fallback_variants(7);
        assert_eq!(many.len(), 7);
        assert_eq!(many[6], "Default opener variant 6");
        assert!(VariantElement::Opener.fallback_variants(0).is_empty());
    }

    #[test]
    fn test_win_rate() {
        let mut record = VariantRecord::new(VariantElement::Opener, "hi");
        assert_eq!(record.win_rate(), 0.0);
        record.record(true);
        record.record(false);
        assert_eq!(record.calls, 2);
        assert_eq!(record.win_rate(), 0.5);
    }

    #[test]
    fn test_missing_counters_default_to_zero() {
        let record: VariantRecord = serde_json::from_value(serde_json::json!({
            "element": "opener",
            "text": "hi",
            "fingerprint": 1
        }))
        .unwrap();
        assert_eq!((record.calls, record.wins), (0, 0));
        assert!(record.is_challenger());
    }
}
