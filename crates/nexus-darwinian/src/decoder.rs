//! Genome decoder
//!
//! Pure mapping from a genome to the named parameters a pod consumes. Every
//! pod gets the eight universal parameters; known pods additionally get
//! derived parameters with documented ranges.
//!
//! | gene | universal meaning      |
//! |------|------------------------|
//! | 0    | temperature            |
//! | 1    | follow_up_cadence      |
//! | 2    | opener_style           |
//! | 3    | objection_depth        |
//! | 4    | closing_urgency        |
//! | 5    | tone_formality         |
//! | 6    | content_density        |
//! | 7    | personalization_level  |

use std::collections::BTreeMap;

use nexus_common::{Genome, GENOME_LEN};
use serde::{Deserialize, Serialize};

/// Universal gene labels, by index
pub const GENE_MAP: [&str; GENOME_LEN] = [
    "temperature",
    "follow_up_cadence",
    "opener_style",
    "objection_depth",
    "closing_urgency",
    "tone_formality",
    "content_density",
    "personalization_level",
];

const OPENER_VARIANTS: [&str; 3] = ["empathy", "roi", "question"];

/// Decoded parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Label(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Label(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Label(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Label(v) => write!(f, "{}", v),
        }
    }
}

/// Decoded parameters, ordered by name
pub type ParameterSet = BTreeMap<String, ParamValue>;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn three_way(v: f64, low_below: f64, high_above: f64, labels: [&'static str; 3]) -> &'static str {
    if v > high_above {
        labels[2]
    } else if v < low_below {
        labels[0]
    } else {
        labels[1]
    }
}

fn float(params: &mut ParameterSet, name: &str, v: f64) {
    params.insert(name.to_string(), ParamValue::Float(v));
}

fn int(params: &mut ParameterSet, name: &str, v: i64) {
    params.insert(name.to_string(), ParamValue::Int(v));
}

fn label(params: &mut ParameterSet, name: &str, v: &str) {
    params.insert(name.to_string(), ParamValue::Label(v.to_string()));
}

/// Decode raw genes; short inputs are padded with 0.5, every gene clamped
pub fn decode(genes: &[f64], pod: &str) -> ParameterSet {
    decode_genome(&Genome::from_slice_padded(genes), pod)
}

/// Decode a genome for `pod`
pub fn decode_genome(genome: &Genome, pod: &str) -> ParameterSet {
    let g = genome.genes();
    let mut params = ParameterSet::new();

    for (name, value) in GENE_MAP.iter().zip(g.iter()) {
        float(&mut params, name, *value);
    }

    let p = &mut params;
    match pod {
        "aurora" => {
            float(p, "vapi_temperature", round2(0.3 + g[0] * 0.7));
            label(p, "opener_variant", OPENER_VARIANTS[(g[2] * 2.99) as usize]);
            int(p, "follow_up_days", ((g[1] * 7.0) as i64).max(1));
            label(p, "closing_style", three_way(g[4], 0.3, 0.6, ["soft", "medium", "hard"]));
        }
        "syntropy" | "syntropy_war_room" => {
            float(p, "question_difficulty", round2(g[0]));
            float(p, "explanation_depth", round2(g[4]));
            float(p, "hint_frequency", round2(g[3]));
            label(p, "persona", if g[5] > 0.5 { "drill_sergeant" } else { "ivy_coach" });
        }
        "janus" => {
            float(p, "regime_confidence_threshold", round2(0.5 + g[6] * 0.4));
            float(p, "position_size_multiplier", round2(0.5 + g[7]));
            label(p, "risk_tolerance", three_way(g[0], 0.3, 0.6, ["low", "medium", "high"]));
        }
        "dan" => {
            int(p, "plan_depth", (g[4] * 5.0) as i64 + 1);
            float(p, "critique_strictness", round2(g[6]));
            int(p, "self_heal_retries", ((g[3] * 3.0) as i64).max(1));
        }
        "ralph" => {
            float(p, "story_complexity", round2(g[6]));
            int(p, "iteration_budget", ((g[1] * 10.0) as i64).max(1));
        }
        "sentinel_prime" => {
            float(p, "alert_sensitivity", round2(g[0]));
            float(p, "escalation_threshold", round2(g[4]));
            label(p, "report_verbosity", if g[6] > 0.6 { "verbose" } else { "concise" });
        }
        "shango_automation" => {
            float(p, "automation_depth", round2(g[6]));
            label(p, "reply_speed", three_way(g[1], 0.3, 0.7, ["instant", "normal", "delayed"]));
        }
        "viral_music" => {
            float(p, "creativity_level", round2(g[0]));
            float(p, "beat_intensity", round2(g[4]));
            label(p, "lyric_style", three_way(g[2], 0.3, 0.6, ["literal", "metaphor", "abstract"]));
        }
        _ => {}
    }

    params
}
