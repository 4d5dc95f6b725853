//! Nexus self-tune operator binary
//!
//! ```text
//! nexus-selftune verify <proof.json>...     check proof hashes and signatures
//! nexus-selftune decode <pod> <g0> .. <g7>  print decoded parameters
//! nexus-selftune status                     print breaker and rule status
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nexus_selftune::nexus_darwinian::decode;
use nexus_selftune::nexus_ledger::{verify_hash, verify_with_key, ImprovementProof};
use nexus_selftune::{NexusConfig, SelfTuner};

const USAGE: &str = "usage: nexus-selftune <verify <proof.json>... | decode <pod> <g0..g7> | status>";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = NexusConfig::load()?;
    info!("Starting Nexus self-tune v{}", nexus_selftune::nexus_common::VERSION);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.split_first() {
        Some((command, rest)) if command == "verify" => verify(config, rest).await,
        Some((command, rest)) if command == "decode" => decode_command(rest),
        Some((command, _)) if command == "status" => status(config).await,
        _ => bail!(USAGE),
    }
}

async fn verify(config: NexusConfig, paths: &[String]) -> Result<()> {
    if paths.is_empty() {
        bail!(USAGE);
    }

    let pinned_key = config.ledger.public_key_hex.clone();
    let tuner = SelfTuner::builder(config).build()?;

    let mut failures = 0;
    for path in paths {
        let proof = read_proof(Path::new(path))?;
        let hash_ok = verify_hash(&proof);
        let signature_ok = match &pinned_key {
            Some(key) => verify_with_key(&proof, key)?,
            None => tuner.ledger().verify_signature(&proof),
        };

        println!(
            "{}: pod={} cycle={} hash={} signature={}",
            path,
            proof.pod,
            proof.cycle_id,
            if hash_ok { "ok" } else { "MISMATCH" },
            if signature_ok { "ok" } else { "INVALID" }
        );
        if !(hash_ok && signature_ok) {
            failures += 1;
        }
    }

    tuner.shutdown();
    if failures > 0 {
        bail!("{} of {} proofs failed verification", failures, paths.len());
    }
    Ok(())
}

fn read_proof(path: &Path) -> Result<ImprovementProof> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn decode_command(args: &[String]) -> Result<()> {
    let Some((pod, genes)) = args.split_first() else {
        bail!(USAGE);
    };
    let genes = genes
        .iter()
        .map(|g| g.parse::<f64>().with_context(|| format!("gene {:?} is not a number", g)))
        .collect::<Result<Vec<f64>>>()?;

    let params = decode(&genes, pod);
    println!("{}", serde_json::to_string_pretty(&params)?);
    Ok(())
}

async fn status(config: NexusConfig) -> Result<()> {
    let tuner = SelfTuner::builder(config).build()?;
    let report = serde_json::json!({
        "breakers": tuner.breaker_status(),
        "rules": tuner.constitution().rules().rule_ids(),
        "public_key": tuner.ledger().public_key_hex(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    tuner.shutdown();
    Ok(())
}
