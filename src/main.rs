use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use serde_json::json;
use tracing::error;

use rate_spread_engine::{
    init_tracing, Computed, Coordinator, EngineConfig, EngineResult, MerchantConfig, Selection,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Args {
    dataset: PathBuf,
    template: PathBuf,
    merchant: Option<PathBuf>,
    engine_config: Option<PathBuf>,
    carriers: Option<Vec<String>>,
    breakdown: bool,
    detail: Option<String>,
    validate: bool,
}

fn usage() -> ! {
    eprintln!("Usage: rate-spread <shipments.csv> <template.json> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --merchant PATH     Merchant config (services, discounts, candidate carriers)");
    eprintln!("  --config PATH       Engine config (default: platform config dir)");
    eprintln!("  --carriers a,b,...  Carrier selection to price (default: merchant candidates)");
    eprintln!("  --breakdown         Also print single-carrier metrics for every candidate");
    eprintln!("  --detail CARRIER    Print the cells CARRIER wins on its own");
    eprintln!("  --validate          Cross-check computed metrics against the template");
    process::exit(1);
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage();
    }

    let mut parsed = Args {
        dataset: PathBuf::from(&args[1]),
        template: PathBuf::from(&args[2]),
        merchant: None,
        engine_config: None,
        carriers: None,
        breakdown: false,
        detail: None,
        validate: false,
    };

    let mut i = 3;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--merchant", Some(v)) => {
                parsed.merchant = Some(PathBuf::from(v));
                i += 1;
            }
            ("--config", Some(v)) => {
                parsed.engine_config = Some(PathBuf::from(v));
                i += 1;
            }
            ("--carriers", Some(v)) => {
                parsed.carriers = Some(v.split(',').map(|s| s.trim().to_string()).collect());
                i += 1;
            }
            ("--detail", Some(v)) => {
                parsed.detail = Some(v.clone());
                i += 1;
            }
            ("--breakdown", _) => parsed.breakdown = true,
            ("--validate", _) => parsed.validate = true,
            (other, _) => {
                eprintln!("Unknown or incomplete option: {other}");
                usage();
            }
        }
        i += 1;
    }
    parsed
}

/// Polls `request` until it stops answering `Pending`.
async fn wait_for<T>(mut request: impl FnMut() -> EngineResult<Computed<T>>) -> EngineResult<T> {
    loop {
        if let Computed::Ready(value) = request()? {
            return Ok(value);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn run(args: Args) -> EngineResult<serde_json::Value> {
    let config = EngineConfig::load(args.engine_config.as_deref())?;
    let merchant = match args.merchant.as_deref() {
        Some(path) => MerchantConfig::load(path)?,
        None => MerchantConfig::default(),
    };

    let coordinator = Coordinator::new(config, tokio::runtime::Handle::current())?;
    let source_hash = coordinator.load_source(&args.dataset, &args.template, merchant)?;
    let selection = match &args.carriers {
        Some(carriers) => Selection::new(carriers)?,
        None => coordinator.candidates()?,
    };

    let metrics = wait_for(|| coordinator.compute_metrics(&selection)).await?;
    let dataset = coordinator.dataset()?;
    let mut report = json!({
        "source_hash": source_hash,
        "selection": selection.carriers(),
        "records": dataset.records().len(),
        "qualifying_records": dataset.qualifying_count(),
        "detected_carriers": dataset.detect_carriers(),
        "metrics": metrics,
    });

    if args.breakdown {
        let breakdown = wait_for(|| coordinator.compute_breakdown()).await?;
        report["breakdown"] = serde_json::to_value(breakdown)?;
    }
    if let Some(carrier) = &args.detail {
        let cells = wait_for(|| coordinator.compute_carrier_detail(carrier)).await?;
        report["detail"] = serde_json::to_value(cells)?;
    }
    if args.validate {
        let check = coordinator.validate_against_template(&selection)?;
        report["template_check"] = serde_json::to_value(check)?;
    }
    Ok(report)
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = parse_args();

    match run(args).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                error!(error = %err, "could not render report");
                process::exit(1);
            }
        },
        Err(err) => {
            error!(error = %err, "pricing run failed");
            process::exit(1);
        }
    }
}
