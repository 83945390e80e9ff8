//! vbt - barbell velocity analysis from the command line.
//!
//! Prints progress to stderr and the result to stdout.

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vbt_ai::AiServices;
use vbt_analysis::{AnalysisPipeline, AnalysisResult};
use vbt_core::AnalysisConfig;
use vbt_media::FfmpegSource;

const USAGE: &str = "usage: vbt analyze <video> [--config <file.json>] [--json] [--ai-endpoint <url>]";

#[derive(Debug, PartialEq)]
struct Args {
    video: PathBuf,
    config: Option<PathBuf>,
    json: bool,
    ai_endpoint: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    match args.next().as_deref() {
        Some("analyze") => {}
        Some(other) => bail!("unknown command `{other}`\n{USAGE}"),
        None => bail!(USAGE),
    }

    let mut video = None;
    let mut config = None;
    let mut json = false;
    let mut ai_endpoint = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--config" => {
                config = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("--config needs a file"))?,
                ))
            }
            "--ai-endpoint" => {
                ai_endpoint = Some(args.next().ok_or_else(|| anyhow!("--ai-endpoint needs a URL"))?)
            }
            flag if flag.starts_with("--") => bail!("unknown option `{flag}`\n{USAGE}"),
            path if video.is_none() => video = Some(PathBuf::from(path)),
            extra => bail!("unexpected argument `{extra}`\n{USAGE}"),
        }
    }

    Ok(Args {
        video: video.ok_or_else(|| anyhow!(USAGE))?,
        config,
        json,
        ai_endpoint,
    })
}

#[cfg(feature = "http")]
fn services(endpoint: Option<&str>, config: &mut AnalysisConfig) -> Result<AiServices> {
    use std::sync::Arc;
    use vbt_ai::{HttpServiceConfig, HttpServices};

    let Some(endpoint) = endpoint else {
        return Ok(AiServices::none());
    };
    let http = Arc::new(HttpServices::new(HttpServiceConfig::new(endpoint))?);
    config.ai.enabled = true;
    info!(endpoint, "AI services enabled");
    Ok(AiServices {
        scale: Some(http.clone()),
        detector: Some(http.clone()),
        pose: Some(http),
    })
}

#[cfg(not(feature = "http"))]
fn services(endpoint: Option<&str>, _config: &mut AnalysisConfig) -> Result<AiServices> {
    if endpoint.is_some() {
        bail!("--ai-endpoint requires a build with the `http` feature");
    }
    Ok(AiServices::none())
}

fn print_table(result: &AnalysisResult) {
    let phase = result
        .concentric
        .map(|p| format!("frames {}-{}", p.start_frame, p.end_frame))
        .unwrap_or_else(|| "not detected".to_string());
    println!("Mean velocity        {:>8.3} m/s", result.mean_velocity);
    println!("Peak velocity        {:>8.3} m/s", result.peak_velocity);
    println!("Power zone           {:>8}", result.power_zone.label());
    println!("Rep duration         {:>8.2} s", result.rep_duration_s);
    println!("Concentric duration  {:>8.2} s ({phase})", result.concentric_duration_s);
    println!("Range of motion      {:>8.1} cm", result.range_of_motion_cm);
    println!("Path deviation       {:>8.2} cm", result.path_deviation_cm);
    println!("Calibration          {}", result.calibration_status);
    println!("Region               {}", result.region.status());
    println!(
        "Frames / points      {} / {} ({} faults)",
        result.frames_analyzed, result.tracked_points, result.tracking_faults
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    let services = services(args.ai_endpoint.as_deref(), &mut config)?;

    let source = FfmpegSource::open(&args.video)
        .with_context(|| format!("opening {}", args.video.display()))?;
    let pipeline = AnalysisPipeline::new(config)?.with_services(services);
    let run = pipeline.start(Box::new(source));
    info!(run = %run.run_id(), video = %args.video.display(), "Starting analysis");

    let result = run
        .run_with_progress(|p| {
            eprintln!("[{:>3.0}%] {}", p.progress_percent, p.current_step_description);
            if let Some(error) = &p.error {
                eprintln!("       {error}");
            }
        })
        .map_err(|err| match err.hint() {
            Some(hint) => anyhow!("{err} ({:?})\n{hint}", err.kind()),
            None => anyhow!("{err} ({:?})", err.kind()),
        })?;

    if args.json {
        println!("{}", result.to_json_pretty()?);
    } else {
        print_table(&result);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_full_command() {
        let args = parse(&["analyze", "lift.mp4", "--json", "--config", "c.json"]).unwrap();
        assert_eq!(
            args,
            Args {
                video: PathBuf::from("lift.mp4"),
                config: Some(PathBuf::from("c.json")),
                json: true,
                ai_endpoint: None,
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["track", "lift.mp4"]).is_err());
        assert!(parse(&["analyze"]).is_err());
        assert!(parse(&["analyze", "a.mp4", "b.mp4"]).is_err());
        assert!(parse(&["analyze", "a.mp4", "--config"]).is_err());
        assert!(parse(&["analyze", "a.mp4", "--verbose"]).is_err());
    }

    #[test]
    fn test_parse_endpoint() {
        let args = parse(&["analyze", "--ai-endpoint", "http://localhost:5000", "a.mp4"]).unwrap();
        assert_eq!(args.ai_endpoint.as_deref(), Some("http://localhost:5000"));
    }
}
