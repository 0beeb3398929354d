mod cli;

use mediaforge::{MediaService, WebhookDelivery};
use mf_core::config::Config;
use mf_core::{
    Composition, ConversionOptions, ConversionOutput, ConversionRequest, InputMedia, MediaFormat,
    TextOverlay,
};
use mf_policy::PolicyTable;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediaforge=trace,mf_pipeline=trace,mf_av=debug,mf_policy=debug,mf_core=debug"
                .to_string()
        } else {
            "mediaforge=info,mf_pipeline=info,mf_av=info,mf_policy=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Convert {
            input,
            to,
            from,
            output,
            dpi,
            pages,
            width,
            height,
            quality,
            text,
            font,
            font_size,
            color,
            timeout,
            webhook,
        } => {
            let text = text.map(|text| {
                let mut overlay = TextOverlay::new(text);
                overlay.font_family = font;
                if let Some(size) = font_size {
                    overlay.font_size = size;
                }
                if let Some(color) = color {
                    overlay.color = color;
                }
                overlay
            });
            let options = ConversionOptions {
                dpi,
                pages,
                width,
                height,
                quality,
                text,
                timeout_secs: timeout,
            };
            let request = file_request(&input, from, to)?.with_options(options);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_request(
                cli.config.as_deref(),
                request,
                &output,
                webhook.as_deref(),
            ))
        }
        Commands::Compose {
            spec,
            assets,
            output,
            webhook,
        } => {
            let request = compose_request(&spec, &assets)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_request(
                cli.config.as_deref(),
                request,
                &output,
                webhook.as_deref(),
            ))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Policy { json } => show_policy(cli.config.as_deref(), json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediaforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn read_input(path: &Path, format: Option<MediaFormat>) -> Result<InputMedia> {
    if !path.exists() {
        anyhow::bail!("Input file does not exist: {:?}", path);
    }
    let format = match format {
        Some(f) => f,
        None => path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaFormat::from_extension)
            .with_context(|| format!("Cannot detect format of {:?}; pass --from", path))?,
    };
    let content = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    Ok(InputMedia::new(format, content))
}

fn file_request(
    input: &Path,
    from: Option<MediaFormat>,
    to: MediaFormat,
) -> Result<ConversionRequest> {
    Ok(ConversionRequest::new(read_input(input, from)?, to))
}

fn compose_request(spec_path: &Path, assets: &[String]) -> Result<ConversionRequest> {
    let json = std::fs::read_to_string(spec_path)
        .with_context(|| format!("Failed to read {:?}", spec_path))?;
    let spec = Composition::from_json(&json)?;

    let assets = assets
        .iter()
        .map(|arg| {
            let (name, path) = arg
                .split_once('=')
                .with_context(|| format!("Asset must be name=path, got {:?}", arg))?;
            Ok(read_input(Path::new(path), None)?.named(name))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ConversionRequest::compose(spec, assets))
}

async fn run_request(
    config_path: Option<&Path>,
    request: ConversionRequest,
    output_dir: &Path,
    webhook: Option<&str>,
) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let delivery_config = config.delivery.clone();
    let service = MediaService::start(config)?;

    let handle = service.submit(request)?;
    let job_id = handle.id();
    tracing::info!("Submitted job {}", job_id);

    let cancel = handle.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling job {}", job_id);
            cancel.cancel();
        }
    });

    let result = handle.wait().await;
    ctrl_c.abort();
    let output = result.map_err(|e| anyhow::anyhow!("Job {} failed: {}", job_id, e))?;

    let written = write_artifacts(&output, output_dir)?;
    println!(
        "Converted in {:.1}s ({} attempt{}{}):",
        output.duration.as_secs_f64(),
        output.attempts,
        if output.attempts == 1 { "" } else { "s" },
        if output.degraded { ", degraded" } else { "" }
    );
    for path in &written {
        println!("  {}", path.display());
    }

    if let Some(url) = webhook {
        let receipt = WebhookDelivery::new(&delivery_config)
            .deliver(url, &output)
            .await?;
        println!(
            "Delivered to {} (HTTP {}, {} attempt(s))",
            url, receipt.status, receipt.attempts
        );
    }

    Ok(())
}

fn write_artifacts(output: &ConversionOutput, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    output
        .artifacts
        .iter()
        .map(|artifact| {
            let path = dir.join(&artifact.name);
            std::fs::write(&path, &artifact.content)
                .with_context(|| format!("Failed to write {:?}", path))?;
            Ok(path)
        })
        .collect()
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path)?;
    let tools = mf_av::ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            if tool.required {
                all_ok = false;
            }
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        if !tool.required {
            print!(" [optional]");
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some required tools are missing. The service will refuse to start.");
    }

    Ok(())
}

fn show_policy(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let table = PolicyTable::from_config(&config.policy);
    let mut rules: Vec<_> = table.rules().collect();
    rules.sort_by_key(|r| (r.format.extension(), r.operation));

    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    for rule in rules {
        println!(
            "{} {:<8} {:<16} max {}x{}, {} pages",
            if rule.allowed { "✓" } else { "✗" },
            rule.format.to_string(),
            rule.operation.to_string(),
            rule.limits.max_width,
            rule.limits.max_height,
            rule.limits.max_pages
        );
    }
    println!(
        "\nmax dpi {}, max composition elements {}, max frames {}",
        table.max_dpi(),
        table.max_elements(),
        table.max_frames()
    );

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Policy rules: {}", config.policy.rules.len());
    println!(
        "  Pool size: {} (backlog {})",
        config.scheduler.pool_size, config.scheduler.backlog
    );
    println!("  Job timeout: {}s", config.scheduler.job_timeout_secs);
    println!("  Fan-out: {}", config.pipeline.fan_out);
    for warning in config.validate() {
        println!("  ⚠ {}", warning);
    }

    Ok(())
}
