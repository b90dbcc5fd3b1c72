use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use torrify::constants::MAGNET_LIMIT;
use torrify::metainfo::{torrent_file_name, validate_template};
use torrify::{FetchConfig, Fetcher, MagnetLink, TorrentFile};

const LOG_ENV: &str = "TORRIFY_LOG";

#[derive(Parser, Debug)]
#[command(version, about = "Convert magnet links into .torrent files")]
struct Cli {
    /// Logging level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one magnet link to a .torrent file
    Get {
        /// The magnet link
        magnet: String,

        /// Output path; `{name}` and `{hash}` are filled in, `-` writes the
        /// torrent to stdout
        #[arg(short, long, default_value = "{name}.torrent")]
        outfile: String,
    },

    /// Convert a file of magnet links to .torrent files
    Batch {
        /// File with one magnet link per line; blank lines and `#` comments
        /// are skipped
        file: PathBuf,

        /// Output path template; `{name}` and `{hash}` are filled in
        #[arg(short, long, default_value = "{name}.torrent")]
        outfile: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let env_filter = EnvFilter::builder()
        .with_env_var(LOG_ENV)
        .with_default_directive(cli.log_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let ok = match cli.command {
        Command::Get { magnet, outfile } => run_get(&magnet, &outfile).await,
        Command::Batch { file, outfile } => run_batch(&file, &outfile).await,
    };

    match ok {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_get(magnet: &str, outfile: &str) -> anyhow::Result<bool> {
    if outfile != "-" && !validate_template(outfile) {
        bail!("{outfile}: invalid filename template");
    }
    let magnet = MagnetLink::parse(magnet).context("invalid magnet link")?;
    let fetcher = Fetcher::new(FetchConfig::default());

    match fetch_one(&fetcher, &magnet, outfile).await {
        Ok(_) => Ok(true),
        Err(e) => {
            error!(info_hash = %magnet.info_hash, "{e:#}");
            Ok(false)
        }
    }
}

async fn run_batch(file: &Path, outfile: &str) -> anyhow::Result<bool> {
    if !validate_template(outfile) {
        bail!("{outfile}: invalid filename template");
    }

    let content = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;

    let mut ok = true;
    let mut magnets = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match MagnetLink::parse(line) {
            Ok(magnet) => magnets.push(magnet),
            Err(e) => {
                error!("invalid magnet link {line}: {e}");
                ok = false;
            }
        }
    }

    if magnets.is_empty() {
        info!("no magnet links to fetch");
        return Ok(ok);
    }

    let total = magnets.len();
    let fetcher = Arc::new(Fetcher::new(FetchConfig::default()));
    let limit = Arc::new(Semaphore::new(MAGNET_LIMIT));
    let mut tasks = JoinSet::new();

    for magnet in magnets {
        let fetcher = fetcher.clone();
        let limit = limit.clone();
        let outfile = outfile.to_string();
        tasks.spawn(async move {
            let _permit = limit.acquire_owned().await.expect("semaphore closed");
            let result = fetch_one(&fetcher, &magnet, &outfile).await;
            if let Err(ref e) = result {
                error!(info_hash = %magnet.info_hash, "{e:#}");
            }
            result.is_ok()
        });
    }

    let mut finished = 0usize;
    while let Some(joined) = tasks.join_next().await {
        if matches!(joined, Ok(true)) {
            finished += 1;
        }
    }

    info!("{finished}/{total} magnet links converted to torrent files");
    Ok(ok && finished == total)
}

/// Fetches one magnet and writes the composed torrent, returning the output
/// filename ("-" for stdout).
async fn fetch_one(
    fetcher: &Fetcher,
    magnet: &MagnetLink,
    outfile: &str,
) -> anyhow::Result<String> {
    let fetched = fetcher.fetch(magnet).await?;
    let torrent = TorrentFile::compose(fetched.info, fetched.trackers);
    let bytes = torrent.to_bytes()?;

    if outfile == "-" {
        std::io::stdout()
            .write_all(&bytes)
            .context("error writing torrent to stdout")?;
        return Ok("-".to_string());
    }

    let name = torrent
        .name()
        .or_else(|| magnet.display_name.clone())
        .unwrap_or_else(|| fetched.info_hash.to_hex());
    let filename = torrent_file_name(outfile, &name, &fetched.info_hash);

    if let Some(parent) = Path::new(&filename).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
    }
    std::fs::write(&filename, &bytes)
        .with_context(|| format!("error writing torrent to {filename}"))?;
    info!(info_hash = %fetched.info_hash, file = %filename, "torrent saved");

    Ok(filename)
}
