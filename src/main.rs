use std::{error::Error, path::PathBuf, process, sync::Arc};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, LevelFilter};
use url::Url;

use deeload::{
    codec,
    config::Config,
    events::LogListener,
    http::Client,
    job::{DownloadJob, JobInfo, JobKind},
    protocol::media::Format,
    streamer::{RetryPolicy, TrackStreamer},
    track::{Track, TrackId},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Settings missing from the file take their defaults.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Print the stream URL of a track
    Url {
        /// Track identifier
        #[arg(long)]
        id: TrackId,

        /// Content checksum of the track
        #[arg(long)]
        md5: String,

        /// Media version of the track
        #[arg(long, default_value = "1")]
        media_version: String,

        /// Format name, like MP3_320 or FLAC
        #[arg(long, default_value_t = Format::MP3_320)]
        format: Format,

        /// Build an unencrypted `api` URL instead of an encrypted one
        #[arg(long, default_value_t = false)]
        api: bool,
    },

    /// Print the fields encoded in a stream URL
    Reverse {
        /// Stream URL to decode
        url: String,
    },

    /// Download and decrypt a stream into a file
    Fetch {
        /// Track identifier the stream belongs to
        #[arg(long)]
        id: TrackId,

        /// Stream URL
        #[arg(long, value_hint = ValueHint::Url)]
        url: Url,

        /// File to write
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: PathBuf,
    },
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Streams `url` for track `id` into `output`, until done or interrupted.
async fn fetch(config: &Config, id: TrackId, url: Url, output: PathBuf) -> Result<(), Box<dyn Error>> {
    let client = Client::new(config)?;
    let listener = LogListener;

    let mut track = Track {
        id,
        bitrate: Some(Format::DEFAULT),
        ..Track::default()
    };
    track.urls.insert(Format::DEFAULT, url);

    let info = JobInfo {
        typ: "track".to_owned(),
        source_id: id.to_string(),
        bitrate: Format::DEFAULT,
        title: output.display().to_string(),
        ..JobInfo::default()
    };
    let root = output
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();
    let job = Arc::new(DownloadJob::new(info, JobKind::Single(track.clone()), root));

    let interrupt = Arc::clone(&job);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling download");
            interrupt.cancel();
        }
    });

    let mut file = tokio::fs::File::create(&output).await?;
    let streamer = TrackStreamer::new(&client, &listener, RetryPolicy::from(config));
    match streamer.stream(&mut file, &track, &job, 0).await {
        Ok(written) => {
            info!("wrote {written} bytes to {}", output.display());
            Ok(())
        }
        Err(e) => {
            drop(file);
            if let Err(e) = tokio::fs::remove_file(&output).await {
                debug!("could not remove {}: {e}", output.display());
            }
            Err(e.into())
        }
    }
}

/// Runs the requested command.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match args.command {
        Command::Url {
            id,
            md5,
            media_version,
            format,
            api,
        } => {
            let url = if api {
                codec::stream_url(id, &md5, &media_version, format)?
            } else {
                codec::crypted_stream_url(id, &md5, &media_version, format)?
            };
            println!("{url}");
        }
        Command::Reverse { url } => {
            let path = codec::reverse_stream_url(&url)?;
            println!(
                "id: {}\nmd5: {}\nmedia version: {}\nformat: {}",
                path.track_id, path.md5, path.media_version, path.format
            );
        }
        Command::Fetch { id, url, output } => fetch(&config, id, url, output).await?,
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested command.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
