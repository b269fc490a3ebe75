//! vcam: plays a video file or an image directory into a virtual camera

use std::future::Future;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vcam::cli::{self, Args};
use vcam::output::{self, NullSink};
use vcam::utils::validate_media_path;
use vcam::{OutputSink, Session, Settings, CONFIG_PATH_ENV};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let argv: Vec<_> = std::env::args_os().collect();
    let program = argv
        .first()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vcam".into());

    let args = match cli::parse(argv) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n", e);
            eprint!("{}", cli::usage(&program));
            pause();
            std::process::exit(1);
        }
    };

    init_tracing(args.detailed);
    info!("vcam launching...");

    // Load configuration
    let config_file = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let settings = Settings::load(config_file.as_deref())?;
    vcam::CONFIG.store(Arc::new(settings.clone()));

    if !run(args, settings).await? {
        std::process::exit(1);
    }

    info!("vcam shutting down");
    Ok(())
}

/// Returns false when the session could not start
async fn run(args: Args, settings: Settings) -> Result<bool> {
    let sink: Box<dyn OutputSink> = match output::bind(&settings.output) {
        Ok(sink) => sink,
        Err(e) if settings.output.require_device => {
            error!("Failed to bind virtual camera: {}", e);
            return Ok(false);
        }
        Err(e) => {
            warn!("Failed to bind virtual camera, frames will be discarded: {}", e);
            Box::new(NullSink::default())
        }
    };

    let path = match validate_media_path(args.kind, &args.path) {
        Ok(path) => path,
        Err(e) => {
            error!("{}", e);
            return Ok(false);
        }
    };

    configure_decoder_logging(args.detailed);

    let session = match Session::open(args.kind, &path, args.looping, &settings) {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            return Ok(false);
        }
    };

    let handle = session.handle();
    let worker = tokio::task::spawn_blocking(move || session.run(sink));
    let result = supervise(worker, tokio::signal::ctrl_c(), move || handle.stop()).await;

    let report = result.map_err(|e| eyre!("pipeline task failed: {}", e))??;
    info!(
        "Published {} of {} decoded frames ({} failed, {} iterations)",
        report.published, report.decoded, report.publish_failures, report.iterations
    );
    Ok(true)
}

/// Await the worker, calling `stop` if the interrupt fires first. A failed
/// interrupt listener leaves the worker running to completion.
async fn supervise<T, I>(
    mut worker: tokio::task::JoinHandle<T>,
    interrupt: I,
    stop: impl FnOnce(),
) -> Result<T, tokio::task::JoinError>
where
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        joined = &mut worker => joined,
        signal = interrupt => match signal {
            Ok(()) => {
                info!("Interrupted, stopping pipeline");
                stop();
                worker.await
            }
            Err(e) => {
                warn!("Failed to listen for Ctrl-C, running to completion: {}", e);
                worker.await
            }
        }
    }
}

fn init_tracing(detailed: bool) {
    let default = if detailed { "vcam=debug" } else { "vcam=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr);

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        fmt.finish()
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }
    #[cfg(not(feature = "profiling"))]
    fmt.init();
}

/// Silence decoder library logging unless detailed logging was asked for
fn configure_decoder_logging(detailed: bool) {
    #[cfg(feature = "gstreamer-pipeline")]
    {
        use gstreamer as gst;
        if let Err(e) = gst::init() {
            warn!("Failed to initialize GStreamer: {}", e);
            return;
        }
        match decoder_log_threshold(detailed) {
            Some(level) => {
                gst::log::set_active(true);
                gst::log::set_default_threshold(level);
            }
            None => gst::log::set_active(false),
        }
    }
    #[cfg(not(feature = "gstreamer-pipeline"))]
    let _ = detailed;
}

#[cfg(feature = "gstreamer-pipeline")]
fn decoder_log_threshold(detailed: bool) -> Option<gstreamer::DebugLevel> {
    detailed.then_some(gstreamer::DebugLevel::Info)
}

/// Hold the console open so the usage text can be read
fn pause() {
    if std::io::stdin().is_terminal() {
        eprintln!("Press Enter to continue...");
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    }
}
