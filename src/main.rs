use replay_bus::{RecorderConfig, RecordingSession};
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod source;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("replay_bus", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

/// `replay [REPLAY [name] [SUBSAMPLING 444|422|420|411] [QUALITY n]]`
fn recorder_config() -> anyhow::Result<RecorderConfig> {
    let mut params: Vec<String> = std::env::args().skip(1).collect();
    if params.is_empty() {
        params.push("REPLAY".to_string());
    }
    let config = RecorderConfig::from_params(&params[..])?
        .ok_or_else(|| anyhow::anyhow!("not a replay command: {}", params.join(" ")))?;
    Ok(config.with_media_folder(config::config().media_folder()))
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let app_config = config::config();

    let (recorder, format) = match recorder_config().and_then(|c| Ok((c, app_config.video_format()?)))
    {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    };
    let audio_channels = recorder.audio_channels;

    let mut session = match RecordingSession::new(recorder) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error creating session: {}", e);
            std::process::exit(2);
        }
    };
    session.initialize(&format, audio_channels);
    let monitor = session.monitor();

    let cancel = CancellationToken::new();

    let producer = source::BarsSource::new(&format).and_then(|src| {
        Ok(source::start_source(session, src, cancel.clone())?)
    });
    let producer = match producer {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error starting source: {:#}", e);
            std::process::exit(1);
        }
    };

    let api = api::start_api_server(
        app_config.api_addr().to_string(),
        monitor.clone(),
        cancel.clone(),
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    // the source thread drains the session queue before it exits
    if tokio::task::spawn_blocking(move || producer.join().is_ok())
        .await
        .unwrap_or(false)
    {
        log::info!("{} final stats: {}", monitor.print(), stats_json(&monitor));
    } else {
        log::error!("source thread panicked");
    }
    let _ = api.await;

    std::process::exit(0);
}

fn stats_json(monitor: &replay_bus::SessionMonitor) -> String {
    serde_json::to_string(&monitor.stats()).unwrap_or_else(|e| e.to_string())
}
