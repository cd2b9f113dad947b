use std::time::Instant;

use crate::error::Result;
use crate::routines::output::OutputFile;
use crate::routines::settings::Settings;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Setup logging for the library
///
/// Events are filtered by the configured level (default `info`). They always go to stdout and,
/// when output is enabled, also to the log file in the output folder.
///
/// Only the first call installs a subscriber; later calls in the same process are no-ops.
pub fn setup_log(settings: &Settings) -> Result<()> {
    let env_filter = EnvFilter::new(settings.log.level.as_str());

    let timestamper = CompactTimestamp {
        start: Instant::now(),
    };

    let subscriber = Registry::default().with(env_filter);

    let file_layer = if settings.config.output {
        let outputfile = OutputFile::new(&settings.paths.output, &settings.log.file)?;
        Some(
            fmt::layer()
                .with_writer(outputfile.file_owned())
                .with_ansi(false)
                .with_timer(timestamper.clone()),
        )
    } else {
        None
    };

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(false)
        .with_timer(timestamper.clone());

    if subscriber.with(file_layer).with(stdout_layer).try_init().is_err() {
        tracing::debug!("A global subscriber is already installed, keeping it");
    }

    Ok(())
}

#[derive(Clone)]
struct CompactTimestamp {
    start: Instant,
}

impl FormatTime for CompactTimestamp {
    fn format_time(
        &self,
        w: &mut tracing_subscriber::fmt::format::Writer<'_>,
    ) -> std::result::Result<(), std::fmt::Error> {
        let elapsed = self.start.elapsed();
        let hours = elapsed.as_secs() / 3600;
        let minutes = (elapsed.as_secs() % 3600) / 60;
        let seconds = elapsed.as_secs() % 60;

        write!(w, "{:02}h {:02}m {:02}s", hours, minutes, seconds)
    }
}
