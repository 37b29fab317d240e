use log::info;
use std::{io::Write, sync::Once};

use tokio::signal::unix::{signal, SignalKind};

/// Message limit for gRPC.
pub const MESSAGE_LIMIT: usize = 20 * 1024 * 1024;

pub const MS_PER_SEC: i64 = 1_000;
pub const MS_PER_DAY: i64 = 24 * 3600 * MS_PER_SEC;

/// Init log. Set log format.
pub fn init_log() {
    env_logger::builder()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}:{} - {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .init();
}

static INIT_LOG: Once = Once::new();

/// Setup.
pub fn setup_log() {
    INIT_LOG.call_once(|| {
        init_log();
    });
}

#[macro_export]
macro_rules! error_bail {
    ($msg:literal $(,)?) => {
        error!($msg);
        bail!($msg)
    };
    ($err:expr $(,)?) => {
        error!($err);
        bail!(err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        error!($fmt, $($arg)*);
        bail!($fmt, $($arg)*)
    };
}

/// Current wall clock in milliseconds since the unix epoch.
///
/// Arrival stamping happens once per record, so we use `coarsetime` instead
/// of going through `chrono`.
#[inline]
pub fn now_ms() -> i64 {
    coarsetime::Clock::now_since_epoch().as_millis() as i64
}

async fn wait_for_signal_impl() {
    // Infos here:
    // https://www.gnu.org/software/libc/manual/html_node/Termination-Signals.html
    let mut signal_terminate = signal(SignalKind::terminate()).unwrap();
    let mut signal_interrupt = signal(SignalKind::interrupt()).unwrap();

    tokio::select! {
        _ = signal_terminate.recv() => {
            info!("Received SIGTERM.");
        }
        _ = signal_interrupt.recv() => {
            info!("Received SIGINT.");
        }
    };
}

pub async fn wait_for_signal() {
    wait_for_signal_impl().await
}
