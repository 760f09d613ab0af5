use chrono::Local;
use std::{
    backtrace::Backtrace,
    fs::OpenOptions,
    io::Write,
    panic::{PanicHookInfo, take_hook},
    path::{Path, PathBuf},
    thread,
};

/// Installs a global panic hook that logs panics via `tracing`.
///
/// In `panic = "abort"` builds with a log directory the record is also
/// appended straight to the current daily log file, since the non-blocking
/// writer never gets to flush. Unwinding builds rely on the file layer alone.
pub fn install(log_dir: Option<&Path>) {
    let log_dir = fallback_log_dir(log_dir);
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let panic_record = format_panic_record(panic_info);

            tracing::error!(target: "nerodia::panic", "{panic_record}");

            if let Some(dir) = &log_dir {
                let _ = append_panic_record(dir, &panic_record);
            }
        }));

        previous_hook(panic_info);
    }));
}

fn fallback_log_dir(log_dir: Option<&Path>) -> Option<PathBuf> {
    log_dir
        .filter(|_| cfg!(panic = "abort"))
        .map(Path::to_path_buf)
}

fn append_panic_record(log_dir: &Path, record: &str) -> std::io::Result<()> {
    // Matches `tracing_appender::rolling::daily` naming.
    let filename = format!("nerodia.log.{}", Local::now().format("%Y-%m-%d"));
    let path = PathBuf::from(log_dir).join(filename);

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_message(panic_info.payload()).unwrap_or_else(|| panic_info.to_string());
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());

    let thread_name = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());

    let backtrace = Backtrace::capture();
    let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");

    format!(
        "{ts} PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{backtrace}"
    )
}

/// Extract the message of a panic payload, if it is a string.
///
/// Shared with the dispatcher, which turns caught consumer panics into errors.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return Some((*s).to_string());
    }
    payload.downcast_ref::<String>().cloned()
}
