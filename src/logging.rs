use anstyle::AnsiColor;
use log::{Level, LevelFilter, Metadata, Record};

/// Data structure to filter diagnostic messages
struct SimLogger;

impl log::Log for SimLogger {
	fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
		true
	}

	fn log(&self, record: &Record<'_>) {
		if self.enabled(record.metadata()) {
			let color = match record.level() {
				Level::Error => AnsiColor::Red,
				Level::Warn => AnsiColor::Yellow,
				Level::Info => AnsiColor::Green,
				Level::Debug => AnsiColor::Cyan,
				Level::Trace => AnsiColor::Magenta,
			};
			let style = anstyle::Style::new().fg_color(Some(color.into()));
			eprintln!("[{style}{}{style:#}] {}", record.level(), record.args());
		}
	}

	fn flush(&self) {}
}

/// Installs the diagnostic logger. Does nothing if a logger is already set.
pub fn init(level: LevelFilter) {
	static LOGGER: SimLogger = SimLogger;

	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(level);
	}
}
