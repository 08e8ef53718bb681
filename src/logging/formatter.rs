use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use super::{config::ConsoleConfig, LogFormat};

/// Форматирующий слой для заданного writer'а.
///
/// Возвращается trait-объект, чтобы стереть конкретный тип формата.
pub fn build_formatter<S, W>(
    format: LogFormat,
    console: &ConsoleConfig,
    writer: W,
    with_ansi: bool,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => {
            let json_fmt = fmt::format().json().with_current_span(true);
            Box::new(
                fmt::layer()
                    .event_format(json_fmt)
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(console.with_target)
                    .with_thread_ids(console.with_thread_ids)
                    .with_line_number(console.with_line_numbers),
            )
        }
        LogFormat::Pretty => {
            let pretty_fmt = fmt::format().pretty();
            Box::new(
                fmt::layer()
                    .event_format(pretty_fmt)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(writer)
                    .with_ansi(with_ansi)
                    .with_target(console.with_target)
                    .with_thread_names(true)
                    .with_thread_ids(console.with_thread_ids)
                    .with_line_number(console.with_line_numbers),
            )
        }
        LogFormat::Compact => {
            // compact: минимум служебных полей
            let compact_fmt = fmt::format().compact();
            Box::new(
                fmt::layer()
                    .event_format(compact_fmt)
                    .with_writer(writer)
                    .with_ansi(with_ansi)
                    .with_target(console.with_target)
                    .with_thread_ids(false)
                    .with_line_number(false),
            )
        }
    }
}
