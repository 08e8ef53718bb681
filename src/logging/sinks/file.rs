use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{config::Rotation, formatter, LoggingConfig};

/// Слой записи в файл через неблокирующий writer.
///
/// Возвращённый `WorkerGuard` нужно держать, пока нужен вывод.
pub fn layer_with_config<S>(
    config: &LoggingConfig
) -> (Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = match config.file.rotation {
        Rotation::Daily => rolling::daily(&config.log_dir, &config.file.filename),
        Rotation::Hourly => rolling::hourly(&config.log_dir, &config.file.filename),
        Rotation::Never => rolling::never(&config.log_dir, &config.file.filename),
    };
    let (writer, guard) = non_blocking(appender);
    let layer = formatter::build_formatter(config.format, &config.console, writer, false);
    (layer, guard)
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;
    use crate::logging::config::FileConfig;

    /// Тест проверяет, что события попадают в файл в указанном каталоге.
    #[test]
    fn test_file_layer_writes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            log_dir: dir.path().to_path_buf(),
            file: FileConfig {
                enabled: true,
                filename: "node.log".to_string(),
                rotation: Rotation::Never,
            },
            ..Default::default()
        };

        let (layer, guard) = layer_with_config::<Registry>(&cfg);
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("file sink event");
        });
        drop(guard);

        let written = std::fs::read_to_string(dir.path().join("node.log")).unwrap();
        assert!(written.contains("file sink event"));
    }
}
