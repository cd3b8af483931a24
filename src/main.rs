use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod services;
mod utils;

use config::Config;
use events::WindowId;
use services::recovery;
use services::registry::{read_mirror, write_mirror};
use services::{
    create_backend, EventMonitor, GcSweeper, SwallowActions, SwallowRegistry, SwallowRules,
};
use utils::StateDir;

#[derive(Parser, Debug)]
#[command(name = "swallowd")]
#[command(about = "Скрывает окно терминала, пока запущенное из него графическое приложение открыто")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "swallowd.toml")]
    config: String,

    /// Режим сухого запуска (эмулируемый оконный менеджер)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (по умолчанию из конфигурации)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Следить за окнами (по умолчанию)
    Monitor,
    /// Включить или выключить поглощение у работающего демона
    Toggle,
    /// Показать состояние и активные поглощения
    Status,
    /// Вернуть все окна из области хранения
    Cleanup,
    /// Вернуть окно по идентификатору (0x... или десятичный)
    Restore { id: WindowId },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Arc::new(Config::load(&args.config)?);

    // Инициализация системы логирования
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, &config.logging.format)?;

    info!("Запуск swallowd v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    let state = StateDir::resolve(&config.state);

    match args.command.unwrap_or(Command::Monitor) {
        Command::Monitor => run_monitor(config, state, args.dry_run).await,
        Command::Toggle => {
            let enabled = state.toggle()?;
            println!("Поглощение {}", if enabled { "включено" } else { "выключено" });
            Ok(())
        }
        Command::Status => print_status(&config, &state),
        Command::Cleanup => cleanup(&config, &state, args.dry_run).await,
        Command::Restore { id } => restore_window(&config, &state, id, args.dry_run).await,
    }
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        "full" => registry.with(tracing_subscriber::fmt::layer()).init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
    }

    Ok(())
}

/// Реестр с зеркалом на диске; остатки прошлого запуска откладываются для `cleanup`
fn open_registry(config: &Config, state: &StateDir) -> SwallowRegistry {
    if !config.state.mirror_registry {
        return SwallowRegistry::new();
    }

    let mirror = state.registry_mirror();
    match recovery::carry_over_stale(state) {
        Ok(0) => {}
        Ok(stale) => warn!(
            "Предыдущие запуски оставили {} скрытых терминалов, верните их командой `swallowd cleanup`",
            stale
        ),
        Err(e) => {
            warn!("Не удалось разобрать зеркало реестра {:?}: {}", mirror, e);
            if let Err(e) = write_mirror(&mirror, &[]) {
                warn!("Не удалось сбросить зеркало реестра {:?}: {}", mirror, e);
            }
        }
    }

    SwallowRegistry::with_mirror(mirror)
}

async fn run_monitor(config: Arc<Config>, state: StateDir, dry_run: bool) -> Result<()> {
    if dry_run {
        warn!("Режим сухого запуска - реальные окна не затрагиваются");
    }

    // Инициализация компонентов
    let backend = create_backend(&config.backend, dry_run)?;
    let registry = Arc::new(open_registry(&config, &state));
    let actions = Arc::new(SwallowActions::new(
        backend.windows.clone(),
        config.swallow.restore_target(),
    ));
    let rules = SwallowRules::compile(&config.swallow)?;

    let monitor = EventMonitor::new(
        &config.swallow,
        rules,
        registry.clone(),
        backend.windows.clone(),
        backend.processes.clone(),
        actions.clone(),
        state,
    );
    let gc = Arc::new(GcSweeper::new(
        registry.clone(),
        actions,
        backend.windows.clone(),
        &config.swallow,
    ));

    info!("Все компоненты инициализированы");

    let (event_tx, event_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Запуск всех сервисов параллельно
    let events = backend.events;
    let events_handle = tokio::spawn(async move {
        if let Err(e) = events.run(event_tx).await {
            error!("Ошибка в источнике событий: {}", e);
        }
    });
    let monitor_handle = tokio::spawn(monitor.run(event_rx, shutdown_rx.clone()));
    let gc_handle = tokio::spawn(gc.run(shutdown_rx));

    info!("Все сервисы запущены");

    // Ожидание сигнала завершения
    wait_for_shutdown_signal().await;

    info!("Завершение работы...");

    // Монитору нужно время вернуть все скрытые терминалы
    let shutdown_timeout = config.backend.shutdown_budget(registry.len());

    // Монитор отменит отложенные задачи и вернёт скрытые терминалы
    let _ = shutdown_tx.send(true);
    events_handle.abort();

    // Ожидаем завершения задач (с таймаутом)
    let shutdown_result = tokio::time::timeout(shutdown_timeout, async {
        let _ = monitor_handle.await;
        let _ = gc_handle.await;
        let _ = events_handle.await;
    })
    .await;

    match shutdown_result {
        Ok(_) => info!("Все сервисы завершили работу корректно"),
        Err(_) => warn!("Таймаут при завершении сервисов"),
    }

    info!("swallowd завершил работу");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(terminate) => Some(terminate),
        Err(err) => {
            warn!("Не удалось подписаться на SIGTERM: {}", err);
            None
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
            Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
        },
        Some(_) = async {
            match terminate.as_mut() {
                Some(terminate) => terminate.recv().await,
                None => std::future::pending().await,
            }
        } => info!("Получен сигнал завершения (SIGTERM)"),
    }
}

fn print_status(config: &Config, state: &StateDir) -> Result<()> {
    let enabled = config.swallow.enabled && state.is_enabled();
    println!("Поглощение: {}", if enabled { "включено" } else { "выключено" });
    println!("Каталог состояния: {}", state.path().display());

    if !config.state.mirror_registry {
        println!("Зеркало реестра отключено в конфигурации");
        return Ok(());
    }

    let records = read_mirror(&state.registry_mirror())?;
    let stale = read_mirror(&state.stale_registry())?;
    if records.is_empty() && stale.is_empty() {
        println!("Активных поглощений нет");
        return Ok(());
    }

    let now = SystemTime::now();
    if !stale.is_empty() {
        println!("Остатки прошлых запусков (swallowd cleanup): {}", stale.len());
    }
    for record in records.into_iter().chain(stale) {
        println!(
            "{} скрывает {} (рабочий стол {}, {}s)",
            record.child,
            record.parent,
            record.parent_workspace.as_deref().unwrap_or("?"),
            record.age(now).as_secs()
        );
    }
    Ok(())
}

async fn cleanup(config: &Config, state: &StateDir, dry_run: bool) -> Result<()> {
    let windows = create_backend(&config.backend, dry_run)?.windows;
    let report = recovery::cleanup(windows.as_ref(), state).await?;
    println!("Возвращено окон: {} из {}", report.restored, report.hidden);
    Ok(())
}

async fn restore_window(config: &Config, state: &StateDir, id: WindowId, dry_run: bool) -> Result<()> {
    let windows = create_backend(&config.backend, dry_run)?.windows;
    let target = recovery::restore_window(windows.as_ref(), state, id).await?;
    println!("Окно {} возвращено на рабочий стол {}", id, target);
    Ok(())
}
