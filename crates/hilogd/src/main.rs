//! hilogd: the hilog logging daemon.
//!
//! Collects records from the input datagram socket and the kernel ring
//! buffer into an in-memory buffer, serves queries and persist jobs on
//! the control socket, and resumes interrupted persist jobs at startup.
//!
//! Configuration is read from `/etc/hilogd.conf` and
//! `/etc/hilogd.conf.d/*.conf`.

use clap::Parser;
use libhilog::buffer::LogBuffer;
use libhilog::collector::LogCollector;
use libhilog::config::{DEFAULT_CONFIG_PATH, DaemonConfig};
use libhilog::flow_control::{FLOW_GC_MAX_AGE, FlowControl};
use libhilog::kmsg::KmsgReader;
use libhilog::log_entry::LogType;
use libhilog::logging::{LoggingConfig, setup_logging};
use libhilog::persist::PersistRegistry;
use libhilog::properties::{MemoryPropertyStore, Properties};
use libhilog::server::{ControlServer, InputServer};
use libhilog::service::ServiceContext;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const GC_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser, Debug)]
#[command(name = "hilogd", version, about = "hilog logging daemon")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug output of the daemon itself
    #[arg(long)]
    debug: bool,

    /// Directory holding the input and control sockets
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Do not read kernel messages
    #[arg(long)]
    no_kmsg: bool,
}

fn setup_signal_handlers(shutdown: &Arc<AtomicBool>) {
    for sig in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        if let Err(e) = signal_hook::flag::register(sig, Arc::clone(shutdown)) {
            log::warn!("Failed to register handler for signal {}: {}", sig, e);
        }
    }
}

fn load_properties(config: &DaemonConfig) -> Arc<Properties> {
    let store = match MemoryPropertyStore::load_file(&config.parameter_file) {
        Ok(store) => {
            log::info!(
                "Loaded {} parameters from {}",
                store.len(),
                config.parameter_file.display()
            );
            store
        }
        Err(e) => {
            log::warn!(
                "No parameters from {} ({}), using defaults",
                config.parameter_file.display(),
                e
            );
            MemoryPropertyStore::new()
        }
    };
    Arc::new(Properties::new(Arc::new(store)))
}

fn size_buffer(buffer: &LogBuffer, config: &DaemonConfig, props: &Properties) {
    for t in LogType::ALL {
        let configured = if t == LogType::Kmsg {
            config.kmsg_buffer_size
        } else {
            config.buffer_size
        };
        let size = props
            .buffer_size(t)
            .unwrap_or_else(|| usize::try_from(configured).unwrap_or(usize::MAX));
        if let Err(e) = buffer.set_buff_len(t, size) {
            log::warn!("Keeping default size for {} buffer: {}", t.name(), e);
        }
    }
}

fn run() -> u8 {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: if cli.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
        ..LoggingConfig::default()
    };
    if let Err(e) = setup_logging(&logging) {
        eprintln!("hilogd: {}", e);
        return 1;
    }
    log::info!("hilogd starting");

    let mut config = DaemonConfig::load(&cli.config);
    if let Some(dir) = &cli.socket_dir {
        config = config.with_socket_dir(dir);
    }
    if cli.no_kmsg {
        config.kmsg = false;
    }

    let props = load_properties(&config);
    let buffer = Arc::new(LogBuffer::new());
    size_buffer(&buffer, &config, &props);

    let flow = Arc::new(FlowControl::load(
        &config.process_quota_file,
        &config.domain_quota_file,
    ));
    let collector = LogCollector::new(Arc::clone(&buffer), Arc::clone(&flow), Arc::clone(&props));

    if let Err(e) = fs::create_dir_all(&config.persist_meta_dir) {
        log::error!(
            "Failed to create persist directory {}: {}",
            config.persist_meta_dir.display(),
            e
        );
    }
    let persist = Arc::new(PersistRegistry::new(
        &config.persist_meta_dir,
        Arc::clone(&buffer),
    ));
    let resumed = persist.recover_all();
    if resumed > 0 {
        log::info!("Resumed {} persist job(s)", resumed);
    }

    let input = match InputServer::bind(&config.input_socket) {
        Ok(s) => s,
        Err(e) => {
            log::error!(
                "Failed to create input socket {}: {}",
                config.input_socket.display(),
                e
            );
            return 1;
        }
    };
    let control = match ControlServer::bind(&config.control_socket) {
        Ok(s) => s,
        Err(e) => {
            log::error!(
                "Failed to create control socket {}: {}",
                config.control_socket.display(),
                e
            );
            return 1;
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(&shutdown);

    let mut threads = Vec::new();
    let stop = Arc::clone(&shutdown);
    threads.push(
        thread::Builder::new()
            .name("hilog-input".into())
            .spawn(move || input.run(&collector, &stop))
            .expect("failed to spawn input thread"),
    );

    let ctx = Arc::new(ServiceContext {
        buffer: Arc::clone(&buffer),
        persist: Arc::clone(&persist),
        props: Arc::clone(&props),
    });
    let stop = Arc::clone(&shutdown);
    threads.push(
        thread::Builder::new()
            .name("hilog-control".into())
            .spawn(move || control.run(ctx, stop))
            .expect("failed to spawn control thread"),
    );

    if config.kmsg {
        let reader = KmsgReader::new(
            &config.kmsg_path,
            Arc::clone(&buffer),
            Arc::clone(&props),
            Arc::clone(&shutdown),
        );
        threads.push(
            thread::Builder::new()
                .name("hilog-kmsg".into())
                .spawn(move || {
                    reader.run();
                })
                .expect("failed to spawn kmsg thread"),
        );
    }

    log::info!("hilogd ready");
    let mut last_gc = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(500));
        persist.reap_failed();
        if last_gc.elapsed() >= GC_INTERVAL {
            flow.gc(FLOW_GC_MAX_AGE);
            last_gc = Instant::now();
        }
    }

    log::info!("hilogd shutting down");
    for t in threads {
        let name = t.thread().name().unwrap_or("?").to_string();
        if t.join().is_err() {
            log::error!("Thread {} panicked", name);
        }
    }
    persist.stop_all();
    log::info!("hilogd stopped");
    0
}

fn main() -> ExitCode {
    ExitCode::from(run())
}
