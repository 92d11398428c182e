mod app;
mod connection;
mod theme;
mod ui;

use clap::Parser;

/// Terminal client for the lofi radio daemon.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Daemon address (host:port)
    #[arg(long, default_value_t = lofi_proto::platform::daemon_address())]
    address: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = lofi_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("tui.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Stdout belongs to the terminal UI, so logs only go to the file.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,lofi=debug".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("lofi log: {}", log_path.display());
    tracing::info!("lofi starting, daemon at {}", args.address);

    if let Err(e) = app::App::new().run(&args.address).await {
        tracing::error!("lofi exited with error: {}", e);
        eprintln!("lofi: {}", e);
        return Err(e);
    }
    Ok(())
}
