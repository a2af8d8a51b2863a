use clap::Parser;
use telnetd::client::{self, Connection};
use telnetd::config::{self, Cli, Command, HandlerKind};
use telnetd::error::TelnetResult;
use telnetd::server::{Echo, Server};
use telnetd::shell::Shell;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_server(args).await?,
        Command::Call(args) => run_call(args).await?,
    }
    Ok(())
}

async fn run_server(args: config::ServeArgs) -> TelnetResult<()> {
    let config = config::Config::load(&args)?;
    init_logging(&config.logging);

    let mut builder = Server::builder()
        .line_discipline(config.session.line_discipline)
        .naws_timeout(config.session.naws_timeout());
    if !config.server.listen.is_empty() {
        builder = builder.listen(config.server.listen.clone());
    }
    if let Some(timeout) = config.server.timeout() {
        builder = builder.timeout(timeout);
    }
    if let Some((cert, key)) = config.tls.files()? {
        builder = builder.tls_files(cert, key);
    }
    builder = match config.server.handler {
        HandlerKind::Echo => builder.handler(Echo),
        HandlerKind::Shell => builder.handler(Shell::from_config(&config.shell, &config.session)?),
    };
    let server = builder.build()?;

    let signal_server = server.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for shutdown signal");
            return;
        }
        let signalled = signal_server.shutdown().await;
        tracing::info!(connections = signalled, "Shutdown requested");
    });

    server.listen_and_serve().await
}

async fn run_call(args: config::CallArgs) -> TelnetResult<()> {
    init_logging(&config::LoggingConfig {
        level: args.log_level.clone(),
        ..config::LoggingConfig::default()
    });
    let connection = Connection::dial(args.addr.as_deref()).await?;
    client::call_stdio(connection).await
}

fn init_logging(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::new(logging.level.clone());
    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
