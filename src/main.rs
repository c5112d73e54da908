//! CLI entry point for `smtp2mqtt`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};

use smtp2mqtt::bus::mqtt::MqttPublisher;
use smtp2mqtt::config::{self, Config};
use smtp2mqtt::forward::Forwarder;
use smtp2mqtt::model::mail::Envelope;
use smtp2mqtt::parser::message::parse_mail;
use smtp2mqtt::routing::{PayloadEncoding, Router};
use smtp2mqtt::smtp::SmtpServer;

/// Accept mail over SMTP and publish it to an MQTT broker.
#[derive(Parser)]
#[command(name = "smtp2mqtt", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug messages
    #[arg(long, global = true)]
    debug: bool,

    /// Write logs to named file
    #[arg(long, global = true, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Welcome message for SMTP session
    #[arg(long, global = true)]
    welcome: Option<String>,

    /// Connect to specified MQTT server
    #[arg(long, global = true, value_name = "URL")]
    mqtt: Option<String>,

    /// MQTT username for connecting
    #[arg(long, global = true)]
    user: Option<String>,

    /// MQTT password for connecting
    #[arg(long, global = true, env = "SMTP2MQTT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Post to MQTT topic as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Keep connection to MQTT open
    #[arg(long, global = true)]
    keep: bool,

    /// Prepend string to MQTT topic (e.g. 'smtp/')
    #[arg(long, global = true, value_name = "PREFIX")]
    topic: Option<String>,

    /// Listen on specific IP and port
    #[arg(long, global = true, value_name = "ADDR")]
    listen: Option<String>,

    /// Allow only peers whose address starts with this prefix (e.g. 192.168.1.)
    #[arg(long, global = true, value_name = "PREFIX")]
    allow: Option<String>,

    /// Deny peers whose address starts with this prefix (e.g. 192.168.1.10)
    #[arg(long, global = true, value_name = "PREFIX")]
    deny: Option<String>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the SMTP listener (default)
    Serve,
    /// Decode a message file and print the routing decision as JSON
    Decode {
        /// Message file (.eml)
        path: PathBuf,
        /// Envelope sender to report
        #[arg(long, default_value = "")]
        sender: String,
        /// Envelope recipient to report (repeatable)
        #[arg(long)]
        rcpt: Vec<String>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

impl Cli {
    /// Layer command-line overrides on top of the loaded configuration.
    fn apply_overrides(&self, config: &mut Config) {
        if self.debug {
            config.general.debug = true;
        }
        if let Some(log) = &self.log {
            config.general.log_file = Some(log.clone());
        }
        if let Some(welcome) = &self.welcome {
            config.smtp.welcome = welcome.clone();
        }
        if let Some(listen) = &self.listen {
            config.smtp.listen = listen.clone();
        }
        if let Some(allow) = &self.allow {
            config.smtp.allow = Some(allow.clone());
        }
        if let Some(deny) = &self.deny {
            config.smtp.deny = Some(deny.clone());
        }
        if let Some(server) = &self.mqtt {
            config.mqtt.server = server.clone();
        }
        if let Some(user) = &self.user {
            config.mqtt.user = Some(user.clone());
        }
        if let Some(password) = &self.password {
            config.mqtt.password = Some(password.clone());
        }
        if self.keep {
            config.mqtt.keep = true;
        }
        if let Some(topic) = &self.topic {
            config.routing.topic_prefix = topic.clone();
        }
        if self.json {
            config.routing.json = true;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref());
    cli.apply_overrides(&mut config);

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 if config.general.debug => "debug",
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, config.general.log_file.as_deref())?;

    match cli.command {
        None | Some(Commands::Serve) => cmd_serve(&config),
        Some(Commands::Decode { path, sender, rcpt }) => cmd_decode(&path, sender, rcpt, &config),
        Some(Commands::Completions { shell }) => cmd_completions(shell),
        Some(Commands::Manpage) => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("log path has no file name: {}", path.display()))?;
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_appender),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Connect to the broker and accept mail until killed.
fn cmd_serve(config: &Config) -> anyhow::Result<()> {
    let publisher = MqttPublisher::new(&config.mqtt)
        .with_context(|| format!("cannot set up MQTT publisher for {}", config.mqtt.server))?;
    let forwarder = Forwarder::new(Router::new(&config.routing), Arc::new(publisher));

    let server = SmtpServer::new(config.smtp.clone(), Arc::new(forwarder));
    server.run()?;
    Ok(())
}

/// Decode a message file offline and print what would be published.
fn cmd_decode(
    path: &Path,
    sender: String,
    recipients: Vec<String>,
    config: &Config,
) -> anyhow::Result<()> {
    let data = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let parsed = parse_mail(&data)?;

    let envelope = Envelope {
        sender,
        recipients,
        data,
    };
    let decision = Router::new(&config.routing).route(&parsed.headers, &envelope, &parsed.body)?;

    let payload = match decision.encoding {
        PayloadEncoding::StructuredJson => serde_json::from_slice(&decision.payload)?,
        PayloadEncoding::RawText => {
            serde_json::Value::String(String::from_utf8_lossy(&decision.payload).into_owned())
        }
    };

    let output = serde_json::json!({
        "headers": parsed.headers,
        "content_type": parsed.content_type.media_type,
        "body": parsed.body,
        "topic": decision.topic,
        "payload": payload,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "smtp2mqtt", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
