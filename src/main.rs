//! CLI entry point for `mimetree`.

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};

use mimetree::config::{self, Config};
use mimetree::crypto::{CryptoEngine, Protocol};
use mimetree::parser::armor;
use mimetree::render::MessageParser;

#[derive(Parser)]
#[command(
    name = "mimetree",
    version,
    about = "Render MIME, PGP/MIME and S/MIME messages as a tree of parts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: $MIMETREE_CONFIG or the user config dir)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the node and part trees of a message
    Structure {
        path: PathBuf,
        /// Do not decrypt or verify
        #[arg(long)]
        no_crypto: bool,
    },
    /// Show a message as a reader would see it
    Show {
        path: PathBuf,
        /// Print the HTML body instead of the text
        #[arg(long)]
        html: bool,
        /// Do not decrypt or verify
        #[arg(long)]
        no_crypto: bool,
        #[arg(long)]
        json: bool,
    },
    /// List or extract attachments
    Attachments {
        path: PathBuf,
        /// Save attachments into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Do not decrypt or verify
        #[arg(long)]
        no_crypto: bool,
        #[arg(long)]
        json: bool,
    },
    /// Dump the inline OpenPGP armor blocks of a text file
    Armor { path: PathBuf },
    /// List usable OpenPGP keys
    Keys {
        patterns: Vec<String>,
        /// Only keys with a secret part
        #[arg(long)]
        secret: bool,
        /// Search key servers instead of the local keyring
        #[arg(long)]
        remote: bool,
        #[arg(long)]
        json: bool,
    },
    /// Import keys or certificates
    Import {
        path: PathBuf,
        /// Treat the file as key data instead of a message with certificate parts
        #[arg(long)]
        raw: bool,
        /// Import raw data as S/MIME certificates
        #[arg(long, requires = "raw")]
        cms: bool,
    },
    /// Print the effective configuration, or write the defaults
    Config {
        /// Write the default configuration to the user config file
        #[arg(long)]
        init: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config(),
    };

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Structure { path, no_crypto } => cmd_structure(&config, &path, no_crypto),
        Commands::Show {
            path,
            html,
            no_crypto,
            json,
        } => cmd_show(&config, &path, html, no_crypto, json),
        Commands::Attachments {
            path,
            output,
            no_crypto,
            json,
        } => cmd_attachments(&config, &path, output.as_deref(), no_crypto, json),
        Commands::Armor { path } => cmd_armor(&path),
        Commands::Keys {
            patterns,
            secret,
            remote,
            json,
        } => cmd_keys(&config, &patterns, secret, remote, json),
        Commands::Import { path, raw, cms } => cmd_import(&config, &path, raw, cms),
        Commands::Config { init } => cmd_config(&config, init),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = config::log_file_path(config);
    let log_dir = config::cache_dir(config);
    let log_name = log_path.file_name().unwrap_or_default();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn message_parser(config: &Config, no_crypto: bool) -> MessageParser {
    MessageParser::from_config(config, !no_crypto)
}

/// Print the node tree followed by the part tree.
fn cmd_structure(config: &Config, path: &Path, no_crypto: bool) -> anyhow::Result<()> {
    let message = message_parser(config, no_crypto).parse_file(path)?;
    print!("{}", message.structure());
    Ok(())
}

/// Print headers, security summary and body.
fn cmd_show(
    config: &Config,
    path: &Path,
    html: bool,
    no_crypto: bool,
    json: bool,
) -> anyhow::Result<()> {
    let message = message_parser(config, no_crypto).parse_file(path)?;
    let summary = message.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("From:     {}", summary.from);
    println!("Subject:  {}", summary.subject);
    if let Some(date) = summary.date {
        println!("Date:     {}", date.format(&config.display.date_format));
    }
    println!("Security: {}", summary.security);
    if let Some(status) = &summary.signature_status {
        println!("          {}", status.trim_end());
    }
    if summary.has_attachments() {
        let names: Vec<&str> = summary
            .attachments
            .iter()
            .map(|a| a.display_name())
            .collect();
        println!("Attached: {}", names.join(", "));
    }
    println!();

    let want_html = html || config.display.prefer_html;
    match (&summary.html, want_html) {
        (Some(body), true) => println!("{body}"),
        _ => println!("{}", summary.text),
    }
    Ok(())
}

/// List attachments, or save them when `output` is given.
fn cmd_attachments(
    config: &Config,
    path: &Path,
    output: Option<&Path>,
    no_crypto: bool,
    json: bool,
) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let message = message_parser(config, no_crypto).parse_file(path)?;
    let attachments = message.attachments();

    if let Some(dir) = output {
        let paths = mimetree::export::attachment::save_attachments(&message, dir)?;
        println!(
            "  Extracted {} attachment(s) to {}",
            paths.len(),
            dir.display()
        );
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&attachments)?);
        return Ok(());
    }

    if attachments.is_empty() {
        println!("  No attachments found.");
        return Ok(());
    }

    for att in &attachments {
        let mut flags = Vec::new();
        if att.is_inline {
            flags.push("inline");
        }
        if att.encryption.is_encrypted() {
            flags.push("encrypted");
        }
        if att.signature.is_signed() {
            flags.push("signed");
        }
        println!(
            "  {:<40} {:<28} {:>10}  {}",
            att.display_name(),
            att.content_type,
            format_size(att.size, BINARY),
            flags.join(",")
        );
    }
    Ok(())
}

/// Print each armor block with its kind and first line.
fn cmd_armor(path: &Path) -> anyhow::Result<()> {
    let data = mimetree::parser::eml::read_message(path)?;
    for (i, block) in armor::split(&data).iter().enumerate() {
        let text = String::from_utf8_lossy(block.text());
        let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        println!(
            "  {i:>3}  {:<18} {:>6} bytes  {}",
            format!("{:?}", block.kind),
            block.text().len(),
            first
        );
    }
    Ok(())
}

/// List usable keys matching the patterns.
fn cmd_keys(
    config: &Config,
    patterns: &[String],
    secret: bool,
    remote: bool,
    json: bool,
) -> anyhow::Result<()> {
    let engine = CryptoEngine::from_config(&config.crypto);
    let keys = engine.find_keys(patterns, secret, remote)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    if keys.is_empty() {
        println!("  No usable keys found.");
        return Ok(());
    }

    for key in &keys {
        let caps = format!(
            "{}{}{}",
            if key.can_sign { "S" } else { "-" },
            if key.can_encrypt { "E" } else { "-" },
            if key.has_secret { "#" } else { "" }
        );
        println!("  {}  {:<3}  {}", key.fingerprint, caps, key.short_key_id);
        for uid in &key.user_ids {
            println!("      {}", uid.id);
        }
    }
    Ok(())
}

/// Import key data, or the certificate parts of a message.
fn cmd_import(config: &Config, path: &Path, raw: bool, cms: bool) -> anyhow::Result<()> {
    let engine = CryptoEngine::from_config(&config.crypto);

    let results = if raw {
        let data = mimetree::parser::eml::read_message(path)?;
        let protocol = if cms { Protocol::Cms } else { Protocol::OpenPgp };
        vec![engine.import_key(protocol, &data)?]
    } else {
        let parser = MessageParser::from_config(config, true).with_engine(engine);
        let message = parser.parse_file(path)?;
        parser.import_certificates(&message)
    };

    if results.is_empty() {
        anyhow::bail!("No keys or certificates found in {}", path.display());
    }
    let imported: u32 = results.iter().map(|r| r.imported).sum();
    let unchanged: u32 = results.iter().map(|r| r.unchanged).sum();
    println!("  Imported {imported}, unchanged {unchanged}");
    Ok(())
}

/// Show the loaded configuration as TOML, or save the defaults with `--init`.
fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        if config::config_file_path().is_some_and(|p| p.exists()) {
            anyhow::bail!("Config file already exists, not overwriting");
        }
        config::save_config(&Config::default())?;
    }
    match config::config_file_path() {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config file location"),
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mimetree", &mut std::io::stdout());
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
