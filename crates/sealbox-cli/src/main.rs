//! sealbox: send and open password-protected, self-expiring file shares
//!
//! Sharing:
//!   send <file>              - seal (optional) and upload a file, print its link
//!   open <link-or-token>     - resolve a share, unlock it and save the file
//!   link <token>             - print the share link for a token
//!
//! Local envelopes:
//!   encrypt <in> <out>       - seal a file with a password
//!   decrypt <in> [<out>]     - open a sealed file (--inspect reads the header only)
//!
//! Monitoring:
//!   logs [--watch]           - show the access audit trail
//!   stats                    - show share statistics
//!   config show              - display current configuration
//!   demo <file>              - send and open a file against an in-process service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use sealbox_client::{
    build_share_link, parse_share_input, poll_logs, HttpShareService, MemoryShareService,
    MonitorUpdate, ShareService,
};
use sealbox_core::config::{CryptoConfig, SealboxConfig};
use sealbox_core::{AccessLogEntry, SharePolicy, ShareToken};
use sealbox_crypto::{EnvelopeMode, EnvelopeOptions};
use sealbox_flow::{AccessFlow, AccessPolicy, UploadFlow, UploadOutcome, UploadRequest};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealbox",
    version,
    about = "sealbox: password-protected, self-expiring file shares",
    long_about = None
)]
struct Cli {
    /// Path to sealbox.toml config file
    #[arg(long, short = 'c', env = "SEALBOX_CONFIG", default_value = "sealbox.toml")]
    config: PathBuf,

    /// Log level (overrides config logging.level; SEALBOX_LOG / RUST_LOG take precedence)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (overrides config logging.format)
    #[arg(long, env = "SEALBOX_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a file and print its share link
    Send {
        file: PathBuf,

        /// View budget (default: share.default_max_views)
        #[arg(long)]
        max_views: Option<u32>,

        /// Lifetime in minutes (default: share.default_expiry_mins)
        #[arg(long)]
        expiry_mins: Option<u32>,

        /// Display name shown to the owner
        #[arg(long)]
        name: Option<String>,

        /// Upload the file as-is, without a password
        #[arg(long)]
        no_encrypt: bool,

        #[command(flatten)]
        envelope: EnvelopeArgs,

        #[command(flatten)]
        password: PasswordArg,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve a share link (or bare token), unlock it and save the file
    Open {
        /// Share link or token
        link: String,

        /// Directory to save into
        #[arg(long, short = 'o', default_value = ".")]
        out: PathBuf,

        /// Download without decrypting
        #[arg(long)]
        no_password: bool,

        #[command(flatten)]
        password: PasswordArg,
    },

    /// Print the share link for a token
    Link { token: String },

    /// Seal a local file into an envelope
    Encrypt {
        input: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        envelope: EnvelopeArgs,

        #[command(flatten)]
        password: PasswordArg,
    },

    /// Open a local envelope
    Decrypt {
        input: PathBuf,

        #[arg(required_unless_present = "inspect")]
        output: Option<PathBuf>,

        /// Describe the envelope header without decrypting
        #[arg(long)]
        inspect: bool,

        #[command(flatten)]
        password: PasswordArg,
    },

    /// Show the access audit trail
    Logs {
        /// Keep polling and print new entries as they arrive
        #[arg(long)]
        watch: bool,
    },

    /// Show upload and access statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Send and open a file against an in-process share service
    Demo {
        file: PathBuf,

        /// Directory to save the opened copy into
        #[arg(long, short = 'o', default_value = ".")]
        out: PathBuf,

        #[command(flatten)]
        password: PasswordArg,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration as TOML
    Show,
}

#[derive(clap::Args, Debug, Default)]
struct EnvelopeArgs {
    /// Emit base64 text instead of raw bytes
    #[arg(long)]
    armor: bool,

    /// Append an integrity tag so a wrong password is always detected
    #[arg(long)]
    authenticated: bool,
}

#[derive(clap::Args, Debug, Default)]
struct PasswordArg {
    /// Password (prompted when omitted)
    #[arg(long, env = "SEALBOX_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, loaded) = load_config(&cli.config).await?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| log_format_from_config(&config.logging.format));
    init_logging(level, &format);

    if !loaded {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Send {
            file,
            max_views,
            expiry_mins,
            name,
            no_encrypt,
            envelope,
            password,
            json,
        } => {
            let service = connect(&config)?;
            let policy = share_policy(&config, max_views, expiry_mins, name);
            let password = if no_encrypt {
                None
            } else {
                Some(read_password(password.password, "Password: ", true)?)
            };
            let outcome =
                send_file(&config, service, &file, policy, password, &envelope).await?;
            print_outcome(&outcome, json)
        }
        Commands::Open {
            link,
            out,
            no_password,
            password,
        } => {
            let service = connect(&config)?;
            let token = parse_share_input(&link, &config.share.link_param)
                .with_context(|| format!("no share token found in {link:?}"))?;
            open_share(&config, service, &token, &out, |_| {
                if no_password {
                    Ok(None)
                } else {
                    read_optional_password(password.password)
                }
            })
            .await
        }
        Commands::Link { token } => {
            let link = build_share_link(
                &config.share.link_origin,
                &config.share.link_param,
                &ShareToken::new(token),
            )?;
            println!("{link}");
            Ok(())
        }
        Commands::Encrypt {
            input,
            output,
            envelope,
            password,
        } => {
            let options = envelope_options(&config.crypto, &envelope)?;
            let password = read_password(password.password, "Password: ", true)?;
            cmd_encrypt(&input, &output, password, options).await
        }
        Commands::Decrypt {
            input,
            output,
            inspect,
            password,
        } => match output {
            Some(output) if !inspect => {
                let password = read_password(password.password, "Password: ", false)?;
                cmd_decrypt(&input, &output, password).await
            }
            _ => cmd_inspect(&input).await,
        },
        Commands::Logs { watch } => cmd_logs(&config, connect(&config)?, watch).await,
        Commands::Stats { json } => cmd_stats(&config, connect(&config)?, json).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
        Commands::Demo {
            file,
            out,
            password,
        } => cmd_demo(&config, &file, &out, password.password).await,
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Returns the parsed config and whether the file existed.
async fn load_config(path: &Path) -> Result<(SealboxConfig, bool)> {
    if !path.exists() {
        return Ok((SealboxConfig::default(), false));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config = SealboxConfig::from_toml(&content)
        .with_context(|| format!("parsing config: {}", path.display()))?;
    Ok((config, true))
}

fn log_format_from_config(raw: &str) -> LogFormat {
    if raw.trim().eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("SEALBOX_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn connect(config: &SealboxConfig) -> Result<Arc<dyn ShareService>> {
    let service = HttpShareService::from_config(&config.server)
        .context("configuring share service client")?;
    tracing::debug!(endpoint = %service.endpoint(), "share service client ready");
    Ok(Arc::new(service))
}

fn share_policy(
    config: &SealboxConfig,
    max_views: Option<u32>,
    expiry_mins: Option<u32>,
    name: Option<String>,
) -> SharePolicy {
    let mut policy = SharePolicy::new(
        max_views.unwrap_or(config.share.default_max_views),
        expiry_mins.unwrap_or(config.share.default_expiry_mins),
    );
    if let Some(name) = name {
        policy = policy.with_display_name(name);
    }
    if let Some(owner) = &config.server.owner_id {
        policy = policy.with_owner(owner.clone());
    }
    policy
}

/// Config mode and armor, with command-line flags switching them on.
fn envelope_options(crypto: &CryptoConfig, args: &EnvelopeArgs) -> Result<EnvelopeOptions> {
    let mut mode: EnvelopeMode = crypto
        .mode
        .parse()
        .map_err(|e: String| anyhow::anyhow!("crypto.mode: {e}"))?;
    if args.authenticated {
        mode = EnvelopeMode::Authenticated;
    }
    Ok(EnvelopeOptions {
        mode,
        armor: crypto.armor || args.armor,
    })
}

// ── Password prompts ──────────────────────────────────────────────────────────

fn read_password(flag: Option<String>, prompt: &str, confirm: bool) -> Result<SecretString> {
    if let Some(pw) = flag {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    if confirm {
        let again = rpassword::prompt_password("Confirm password: ")
            .context("reading password confirmation")?;
        if again != pw {
            anyhow::bail!("passwords do not match");
        }
    }
    Ok(SecretString::from(pw))
}

/// A blank answer means the share is opened without decryption.
fn read_optional_password(flag: Option<String>) -> Result<Option<SecretString>> {
    let pw = match flag {
        Some(pw) => pw,
        None => rpassword::prompt_password("Password (blank for unencrypted shares): ")
            .context("reading password")?,
    };
    Ok((!pw.is_empty()).then(|| SecretString::from(pw)))
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `sealbox send` ────────────────────────────────────────────────────────────

async fn send_file(
    config: &SealboxConfig,
    service: Arc<dyn ShareService>,
    file: &Path,
    policy: SharePolicy,
    password: Option<SecretString>,
    envelope: &EnvelopeArgs,
) -> Result<UploadOutcome> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", file.display()))?;

    let mut request = UploadRequest::new(filename, bytes, policy)
        .with_envelope(envelope_options(&config.crypto, envelope)?)
        .with_suffix(config.share.encrypted_suffix.clone());
    if let Some(password) = password {
        request = request.with_password(password);
    }

    let spinner = make_spinner("send");
    let progress = spinner.clone();
    let mut flow = UploadFlow::new(service)
        .with_share_links(
            config.share.link_origin.clone(),
            config.share.link_param.clone(),
        )
        .with_observer(move |state| progress.set_message(state.name()));

    let outcome = flow.submit(request).await;
    spinner.finish_and_clear();
    outcome.context("upload failed")
}

fn print_outcome(outcome: &UploadOutcome, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(outcome).context("serializing outcome")?
        );
        return Ok(());
    }

    let link = outcome
        .share_link
        .clone()
        .unwrap_or_else(|| outcome.token.to_string());
    println!("Share link: {link}");
    println!("Stored as:  {}", outcome.filename);
    if let Some(expires) = outcome.expires_at {
        println!("Expires:    {} UTC", expires.format("%Y-%m-%d %H:%M:%S"));
    }
    println!(
        "Encrypted:  {}",
        if outcome.encrypted { "yes" } else { "no (anyone with the link can read it)" }
    );
    Ok(())
}

// ── `sealbox open` ────────────────────────────────────────────────────────────

async fn open_share<F>(
    config: &SealboxConfig,
    service: Arc<dyn ShareService>,
    token: &ShareToken,
    out: &Path,
    ask_password: F,
) -> Result<()>
where
    F: FnOnce(&sealbox_flow::PendingShare) -> Result<Option<SecretString>>,
{
    let policy = AccessPolicy::from_config(&config.access, &config.share);
    let spinner = make_spinner("open");
    let progress = spinner.clone();
    let mut flow = AccessFlow::new(service, policy)
        .with_observer(move |state| progress.set_message(state.name()));
    if let Some(owner) = &config.server.owner_id {
        flow = flow.with_owner(owner.clone());
    }

    let checked = flow.check(token.as_str()).await;
    spinner.finish_and_clear();
    let share = checked.context("resolving share")?;

    println!("File:       {}", share.filename);
    println!("Views left: {}", share.views_left);
    if let Some(expires) = share.expires_at {
        println!("Expires:    {} UTC", expires.format("%Y-%m-%d %H:%M:%S"));
    }

    let password = ask_password(&share)?;
    spinner.reset();
    spinner.enable_steady_tick(Duration::from_millis(80));
    let unlocked = flow.unlock(password).await;
    spinner.finish_and_clear();
    let file = unlocked.context("unlocking share")?;

    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("creating {}", out.display()))?;
    let path = file
        .save_into(out)
        .with_context(|| format!("saving into {}", out.display()))?;

    println!(
        "Saved {} ({} bytes{})",
        path.display(),
        file.size,
        if file.decrypted { ", decrypted" } else { "" }
    );
    println!("Views left: {}", file.views_left);
    Ok(())
}

// ── `sealbox encrypt` / `decrypt` ─────────────────────────────────────────────

async fn cmd_encrypt(
    input: &Path,
    output: &Path,
    password: SecretString,
    options: EnvelopeOptions,
) -> Result<()> {
    let plaintext = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;

    let envelope = tokio::task::spawn_blocking(move || {
        sealbox_crypto::encrypt_with(&plaintext, &password, &options)
    })
    .await
    .context("encryption task")?
    .context("encrypting")?;

    tokio::fs::write(output, &envelope)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Sealed {} -> {} ({} mode{}, {} bytes)",
        input.display(),
        output.display(),
        options.mode,
        if options.armor { ", armored" } else { "" },
        envelope.len()
    );
    Ok(())
}

async fn cmd_decrypt(input: &Path, output: &Path, password: SecretString) -> Result<()> {
    let envelope = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;

    let plaintext =
        tokio::task::spawn_blocking(move || sealbox_crypto::decrypt(&envelope, &password))
            .await
            .context("decryption task")?
            .context("decrypting")?;

    tokio::fs::write(output, &plaintext)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Opened {} -> {} ({} bytes)",
        input.display(),
        output.display(),
        plaintext.len()
    );
    Ok(())
}

async fn cmd_inspect(input: &Path) -> Result<()> {
    let envelope = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let info = sealbox_crypto::inspect(&envelope).context("inspecting envelope")?;

    let salt: String = info.salt.iter().map(|b| format!("{b:02x}")).collect();
    println!("Mode:       {}", info.mode);
    println!("Armored:    {}", if info.armored { "yes" } else { "no" });
    println!("Salt:       {salt}");
    println!("Ciphertext: {} bytes", info.ciphertext_len);
    println!("Envelope:   {} bytes", info.envelope_len);
    Ok(())
}

// ── `sealbox logs` / `stats` ──────────────────────────────────────────────────

async fn cmd_logs(
    config: &SealboxConfig,
    service: Arc<dyn ShareService>,
    watch: bool,
) -> Result<()> {
    let owner = config.server.owner_id.clone();

    if !watch {
        let entries = service
            .access_logs(owner.as_deref())
            .await
            .context("fetching access logs")?;
        if entries.is_empty() {
            println!("No access recorded.");
        }
        for entry in &entries {
            println!("{}", format_log_entry(entry));
        }
        return Ok(());
    }

    let every = Duration::from_secs(config.monitor.logs_interval_secs.max(1));
    let (tx, mut rx) = mpsc::channel(16);
    let poller = tokio::spawn(poll_logs(service, owner, every, tx));

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                // oldest first so the terminal reads top to bottom
                Some(MonitorUpdate::Logs(entries)) => {
                    for entry in entries.iter().rev() {
                        println!("{}", format_log_entry(entry));
                    }
                }
                Some(MonitorUpdate::Failed(msg)) => eprintln!("poll failed: {msg}"),
                Some(MonitorUpdate::Stats(_)) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(rx);
    poller.abort();
    Ok(())
}

fn format_log_entry(entry: &AccessLogEntry) -> String {
    let when = entry
        .accessed_at_utc()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| entry.accessed_at.clone());
    let reason = entry
        .status
        .split_once(':')
        .map(|(_, reason)| reason.trim())
        .unwrap_or_default();
    format!(
        "{when:<19}  {:<8} {:<16} {:<20} {}",
        entry.status_label(),
        entry.masked_ip(),
        reason,
        entry.user_agent.as_deref().unwrap_or("-"),
    )
}

async fn cmd_stats(
    config: &SealboxConfig,
    service: Arc<dyn ShareService>,
    json: bool,
) -> Result<()> {
    let stats = service
        .stats(config.server.owner_id.as_deref())
        .await
        .context("fetching statistics")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("serializing statistics")?
        );
        return Ok(());
    }

    println!("Uploads:         {}", stats.total_uploads);
    println!("Active links:    {}", stats.active_links);
    println!("Threats blocked: {}", stats.threats_blocked);
    println!("Last 24h:        {}", sparkline(&stats.activity_graph));
    Ok(())
}

fn sparkline(values: &[u64]) -> String {
    const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let max = values.iter().copied().max().unwrap_or(0);
    values
        .iter()
        .map(|&v| {
            if max == 0 {
                BARS[0]
            } else {
                BARS[(v * 7 / max) as usize]
            }
        })
        .collect()
}

// ── `sealbox config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &SealboxConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `sealbox demo` ────────────────────────────────────────────────────────────

async fn cmd_demo(
    config: &SealboxConfig,
    file: &Path,
    out: &Path,
    password: Option<String>,
) -> Result<()> {
    let service: Arc<dyn ShareService> = Arc::new(MemoryShareService::new());
    let password = read_password(password, "Password: ", false)?;
    let policy = share_policy(config, None, None, None);

    let outcome = send_file(
        config,
        service.clone(),
        file,
        policy,
        Some(SecretString::from(password.expose_secret().to_owned())),
        &EnvelopeArgs::default(),
    )
    .await?;
    print_outcome(&outcome, false)?;
    println!();

    open_share(config, service, &outcome.token, out, move |_| Ok(Some(password))).await
}
