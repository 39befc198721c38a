use clap::{ArgAction, Args, Parser, Subcommand};
use std::error::Error;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::autofill::message::{encode_response, parse_request, Request, Response};
use crate::autofill::scan::is_recognized_form;
use crate::autofill::session::FillSession;
use crate::browser::{BrowserSession, LaunchOptions};
use crate::config::{self, FillConfig};
use crate::dom::cdp::CdpDom;
use crate::dom::Dom;
use crate::store::{default_store_path, JsonFileStore, Profile, StorePatch};

#[derive(Parser)]
#[command(
    name = "signup-autofill",
    version,
    about = "Fill the recurring sign-up form from a saved profile"
)]
pub struct Cli {
    /// Profile store file (default: <config dir>/signup-autofill/store.json).
    #[arg(long, global = true, value_name = "FILE")]
    store: Option<PathBuf>,
    /// JSON file overriding fill timings.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// More logging; repeat for trace.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show, edit or clear the saved profile.
    Profile(ProfileArgs),
    /// Show or change the auto-fill and auto-submit toggles.
    Settings(SettingsArgs),
    /// Open the form in a browser and fill it once.
    Fill(FillArgs),
    /// Open the form and answer JSON requests on stdin, one per line.
    Session(SessionArgs),
}

#[derive(Args)]
struct ProfileArgs {
    #[command(subcommand)]
    command: ProfileCommand,
}

#[derive(Subcommand)]
enum ProfileCommand {
    Show,
    Set(ProfileSetArgs),
    Clear,
}

#[derive(Args)]
struct ProfileSetArgs {
    /// Start from a profile JSON file instead of the saved profile.
    #[arg(long, value_name = "FILE")]
    from_json: Option<PathBuf>,
    #[arg(long)]
    full_name: Option<String>,
    /// "challenge", "battle", "challenge as a team", ...
    #[arg(long)]
    challenge_type: Option<String>,
    #[arg(long)]
    challenge_target: Option<String>,
    #[arg(long)]
    partner_name: Option<String>,
    /// Comma-separated weekdays.
    #[arg(long, value_delimiter = ',')]
    practice_days: Option<Vec<String>>,
    /// Comma-separated weekdays.
    #[arg(long, value_delimiter = ',')]
    challenge_days: Option<Vec<String>>,
}

#[derive(Args)]
struct SettingsArgs {
    #[arg(long, value_name = "BOOL")]
    auto_fill: Option<bool>,
    #[arg(long, value_name = "BOOL")]
    auto_submit: Option<bool>,
}

#[derive(Args)]
struct BrowserArgs {
    /// Form URL.
    #[arg(value_name = "URL")]
    url: String,
    /// Browser binary (default: search well-known locations and PATH).
    #[arg(long, value_name = "PATH")]
    chrome: Option<PathBuf>,
    /// Browser profile directory.
    #[arg(long, value_name = "DIR")]
    profile_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    headless: bool,
}

impl BrowserArgs {
    fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            chrome_path: self.chrome.clone(),
            profile_dir: self.profile_dir.clone(),
            headless: self.headless,
        }
    }
}

#[derive(Args)]
struct FillArgs {
    #[command(flatten)]
    browser: BrowserArgs,
    /// Fill once right away instead of waiting for the form to render;
    /// ignores the auto-fill toggle.
    #[arg(long, default_value_t = false)]
    manual: bool,
    /// Leave the browser open until Enter is pressed.
    #[arg(long, default_value_t = false)]
    keep_open: bool,
}

#[derive(Args)]
struct SessionArgs {
    #[command(flatten)]
    browser: BrowserArgs,
    /// Do not fill automatically; only answer requests.
    #[arg(long, default_value_t = false)]
    no_auto: bool,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let store = JsonFileStore::new(store_path(cli.store.as_deref())?);
    match cli.command {
        Commands::Profile(args) => run_profile(&store, args),
        Commands::Settings(args) => run_settings(&store, args),
        Commands::Fill(args) => {
            let config = config::load_or_default(cli.config.as_deref())?;
            block_on(run_fill(&store, config, args))
        }
        Commands::Session(args) => {
            let config = config::load_or_default(cli.config.as_deref())?;
            block_on(run_session(&store, config, args))
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if verbose == 1 {
        builder.filter_level(log::LevelFilter::Debug);
    } else if verbose > 1 {
        builder.filter_level(log::LevelFilter::Trace);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn store_path(store_override: Option<&Path>) -> Result<PathBuf, Box<dyn Error>> {
    match store_override {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(default_store_path().ok_or("could not determine config directory")?),
    }
}

fn block_on<F>(future: F) -> Result<(), Box<dyn Error>>
where
    F: std::future::Future<Output = Result<(), Box<dyn Error + Send + Sync>>>,
{
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(future).map_err(|e| -> Box<dyn Error> { e })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_profile(store: &JsonFileStore, args: ProfileArgs) -> Result<(), Box<dyn Error>> {
    match args.command {
        ProfileCommand::Show => {
            let snapshot = store.read()?;
            match snapshot.user_profile {
                Some(profile) => print_json(&profile),
                None => {
                    eprintln!("No profile saved in {}", store.path().display());
                    Ok(())
                }
            }
        }
        ProfileCommand::Set(set) => {
            let base = match &set.from_json {
                Some(path) => read_profile_json(path)?,
                None => store.read()?.user_profile.unwrap_or_default(),
            };
            let profile = merge_profile(base, set);
            let snapshot = store.update(StorePatch {
                user_profile: Some(profile),
                ..StorePatch::default()
            })?;
            print_json(&snapshot.user_profile)
        }
        ProfileCommand::Clear => {
            store.clear_profile()?;
            eprintln!("Profile cleared.");
            Ok(())
        }
    }
}

fn read_profile_json(path: &Path) -> Result<Profile, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let profile = serde_json::from_str(&text)
        .map_err(|e| format!("invalid profile JSON in {}: {e}", path.display()))?;
    Ok(profile)
}

fn merge_profile(mut profile: Profile, set: ProfileSetArgs) -> Profile {
    if let Some(v) = set.full_name {
        profile.full_name = v;
    }
    if let Some(v) = set.challenge_type {
        profile.challenge_type = v;
    }
    if let Some(v) = set.challenge_target {
        profile.challenge_target = v;
    }
    if let Some(v) = set.partner_name {
        profile.partner_name = v;
    }
    if let Some(days) = set.practice_days {
        profile.practice_days = clean_days(days);
    }
    if let Some(days) = set.challenge_days {
        profile.challenge_days = clean_days(days);
    }
    profile
}

fn clean_days(days: Vec<String>) -> Vec<String> {
    days.into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect()
}

fn run_settings(store: &JsonFileStore, args: SettingsArgs) -> Result<(), Box<dyn Error>> {
    let snapshot = if args.auto_fill.is_some() || args.auto_submit.is_some() {
        store.update(StorePatch {
            auto_fill_enabled: args.auto_fill,
            auto_submit_enabled: args.auto_submit,
            ..StorePatch::default()
        })?
    } else {
        store.read()?
    };
    print_json(&snapshot.settings())?;
    if let Some(millis) = snapshot.last_fill_time {
        if let Some(time) = chrono::DateTime::from_timestamp_millis(millis) {
            eprintln!("Last fill: {}", time.to_rfc3339());
        }
    }
    Ok(())
}

/// Open the form and attach to it. The helper is installed after the
/// navigation so it lives in the form's document.
async fn open_form(
    args: &BrowserArgs,
) -> Result<(BrowserSession, CdpDom), Box<dyn Error + Send + Sync>> {
    let browser = BrowserSession::launch(&args.launch_options()).await?;
    let opened = async {
        browser.navigate(&args.url).await?;
        let dom = CdpDom::attach(browser.page().clone()).await?;
        match dom.location().await {
            Ok(location) if !is_recognized_form(&location) => log::warn!(
                "{}{} is not a recognised form page; filling anyway",
                location.host,
                location.path
            ),
            Ok(_) => {}
            Err(err) => log::warn!("could not read page location: {err}"),
        }
        Ok::<_, Box<dyn Error + Send + Sync>>(dom)
    }
    .await;
    match opened {
        Ok(dom) => Ok((browser, dom)),
        Err(err) => {
            browser.close().await;
            Err(err)
        }
    }
}

async fn run_fill(
    store: &JsonFileStore,
    config: FillConfig,
    args: FillArgs,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (browser, dom) = open_form(&args.browser).await?;
    let mut session = FillSession::load(store, config).await;
    if args.manual {
        session
            .handle_request(&dom, store, Request::FillForm)
            .await;
    } else {
        session.run_auto(&dom, store).await;
    }

    if let Some(report) = session.last_report() {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    let filled = session.is_filled();
    if args.keep_open {
        eprintln!("Press Enter to close the browser.");
        let _ = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)
        })
        .await;
    }
    drop(dom);
    browser.close().await;

    if filled {
        Ok(())
    } else {
        Err("form was not filled".into())
    }
}

async fn run_session(
    store: &JsonFileStore,
    config: FillConfig,
    args: SessionArgs,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (browser, dom) = open_form(&args.browser).await?;
    let mut session = FillSession::load(store, config).await;

    // Requests queue up while the automatic pass runs.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    if !args.no_auto {
        session.run_auto(&dom, store).await;
    }

    let mut stdout = std::io::stdout();
    while let Some(line) = rx.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match parse_request(&line) {
            Ok(request) => session.handle_request(&dom, store, request).await,
            Err(response) => response,
        };
        write_response(&mut stdout, &response)?;
    }

    drop(dom);
    browser.close().await;
    Ok(())
}

fn write_response(out: &mut impl Write, response: &Response) -> std::io::Result<()> {
    writeln!(out, "{}", encode_response(response))?;
    out.flush()
}
