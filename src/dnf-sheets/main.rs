use core::time::Duration;
use std::path::PathBuf;

use compact_str::CompactString;
use dnfs::{
    config::Config,
    crawl::DamageCrawler,
    fetch::{AnyRenderer, Fetcher},
    neople::{KST_SECONDS, NeopleClient},
    raid::RaidChecker,
    sheets::{GoogleSheets, ServiceAccount},
    util,
};

#[derive(clap::Parser)]
#[command(version, about = "Keeps raid clears and damage readings in the party spreadsheet up to date")]
struct Args {
    #[arg(short, long, env = "DNFS_CONFIG", default_value = "dnf-sheets.json")]
    config: PathBuf,
    #[arg(long, env = "SPREADSHEET_ID")]
    spreadsheet_id: String,
    /// Inline service-account key; takes precedence over the key file.
    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_JSON", hide_env_values = true)]
    service_account_json: Option<String>,
    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_FILE", default_value = "service-account.json")]
    service_account_file: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Render each row's damage-meter page and write the reading back.
    Crawl {
        #[arg(long)]
        sheet: Option<CompactString>,
    },
    /// Check recent raid clears and tick the content sheet.
    Raid {
        #[arg(long)]
        sheet: Option<CompactString>,
        #[arg(long, env = "NEOPLE_API_KEY", hide_env_values = true)]
        api_key: String,
    },
    /// Run `crawl` every day at the configured time.
    Schedule,
}

fn service_account(args: &Args) -> anyhow::Result<ServiceAccount> {
    match &args.service_account_json {
        Some(json) => ServiceAccount::from_json(json),
        None => ServiceAccount::from_file(&args.service_account_file),
    }
}

async fn crawl(config: &Config, sheets: &GoogleSheets, only: Option<CompactString>) -> anyhow::Result<()> {
    let names = config.sheets_to_visit(only)?;
    tracing::info!(target: "main", "crawling {} sheets: {names:?}", names.len());

    let crawler = DamageCrawler {
        sheets,
        fetcher: Fetcher::new(AnyRenderer::from_config(&config.crawler), &config.crawler),
        config,
    };
    let report = crawler.run(&names).await;
    report.log_summary();
    report.ensure_any_ran()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;

    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let client = reqwest::Client::builder()
        .connect_timeout(const { Duration::from_secs(8) })
        .timeout(const { Duration::from_secs(30) })
        .build()?;
    let sheets = GoogleSheets::new(client.clone(), &args.spreadsheet_id, service_account(&args)?)?;
    sheets.authenticate().await?;

    match args.command {
        Commands::Crawl { sheet } => crawl(&config, &sheets, sheet).await?,
        Commands::Raid { sheet, api_key } => {
            let names = config.sheets_to_visit(sheet)?;
            let checker = RaidChecker {
                sheets: &sheets,
                api: NeopleClient::new(client, &config.neople, api_key)?,
                config: &config,
            };
            let now = util::now_in(util::offset(KST_SECONDS / 3600)?);
            tracing::info!(target: "main", "checking raids since {}", now - chrono::TimeDelta::days(config.raid.window_days));
            let report = checker.run(&names, now).await;
            report.log_summary();
            report.ensure_any_ran()?;
        }
        Commands::Schedule => {
            let at = config.schedule.time()?;
            let offset = util::offset(config.schedule.utc_offset_hours)?;
            loop {
                let now = util::now_in(offset);
                let next = util::next_run(now, at);
                tracing::info!(target: "schedule", "next crawl at \x1b[36m{next}\x1b[0m");
                tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

                if let Err(e) = crawl(&config, &sheets, None).await {
                    tracing::error!(target: "schedule", "\x1b[31mcrawl failed: {e:#}\x1b[0m");
                }
            }
        }
    }

    Ok(())
}
